use crate::response::{Occupations, ResponseError, Spin};
use itertools::iproduct;
use ndarray::prelude::*;
use ndarray_linalg::SVD;

/// The reference state in the MO basis: occupied/virtual coefficient blocks, MO overlap
/// and MO Fock matrices for every spin channel. If canonical orthogonalization is requested
/// the pseudo-inverses of the AO overlap and of the MO overlaps are stored as well.
#[derive(Clone, Debug)]
pub struct MoBasis {
    pub occupations: Occupations,
    /// Full MO coefficients `[nbasis, norb]` per channel.
    pub coefficients: Vec<Array2<f64>>,
    pub c_occ: Vec<Array2<f64>>,
    pub c_virt: Vec<Array2<f64>>,
    /// MO overlap σ = Cᵗ S C per channel.
    pub sigma: Vec<Array2<f64>>,
    /// MO Fock matrix Cᵗ F C per channel.
    pub fock: Vec<Array2<f64>>,
    /// AO overlap matrix.
    pub overlap: Array2<f64>,
    /// Pseudo-inverse of the AO overlap.
    pub s_inv: Option<Array2<f64>>,
    /// Pseudo-inverses of the MO overlaps.
    pub sigma_inv: Option<Vec<Array2<f64>>>,
}

impl MoBasis {
    /// Transform the AO overlap and Fock matrices into the MO basis of `c` (shape
    /// `[nden, nbasis, norb]`). `fock` has the shape `[nden, nbasis, nbasis]`.
    pub fn new(
        c: ArrayView3<f64>,
        overlap: ArrayView2<f64>,
        fock: ArrayView3<f64>,
        occupations: Occupations,
        do_canonical_orthogonalization: bool,
    ) -> Result<Self, ResponseError> {
        let (nden, nbasis, norb) = c.dim();
        if nden != 1 && nden != 2 {
            return Err(ResponseError::InvalidChannelCount(nden));
        }
        check_shape("AO overlap", &[nbasis, nbasis], overlap.shape())?;
        check_shape("AO Fock matrices", &[nden, nbasis, nbasis], fock.shape())?;

        let mut basis = MoBasis {
            occupations,
            coefficients: Vec::with_capacity(nden),
            c_occ: Vec::with_capacity(nden),
            c_virt: Vec::with_capacity(nden),
            sigma: Vec::with_capacity(nden),
            fock: Vec::with_capacity(nden),
            overlap: overlap.to_owned(),
            s_inv: None,
            sigma_inv: None,
        };

        for &spin in Spin::channels(nden) {
            let nocc: usize = occupations.nocc(spin);
            let c_s: ArrayView2<f64> = c.index_axis(Axis(0), spin.index());
            // Form the MO-basis overlap and Fock matrices.
            let sigma: Array2<f64> = c_s.t().dot(&overlap.dot(&c_s));
            let f_mo: Array2<f64> = c_s.t().dot(&fock.index_axis(Axis(0), spin.index()).dot(&c_s));

            basis.c_occ.push(c_s.slice(s![.., 0..nocc]).to_owned());
            basis.c_virt.push(c_s.slice(s![.., nocc..norb]).to_owned());
            basis.coefficients.push(c_s.to_owned());
            basis.sigma.push(sigma);
            basis.fock.push(f_mo);
        }

        if do_canonical_orthogonalization {
            basis.s_inv = Some(pinv(overlap)?);
            basis.sigma_inv = Some(
                basis
                    .sigma
                    .iter()
                    .map(|sigma| pinv(sigma.view()))
                    .collect::<Result<Vec<Array2<f64>>, ResponseError>>()?,
            );
        }
        Ok(basis)
    }

    /// Number of spin channels.
    pub fn nden(&self) -> usize {
        self.coefficients.len()
    }

    pub fn nbasis(&self) -> usize {
        self.overlap.nrows()
    }

    pub fn spins(&self) -> &'static [Spin] {
        Spin::channels(self.nden())
    }

    /// The uncoupled energy-difference operator of one spin channel.
    pub fn ediff(&self, spin: Spin) -> Array2<f64> {
        form_ediff_terms(
            self.fock[spin.index()].view(),
            self.sigma[spin.index()].view(),
            self.occupations.nocc(spin),
            self.occupations.nvirt(spin),
        )
    }

    /// AO matrices `[ncomp, nbasis, nbasis]` -> occupied-virtual vectors `[nov, ncomp]`.
    pub fn ao_to_mo(&self, spin: Spin, mats: ArrayView3<f64>) -> Array2<f64> {
        one_electron_mn_mats_to_ia_vecs(
            mats,
            self.c_occ[spin.index()].view(),
            self.c_virt[spin.index()].view(),
        )
    }

    /// Occupied-virtual vectors `[nov, ncomp]` -> AO matrices `[ncomp, nbasis, nbasis]`.
    pub fn mo_to_ao(&self, spin: Spin, vecs: ArrayView2<f64>) -> Array3<f64> {
        ia_vecs_to_one_electron_mn_mats(
            vecs,
            self.c_occ[spin.index()].view(),
            self.c_virt[spin.index()].view(),
        )
    }

    /// Back-transformation of AO response matrices (as written by [mo_to_ao](Self::mo_to_ao))
    /// into occupied-virtual vectors. With canonical orthogonalization the inverse is exact
    /// for non-orthogonal orbitals:
    /// X = [σ⁺ Cᵗ S X_AO S C σ⁺]_ov
    /// otherwise the plain transformation Cₒᵗ X_AO Cᵥ is used.
    pub fn ao_to_mo_rspvecs(&self, spin: Spin, mats: ArrayView3<f64>) -> Array2<f64> {
        let sigma_inv: &Array2<f64> = match self.sigma_inv.as_ref() {
            Some(sigma_inv) => &sigma_inv[spin.index()],
            None => return self.ao_to_mo(spin, mats),
        };
        let nocc: usize = self.occupations.nocc(spin);
        let nvirt: usize = self.occupations.nvirt(spin);
        let c: &Array2<f64> = &self.coefficients[spin.index()];
        let sc: Array2<f64> = self.overlap.dot(c);

        let mut vecs: Array2<f64> = Array2::zeros((nocc * nvirt, mats.dim().0));
        for (mat, mut vec) in mats.outer_iter().zip(vecs.axis_iter_mut(Axis(1))) {
            let x_full: Array2<f64> = sigma_inv.dot(&sc.t().dot(&mat.dot(&sc))).dot(sigma_inv);
            let x_ov = x_full.slice(s![0..nocc, nocc..(nocc + nvirt)]);
            vec.assign(&Array1::from_iter(x_ov.iter().copied()));
        }
        vecs
    }
}

/// The 1-electron terms of the orbital Hessian which would just be the orbital energy
/// differences ε_a - ε_i for orthogonal orbitals. For non-orthogonal orbitals with the MO
/// overlap σ and MO Fock matrix F:
///
/// ediff_(ia,jb) = σ_ij F_ab - F_ij σ_ab
///
/// The virtual index is the fast index of the composite index `ia`.
pub fn form_ediff_terms(
    fock: ArrayView2<f64>,
    sigma: ArrayView2<f64>,
    nocc: usize,
    nvirt: usize,
) -> Array2<f64> {
    let norb: usize = nocc + nvirt;
    let f_oo = fock.slice(s![0..nocc, 0..nocc]);
    let f_vv = fock.slice(s![nocc..norb, nocc..norb]);
    let sigma_oo = sigma.slice(s![0..nocc, 0..nocc]);
    let sigma_vv = sigma.slice(s![nocc..norb, nocc..norb]);

    let nov: usize = nocc * nvirt;
    let mut ediff: Array2<f64> = Array2::zeros((nov, nov));
    for (i, j) in iproduct!(0..nocc, 0..nocc) {
        ediff
            .slice_mut(s![i * nvirt..(i + 1) * nvirt, j * nvirt..(j + 1) * nvirt])
            .assign(&(sigma_oo[[i, j]] * &f_vv - f_oo[[i, j]] * &sigma_vv));
    }
    ediff
}

/// Orbital energy differences ε_a - ε_i of orthogonal orbitals as a diagonal matrix. The
/// orbital energies are the diagonal of the MO Fock matrix.
pub fn form_ediff_terms_orthogonal(fock: ArrayView2<f64>, nocc: usize, nvirt: usize) -> Array2<f64> {
    let orbe: ArrayView1<f64> = fock.diag();
    let omega: Array1<f64> = iproduct!(0..nocc, nocc..(nocc + nvirt))
        .map(|(i, a)| orbe[a] - orbe[i])
        .collect();
    Array2::from_diag(&omega)
}

/// Moore-Penrose pseudo-inverse from the singular value decomposition. Singular values
/// below max(m, n) * s_max * eps are treated as zero.
pub fn pinv(a: ArrayView2<f64>) -> Result<Array2<f64>, ResponseError> {
    let (m, n) = a.dim();
    let (u, sv, vt) = a.svd(true, true)?;
    let u: Array2<f64> =
        u.ok_or_else(|| ResponseError::Numerical(String::from("SVD did not return U")))?;
    let vt: Array2<f64> =
        vt.ok_or_else(|| ResponseError::Numerical(String::from("SVD did not return Vt")))?;

    let k: usize = sv.len();
    let s_max: f64 = sv.iter().copied().fold(0.0, f64::max);
    let tol: f64 = m.max(n) as f64 * s_max * f64::EPSILON;
    let sv_inv: Array1<f64> = sv.mapv(|x| if x > tol { 1.0 / x } else { 0.0 });

    // A⁺ = V Σ⁺ Uᵗ
    let v_scaled: Array2<f64> = &vt.slice(s![0..k, ..]).t() * &sv_inv;
    Ok(v_scaled.dot(&u.slice(s![.., 0..k]).t()))
}

/// Transform a stack of AO matrices into occupied-virtual vectors:
/// RHS_ia = Σ_μν C_μi M_μν C_νa
pub fn one_electron_mn_mats_to_ia_vecs(
    mats: ArrayView3<f64>,
    c_occ: ArrayView2<f64>,
    c_virt: ArrayView2<f64>,
) -> Array2<f64> {
    let nov: usize = c_occ.ncols() * c_virt.ncols();
    let mut vecs: Array2<f64> = Array2::zeros((nov, mats.dim().0));
    for (mat, mut vec) in mats.outer_iter().zip(vecs.axis_iter_mut(Axis(1))) {
        let ia: Array2<f64> = c_occ.t().dot(&mat.dot(&c_virt));
        vec.assign(&Array1::from_iter(ia.iter().copied()));
    }
    vecs
}

/// Inverse of [one_electron_mn_mats_to_ia_vecs] for full-rank coefficients:
/// M_μν = Σ_ia C_μi X_ia C_νa
pub fn ia_vecs_to_one_electron_mn_mats(
    vecs: ArrayView2<f64>,
    c_occ: ArrayView2<f64>,
    c_virt: ArrayView2<f64>,
) -> Array3<f64> {
    let nbasis: usize = c_occ.nrows();
    let nvirt: usize = c_virt.ncols();
    let mut mats: Array3<f64> = Array3::zeros((vecs.ncols(), nbasis, nbasis));
    for (vec, mut mat) in vecs.axis_iter(Axis(1)).zip(mats.outer_iter_mut()) {
        let x: Array2<f64> = Array2::from_shape_fn((c_occ.ncols(), nvirt), |(i, a)| vec[i * nvirt + a]);
        mat.assign(&c_occ.dot(&x.dot(&c_virt.t())));
    }
    mats
}

pub(crate) fn check_shape(
    what: &str,
    expected: &[usize],
    found: &[usize],
) -> Result<(), ResponseError> {
    if expected != found {
        return Err(ResponseError::ShapeMismatch {
            what: String::from(what),
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}
