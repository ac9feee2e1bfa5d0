use crate::io::checkpoint::{
    checkpoint_path, read_array2, read_array3, write_array2, write_array3, RHSVECS_TAG,
    RSPVECS_GUESS_TAG, RSPVECS_TAG,
};
use crate::response::ediff::check_shape;
use crate::response::{Basis, MoBasis, ResponseError, Spin};
use log::debug;
use ndarray::prelude::*;
use std::path::PathBuf;

/// A one-electron property operator together with its gradient (right-hand side) and
/// response vectors. Both vector sets hold one `[nov_s, ncomp]` block per spin channel
/// and are overwritten by every response calculation.
#[derive(Clone, Debug)]
pub struct OperatorSpec {
    /// Used in the checkpoint file names and in the printed tensors.
    pub label: String,
    /// AO integrals `[ncomp, nbasis, nbasis]`.
    pub integrals_ao: Array3<f64>,
    /// Operators that do not take part in the iterative solution keep the uncoupled
    /// response vectors.
    pub do_response: bool,
    pub rhsvecs: Vec<Array2<f64>>,
    pub rspvecs: Vec<Array2<f64>>,
}

impl OperatorSpec {
    pub fn new(label: &str, integrals_ao: Array3<f64>, do_response: bool) -> Self {
        Self {
            label: String::from(label),
            integrals_ao,
            do_response,
            rhsvecs: Vec::new(),
            rspvecs: Vec::new(),
        }
    }

    pub fn n_components(&self) -> usize {
        self.integrals_ao.dim().0
    }

    /// Cartesian labels for three-component operators, numbers otherwise.
    pub fn component_label(&self, idx: usize) -> String {
        if self.n_components() == 3 {
            String::from(["x", "y", "z"][idx])
        } else {
            format!("{}", idx + 1)
        }
    }

    /// Transform the AO integrals into the occupied-virtual gradient vectors of every spin
    /// channel. The response vectors are reset to zero.
    pub fn form_rhs(&mut self, basis: &MoBasis) -> Result<(), ResponseError> {
        let ncomp: usize = self.n_components();
        let nbasis: usize = basis.nbasis();
        if ncomp == 0 {
            return Err(ResponseError::ShapeMismatch {
                what: format!("integrals of operator {}", self.label),
                expected: vec![1, nbasis, nbasis],
                found: self.integrals_ao.shape().to_vec(),
            });
        }
        check_shape(
            &format!("integrals of operator {}", self.label),
            &[ncomp, nbasis, nbasis],
            self.integrals_ao.shape(),
        )?;

        self.rhsvecs = basis
            .spins()
            .iter()
            .map(|&spin| basis.ao_to_mo(spin, self.integrals_ao.view()))
            .collect();
        self.rspvecs = self
            .rhsvecs
            .iter()
            .map(|rhs| Array2::zeros(rhs.raw_dim()))
            .collect();
        Ok(())
    }

    /// Uncoupled response vectors of one channel:
    /// x_ia = g_ia / (ediff_(ia,ia) - ω)
    pub fn form_guess_rspvec(&mut self, spin: Spin, ediff: ArrayView2<f64>, frequency: f64) {
        let denominator: Array1<f64> = ediff.diag().mapv(|d| d - frequency);
        let rhs: &Array2<f64> = &self.rhsvecs[spin.index()];
        let guess: Array2<f64> = rhs / &denominator.insert_axis(Axis(1));
        self.rspvecs[spin.index()] = guess;
    }

    fn path(&self, prefix: &str, tag: &str, basis: Basis, spin: Spin) -> PathBuf {
        checkpoint_path(prefix, tag, &self.label, basis, spin)
    }

    /// Replace the response vectors by the ones stored in the checkpoint files. AO
    /// response matrices are transformed back into the MO basis.
    pub fn load_rspvecs(
        &mut self,
        kind: Basis,
        prefix: &str,
        basis: &MoBasis,
    ) -> Result<(), ResponseError> {
        let ncomp: usize = self.n_components();
        for &spin in basis.spins() {
            let path: PathBuf = self.path(prefix, RSPVECS_TAG, kind, spin);
            let nov: usize = basis.occupations.nov(spin);
            let rspvecs: Array2<f64> = match kind {
                Basis::Mo => {
                    let rspvecs: Array2<f64> = read_array2(&path, &self.label)?;
                    check_shape(&path.to_string_lossy(), &[nov, ncomp], rspvecs.shape())?;
                    rspvecs
                }
                Basis::Ao => {
                    let nbasis: usize = basis.nbasis();
                    let mats: Array3<f64> = read_array3(&path, &self.label)?;
                    check_shape(
                        &path.to_string_lossy(),
                        &[ncomp, nbasis, nbasis],
                        mats.shape(),
                    )?;
                    basis.ao_to_mo_rspvecs(spin, mats.view())
                }
            };
            debug!("read {} response vectors from {}", self.label, path.display());
            self.rspvecs[spin.index()] = rspvecs;
        }
        Ok(())
    }

    /// Write the uncoupled response vectors.
    pub fn save_guess(&self, prefix: &str, basis: &MoBasis) -> Result<(), ResponseError> {
        for &spin in basis.spins() {
            let path: PathBuf = self.path(prefix, RSPVECS_GUESS_TAG, Basis::Mo, spin);
            write_array2(&path, &self.label, self.rspvecs[spin.index()].view())?;
        }
        Ok(())
    }

    /// Write the gradient and the (converged) response vectors. With `save_level >= 2` the
    /// response vectors are also written as AO matrices C_o X C_vᵗ.
    pub fn save_solution(
        &self,
        prefix: &str,
        save_level: u8,
        basis: &MoBasis,
    ) -> Result<(), ResponseError> {
        for &spin in basis.spins() {
            let idx: usize = spin.index();
            let path: PathBuf = self.path(prefix, RHSVECS_TAG, Basis::Mo, spin);
            write_array2(&path, &self.label, self.rhsvecs[idx].view())?;
            let path: PathBuf = self.path(prefix, RSPVECS_TAG, Basis::Mo, spin);
            write_array2(&path, &self.label, self.rspvecs[idx].view())?;
            if save_level >= 2 {
                let path: PathBuf = self.path(prefix, RSPVECS_TAG, Basis::Ao, spin);
                let mats: Array3<f64> = basis.mo_to_ao(spin, self.rspvecs[idx].view());
                write_array3(&path, &self.label, mats.view())?;
            }
        }
        Ok(())
    }
}
