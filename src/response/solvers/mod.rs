use crate::response::ediff::check_shape;
use crate::response::{
    Convergence, FragmentTable, MatVec, Occupations, OperatorSpec, ResponseError, Spin,
};
use ndarray::prelude::*;
use ndarray_linalg::Norm;
use serde::{Deserialize, Serialize};
use std::ops::Range;
pub use utils::*;

pub mod diis;
pub mod krylov;
pub mod utils;

pub use diis::{DiisSolver, DiisSolverBuilder};
pub use krylov::{KrylovSolver, KrylovSolverBuilder};

/// Trait of the iterative solvers of the response equations
///
/// (ediff - ω) X + G(X) = V
///
/// The occupations are set once per response calculation, `init` is called once per
/// frequency before `run`.
pub trait ResponseSolver {
    fn set_orbital_occupations(&mut self, occupations: Occupations);

    fn set_fragment_occupations(&mut self, fragments: &FragmentTable);

    /// Store the energy-difference operators (one per spin channel), the frequency and
    /// the convergence settings of the next run.
    fn init(
        &mut self,
        ediff: &[Array2<f64>],
        frequency: f64,
        max_iter: usize,
        threshold: f64,
    ) -> Result<(), ResponseError>;

    /// Solve the response equations of all operators with `do_response = true`. The
    /// current response vectors are used as the starting point and are replaced by the
    /// solution. One status is returned per operator.
    fn run(
        &mut self,
        operators: &mut [OperatorSpec],
        matvec: &dyn MatVec,
    ) -> Result<Vec<Convergence>, ResponseError>;
}

/// Available iterative solvers.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SolverKind {
    /// Preconditioned Jacobi iterations with DIIS extrapolation.
    Diis,
    /// Minimal-residual iterations in a growing Krylov subspace.
    Krylov,
}

/// Solver with the default settings.
pub fn build_solver(kind: SolverKind) -> Box<dyn ResponseSolver> {
    match kind {
        SolverKind::Diis => Box::new(DiisSolver::default()),
        SolverKind::Krylov => Box::new(KrylovSolver::default()),
    }
}

/// Everything the solvers know about the current linear system.
#[derive(Clone, Debug, Default)]
pub struct ResponseProblem {
    pub occupations: Option<Occupations>,
    pub fragments: FragmentTable,
    pub ediff: Vec<Array2<f64>>,
    pub frequency: f64,
    pub max_iter: usize,
    pub threshold: f64,
    pub preconditioner: Preconditioner,
}

impl ResponseProblem {
    /// Check the energy-difference operators against the orbital occupations and build
    /// the preconditioner of the frequency.
    pub fn init(
        &mut self,
        ediff: &[Array2<f64>],
        frequency: f64,
        max_iter: usize,
        threshold: f64,
    ) -> Result<(), ResponseError> {
        if ediff.is_empty() || ediff.len() > 2 {
            return Err(ResponseError::InvalidChannelCount(ediff.len()));
        }
        if let Some(occ) = self.occupations {
            for (spin, mat) in Spin::channels(ediff.len()).iter().zip(ediff.iter()) {
                let nov: usize = occ.nov(*spin);
                check_shape(
                    &format!("{} energy differences", spin),
                    &[nov, nov],
                    mat.shape(),
                )?;
            }
        }
        self.ediff = ediff.to_vec();
        self.frequency = frequency;
        self.max_iter = max_iter;
        self.threshold = threshold;
        self.preconditioner = Preconditioner::new(&self.ediff, frequency, &self.fragments);
        Ok(())
    }

    /// Left-hand side of the response equations for combined vectors `[dim, ncols]`:
    /// (ediff - ω) X + G(X)
    pub fn apply_lhs(
        &self,
        batch: &Batch,
        x: ArrayView2<f64>,
        matvec: &dyn MatVec,
    ) -> Result<Array2<f64>, ResponseError> {
        let blocks: Vec<ArrayView2<f64>> = batch.split(x);
        let coupling: Vec<Array2<f64>> = matvec.compute_products(&blocks, self.frequency)?;
        let mut ax: Array2<f64> = Array2::zeros(x.raw_dim());
        for (idx, (block, g)) in blocks.iter().zip(coupling.iter()).enumerate() {
            let mut ax_s = ax.slice_mut(s![batch.rows(idx), ..]);
            ax_s.assign(&(self.ediff[idx].dot(block) - self.frequency * block));
            ax_s += g;
        }
        Ok(ax)
    }
}

/// The response vectors of all operators that are solved for, stacked into one matrix.
/// Every column is one component of one operator, the rows of the spin channels follow
/// each other.
#[derive(Clone, Debug)]
pub struct Batch {
    nov: Vec<usize>,
    /// (operator index, first column, number of components)
    members: Vec<(usize, usize, usize)>,
    ncols: usize,
}

impl Batch {
    pub fn new(operators: &[OperatorSpec], nov: &[usize]) -> Result<Self, ResponseError> {
        let mut members: Vec<(usize, usize, usize)> = Vec::new();
        let mut ncols: usize = 0;
        for (idx, op) in operators.iter().enumerate() {
            let ncomp: usize = op.n_components();
            for (vecs, what) in [(&op.rhsvecs, "gradient"), (&op.rspvecs, "response")] {
                let shapes: Vec<usize> = vecs.iter().map(|v| v.nrows()).collect();
                check_shape(&format!("{} vectors of {}", what, op.label), nov, &shapes)?;
                for v in vecs.iter() {
                    check_shape(
                        &format!("{} vectors of {}", what, op.label),
                        &[v.nrows(), ncomp],
                        v.shape(),
                    )?;
                }
            }
            if op.do_response {
                members.push((idx, ncols, ncomp));
                ncols += ncomp;
            }
        }
        Ok(Self {
            nov: nov.to_vec(),
            members,
            ncols,
        })
    }

    /// Length of the combined vectors.
    pub fn dim(&self) -> usize {
        self.nov.iter().sum()
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Rows of one spin channel.
    pub fn rows(&self, channel: usize) -> Range<usize> {
        let start: usize = self.nov[0..channel].iter().sum();
        start..(start + self.nov[channel])
    }

    fn gather(&self, operators: &[OperatorSpec], rhs: bool) -> Array2<f64> {
        let mut combined: Array2<f64> = Array2::zeros((self.dim(), self.ncols));
        for &(idx, start, ncomp) in self.members.iter() {
            let vecs: &Vec<Array2<f64>> = if rhs {
                &operators[idx].rhsvecs
            } else {
                &operators[idx].rspvecs
            };
            for (channel, v) in vecs.iter().enumerate() {
                combined
                    .slice_mut(s![self.rows(channel), start..(start + ncomp)])
                    .assign(v);
            }
        }
        combined
    }

    /// Combined gradient vectors.
    pub fn gather_rhs(&self, operators: &[OperatorSpec]) -> Array2<f64> {
        self.gather(operators, true)
    }

    /// Combined response vectors.
    pub fn gather_rsp(&self, operators: &[OperatorSpec]) -> Array2<f64> {
        self.gather(operators, false)
    }

    /// Write combined response vectors back into the operators.
    pub fn scatter(&self, x: ArrayView2<f64>, operators: &mut [OperatorSpec]) {
        for &(idx, start, ncomp) in self.members.iter() {
            for (channel, v) in operators[idx].rspvecs.iter_mut().enumerate() {
                v.assign(&x.slice(s![self.rows(channel), start..(start + ncomp)]));
            }
        }
    }

    /// Views of the spin channel blocks of combined vectors.
    pub fn split<'a>(&self, x: ArrayView2<'a, f64>) -> Vec<ArrayView2<'a, f64>> {
        (0..self.nov.len())
            .map(|channel| x.slice_move(s![self.rows(channel), ..]))
            .collect()
    }

    /// Convergence status of every operator from the residual norms of the columns.
    pub fn statuses(
        &self,
        n_operators: usize,
        norms: &[f64],
        iterations: usize,
        threshold: f64,
    ) -> Vec<Convergence> {
        let mut statuses: Vec<Convergence> = vec![Convergence::Skipped; n_operators];
        for &(idx, start, ncomp) in self.members.iter() {
            let residual: f64 = norms[start..(start + ncomp)]
                .iter()
                .copied()
                .fold(0.0, f64::max);
            statuses[idx] = if residual < threshold {
                Convergence::Converged {
                    iterations,
                    residual,
                }
            } else {
                Convergence::NotConverged {
                    iterations,
                    residual,
                }
            };
        }
        statuses
    }
}

/// Euclidean norm of every column.
pub fn column_norms(r: ArrayView2<f64>) -> Vec<f64> {
    r.axis_iter(Axis(1)).map(|col| col.norm_l2()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::tests::*;
    use ndarray_linalg::generate::random;
    use ndarray_linalg::Solve;

    pub const EPSILON: f64 = 1e-7;

    /// A two-channel system with a diagonally dominant ediff and a weak dense coupling.
    pub struct ModelSystem {
        pub ediff: Vec<Array2<f64>>,
        pub coupling: Array2<f64>,
        pub operators: Vec<OperatorSpec>,
        pub occupations: Occupations,
    }

    pub fn model_system(nocc: usize, nvirt: usize, nden: usize) -> ModelSystem {
        let nov: usize = nocc * nvirt;
        let ediff: Vec<Array2<f64>> = (0..nden)
            .map(|_| generate_diagonal_dominant(nov, 0.01))
            .collect();
        let coupling: Array2<f64> = generate_diagonal_dominant(nov, 0.02) * 0.01;
        let mut operators: Vec<OperatorSpec> = vec![
            OperatorSpec::new("dipole", Array3::zeros((3, 1, 1)), true),
            OperatorSpec::new("spectator", Array3::zeros((2, 1, 1)), false),
        ];
        for op in operators.iter_mut() {
            let ncomp: usize = op.n_components();
            op.rhsvecs = (0..nden).map(|_| random((nov, ncomp))).collect();
            op.rspvecs = (0..nden).map(|_| Array2::zeros((nov, ncomp))).collect();
        }
        ModelSystem {
            ediff,
            coupling,
            operators,
            occupations: Occupations::new(&[nocc, nvirt, nocc, nvirt], nocc + nvirt).unwrap(),
        }
    }

    /// Direct solution of the dense linear system of every channel.
    pub fn exact_solution(system: &ModelSystem, frequency: f64, op: &OperatorSpec) -> Vec<Array2<f64>> {
        system
            .ediff
            .iter()
            .zip(op.rhsvecs.iter())
            .map(|(ediff, rhs)| {
                let n: usize = ediff.nrows();
                let a: Array2<f64> =
                    ediff + &system.coupling - frequency * &Array2::<f64>::eye(n);
                let mut x: Array2<f64> = Array2::zeros(rhs.raw_dim());
                for (col, mut x_col) in rhs.axis_iter(Axis(1)).zip(x.axis_iter_mut(Axis(1))) {
                    x_col.assign(&a.solve(&col.to_owned()).unwrap());
                }
                x
            })
            .collect()
    }

    pub fn check_solver(solver: &mut dyn ResponseSolver, nden: usize) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut system = model_system(3, 4, nden);
        let frequency: f64 = 0.05;
        solver.set_orbital_occupations(system.occupations);
        solver.set_fragment_occupations(&FragmentTable::empty());
        solver.init(&system.ediff, frequency, 100, 1e-9).unwrap();
        let coupling: Array2<f64> = system.coupling.clone();
        let statuses = solver.run(&mut system.operators, &coupling).unwrap();

        assert!(matches!(statuses[0], Convergence::Converged { .. }), "{:?}", statuses[0]);
        assert_eq!(statuses[1], Convergence::Skipped);
        let exact = exact_solution(&system, frequency, &system.operators[0]);
        for (x, x_ref) in system.operators[0].rspvecs.iter().zip(exact.iter()) {
            assert!(x.abs_diff_eq(x_ref, EPSILON), "solver: {} direct: {}", x, x_ref);
        }
        // the spectator keeps its vectors
        assert!(system.operators[1].rspvecs.iter().all(|x| x.iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn solver_kind_from_name() {
        #[derive(Deserialize)]
        struct Wrapper {
            solver: SolverKind,
        }
        let w: Wrapper = toml::from_str("solver = \"krylov\"").unwrap();
        assert_eq!(w.solver, SolverKind::Krylov);
        assert!(toml::from_str::<Wrapper>("solver = \"davidson\"").is_err());
    }

    #[test]
    fn batch_gather_and_scatter() {
        let mut system = model_system(2, 3, 2);
        let batch = Batch::new(&system.operators, &[6, 6]).unwrap();
        assert_eq!(batch.ncols(), 3);
        assert_eq!(batch.dim(), 12);
        let g = batch.gather_rhs(&system.operators);
        assert_eq!(g.slice(s![6..12, ..]), system.operators[0].rhsvecs[1]);

        let x: Array2<f64> = Array2::from_elem((12, 3), 1.5);
        batch.scatter(x.view(), &mut system.operators);
        assert_eq!(system.operators[0].rspvecs[1], Array2::from_elem((6, 3), 1.5));
        assert_eq!(system.operators[1].rspvecs[0], Array2::<f64>::zeros((6, 2)));
    }

    #[test]
    fn batch_rejects_vectors_of_wrong_length() {
        let system = model_system(2, 3, 1);
        assert!(Batch::new(&system.operators, &[5]).is_err());
    }

    #[test]
    fn lhs_of_uncoupled_system() {
        let system = model_system(2, 2, 1);
        let mut problem = ResponseProblem {
            occupations: Some(system.occupations),
            ..Default::default()
        };
        problem.init(&system.ediff, 0.3, 10, 1e-6).unwrap();
        let batch = Batch::new(&system.operators, &[4]).unwrap();
        let x = batch.gather_rhs(&system.operators);
        let ax = problem
            .apply_lhs(&batch, x.view(), &crate::response::Uncoupled)
            .unwrap();
        let expected: Array2<f64> = system.ediff[0].dot(&x) - 0.3 * &x;
        assert!(ax.abs_diff_eq(&expected, 1e-14));
    }

    #[test]
    fn init_rejects_ediff_of_wrong_size() {
        let system = model_system(2, 2, 1);
        let mut problem = ResponseProblem {
            occupations: Some(system.occupations),
            ..Default::default()
        };
        let ediff = vec![Array2::<f64>::eye(3)];
        assert!(problem.init(&ediff, 0.0, 10, 1e-6).is_err());
    }
}
