/*!

# Minimal-residual Krylov subspace solver

The correction d = x - x_0 of all response vectors is expanded in an orthonormal
subspace V that grows by the preconditioned residuals of the unconverged vectors.
The products A V are cached, so every subspace vector is multiplied only once. In
every iteration the subspace problem

min_y || r_0 - (A V) y ||

is solved in the least-squares sense, which does not require a symmetric A. If the
subspace exceeds its maximal size it is collapsed: the current solution becomes the
new starting point x_0 and the subspace is rebuilt from the current residuals.

 */

use crate::defaults::{KRYLOV_ORTH_THRESHOLD, KRYLOV_SUBSPACE_MULTIPLIER};
use crate::response::solvers::{
    column_norms, print_solver_end, print_solver_init, print_solver_iteration, residual_summary,
    Batch, ResponseProblem, ResponseSolver,
};
use crate::response::{
    Convergence, FragmentTable, MatVec, Occupations, OperatorSpec, ResponseError,
};
use crate::utils::Timer;
use derive_builder::Builder;
use log::{debug, warn};
use ndarray::prelude::*;
use ndarray_linalg::{LeastSquaresSvd, Norm};

#[derive(Builder, Clone, Debug)]
pub struct KrylovSolver {
    /// The subspace is collapsed if it holds more than `subspace_multiplier` vectors per
    /// response vector.
    #[builder(default = "KRYLOV_SUBSPACE_MULTIPLIER")]
    subspace_multiplier: usize,
    /// Expansion vectors with a smaller norm after orthogonalization are dropped.
    #[builder(default = "KRYLOV_ORTH_THRESHOLD")]
    orth_threshold: f64,
    #[builder(default, setter(skip))]
    problem: ResponseProblem,
}

impl Default for KrylovSolver {
    fn default() -> Self {
        Self {
            subspace_multiplier: KRYLOV_SUBSPACE_MULTIPLIER,
            orth_threshold: KRYLOV_ORTH_THRESHOLD,
            problem: ResponseProblem::default(),
        }
    }
}

/// Orthonormal subspace together with the cached products A V.
struct Subspace {
    vectors: Array2<f64>,
    products: Array2<f64>,
}

impl Subspace {
    fn empty(dim: usize) -> Self {
        Self {
            vectors: Array2::zeros((dim, 0)),
            products: Array2::zeros((dim, 0)),
        }
    }

    fn size(&self) -> usize {
        self.vectors.ncols()
    }

    /// Orthonormalize the candidates against the subspace and against each other. Returns
    /// the accepted vectors.
    fn orthonormalize(&self, candidates: ArrayView2<f64>, threshold: f64) -> Array2<f64> {
        let mut accepted: Array2<f64> = Array2::zeros((candidates.nrows(), 0));
        for vec in candidates.axis_iter(Axis(1)) {
            let mut v: Array1<f64> = vec.to_owned();
            let norm_in: f64 = v.norm_l2();
            if norm_in == 0.0 {
                continue;
            }
            v /= norm_in;
            // twice is enough
            for _ in 0..2 {
                v = &v - &self.vectors.dot(&self.vectors.t().dot(&v));
                v = &v - &accepted.dot(&accepted.t().dot(&v));
            }
            let norm: f64 = v.norm_l2();
            if norm > threshold {
                // push_column only fails for a wrong length
                if accepted.push_column((&v / norm).view()).is_err() {
                    continue;
                }
            }
        }
        accepted
    }

    fn extend(&mut self, vectors: ArrayView2<f64>, products: ArrayView2<f64>) {
        for (v, av) in vectors.axis_iter(Axis(1)).zip(products.axis_iter(Axis(1))) {
            if self.vectors.push_column(v).is_ok() {
                let _ = self.products.push_column(av);
            }
        }
    }
}

impl ResponseSolver for KrylovSolver {
    fn set_orbital_occupations(&mut self, occupations: Occupations) {
        self.problem.occupations = Some(occupations);
    }

    fn set_fragment_occupations(&mut self, fragments: &FragmentTable) {
        self.problem.fragments = fragments.clone();
    }

    fn init(
        &mut self,
        ediff: &[Array2<f64>],
        frequency: f64,
        max_iter: usize,
        threshold: f64,
    ) -> Result<(), ResponseError> {
        self.problem.init(ediff, frequency, max_iter, threshold)
    }

    fn run(
        &mut self,
        operators: &mut [OperatorSpec],
        matvec: &dyn MatVec,
    ) -> Result<Vec<Convergence>, ResponseError> {
        let timer: Timer = Timer::start();
        let problem: &ResponseProblem = &self.problem;
        let nov: Vec<usize> = problem.ediff.iter().map(|e| e.nrows()).collect();
        let batch: Batch = Batch::new(operators, &nov)?;
        let threshold: f64 = problem.threshold;
        if batch.ncols() == 0 {
            return Ok(batch.statuses(operators.len(), &[], 0, threshold));
        }
        let max_space: usize = (self.subspace_multiplier * batch.ncols()).max(batch.ncols());

        let g: Array2<f64> = batch.gather_rhs(operators);
        let mut x0: Array2<f64> = batch.gather_rsp(operators);
        let mut r0: Array2<f64> = &g - &problem.apply_lhs(&batch, x0.view(), matvec)?;
        let mut x: Array2<f64> = x0.clone();
        let mut r: Array2<f64> = r0.clone();
        let mut subspace = Subspace::empty(batch.dim());
        let mut norms: Vec<f64> = column_norms(r.view());
        let mut iterations: usize = 0;
        let mut converged: bool = false;

        print_solver_init("Krylov Response Solver", problem.max_iter, batch.ncols(), threshold);
        for iter in 0..=problem.max_iter {
            iterations = iter;
            let (n_cvd, total, max) = residual_summary(&norms, threshold);
            let n_lft: usize = norms.len() - n_cvd;
            print_solver_iteration(iter, n_cvd, n_lft, subspace.size(), total, max);
            if n_lft == 0 {
                converged = true;
                break;
            }
            if iter == problem.max_iter {
                break;
            }

            if subspace.size() + n_lft > max_space {
                debug!("collapse of the Krylov subspace of dimension {}", subspace.size());
                x0 = x.clone();
                r0 = r.clone();
                subspace = Subspace::empty(batch.dim());
            }

            // preconditioned residuals of the unconverged vectors
            let unconverged: Vec<usize> = norms
                .iter()
                .enumerate()
                .filter(|(_, &norm)| norm >= threshold)
                .map(|(idx, _)| idx)
                .collect();
            let residuals: Array2<f64> = r.select(Axis(1), &unconverged);
            let candidates: Array2<f64> = problem.preconditioner.apply(&batch, residuals.view());
            let new_vectors: Array2<f64> =
                subspace.orthonormalize(candidates.view(), self.orth_threshold);
            if new_vectors.ncols() == 0 {
                warn!("The Krylov subspace can not be extended any more.");
                break;
            }
            let new_products: Array2<f64> = problem.apply_lhs(&batch, new_vectors.view(), matvec)?;
            subspace.extend(new_vectors.view(), new_products.view());

            let y: Array2<f64> = subspace.products.least_squares(&r0)?.solution;
            x = &x0 + &subspace.vectors.dot(&y);
            r = &r0 - &subspace.products.dot(&y);
            norms = column_norms(r.view());
        }
        print_solver_end("Krylov solver", converged, &timer);

        batch.scatter(x.view(), operators);
        Ok(batch.statuses(operators.len(), &norms, iterations, threshold))
    }
}
