use crate::defaults::{DIIS_LIMIT, DIIS_START};
use crate::response::solvers::{
    column_norms, print_solver_end, print_solver_init, print_solver_iteration, residual_summary,
    Batch, ResponseProblem, ResponseSolver,
};
use crate::response::{
    Convergence, FragmentTable, MatVec, Occupations, OperatorSpec, ResponseError,
};
use crate::utils::Timer;
use derive_builder::Builder;
use log::debug;
use ndarray::prelude::*;
use ndarray_linalg::Solve;
use std::collections::VecDeque;

/// Preconditioned Jacobi iterations
///
/// x_(i+1) = x_i + P (V - A x_i)
///
/// accelerated by Pulay's direct inversion in the iterative subspace. All components of
/// all operators (and both spin channels) are extrapolated with one common set of
/// coefficients. The DIIS step is skipped if the DIIS matrix is singular; in that case
/// the plain step is taken and the history is cleared.
#[derive(Builder, Clone, Debug)]
pub struct DiisSolver {
    /// Number of stored steps. Zero gives plain Jacobi iterations.
    #[builder(default = "DIIS_LIMIT")]
    memory: usize,
    /// Minimal number of stored steps before the first extrapolation.
    #[builder(default = "DIIS_START")]
    start: usize,
    #[builder(default, setter(skip))]
    problem: ResponseProblem,
}

impl Default for DiisSolver {
    fn default() -> Self {
        Self {
            memory: DIIS_LIMIT,
            start: DIIS_START,
            problem: ResponseProblem::default(),
        }
    }
}

/// Stored Jacobi steps and their error vectors.
struct DiisHistory {
    memory: usize,
    start: usize,
    steps: VecDeque<(Array2<f64>, Array2<f64>)>,
}

impl DiisHistory {
    fn new(memory: usize, start: usize) -> Self {
        Self {
            memory,
            start: start.max(2),
            steps: VecDeque::with_capacity(memory),
        }
    }

    fn len(&self) -> usize {
        self.steps.len()
    }

    /// Store the step and return the extrapolated vectors.
    fn extrapolate(&mut self, step: Array2<f64>, error: Array2<f64>) -> Array2<f64> {
        if self.memory == 0 {
            return step;
        }
        self.steps.push_back((step, error));
        if self.steps.len() > self.memory {
            self.steps.pop_front();
        }
        let n: usize = self.steps.len();
        let latest: Array2<f64> = self.steps[n - 1].0.clone();
        if n < self.start {
            return latest;
        }

        // B_ij = <e_i|e_j>, bordered by the normalization constraint Σ c_i = 1
        let mut b: Array2<f64> = Array2::from_elem((n + 1, n + 1), -1.0);
        b[[n, n]] = 0.0;
        for i in 0..n {
            for j in 0..=i {
                let bij: f64 = (&self.steps[i].1 * &self.steps[j].1).sum();
                b[[i, j]] = bij;
                b[[j, i]] = bij;
            }
        }
        let scale: f64 = (0..n).map(|i| b[[i, i]]).fold(0.0, f64::max);
        if scale > 0.0 {
            b.slice_mut(s![0..n, 0..n]).mapv_inplace(|x| x / scale);
        }
        let mut rhs: Array1<f64> = Array1::zeros(n + 1);
        rhs[n] = -1.0;

        match b.solve_into(rhs) {
            Ok(c) if c.iter().all(|x| x.is_finite()) => {
                let mut x: Array2<f64> = Array2::zeros(latest.raw_dim());
                for (ci, (step_i, _)) in c.iter().zip(self.steps.iter()) {
                    x.scaled_add(*ci, step_i);
                }
                x
            }
            _ => {
                debug!("DIIS matrix is singular, the history is cleared");
                self.steps.clear();
                latest
            }
        }
    }
}

impl ResponseSolver for DiisSolver {
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

        let g: Array2<f64> = batch.gather_rhs(operators);
        let mut x: Array2<f64> = batch.gather_rsp(operators);
        let mut history = DiisHistory::new(self.memory, self.start);
        let mut norms: Vec<f64> = Vec::new();
        let mut iterations: usize = 0;
        let mut converged: bool = false;

        print_solver_init("DIIS Response Solver", problem.max_iter, batch.ncols(), threshold);
        for iter in 0..=problem.max_iter {
            iterations = iter;
            let r: Array2<f64> = &g - &problem.apply_lhs(&batch, x.view(), matvec)?;
            norms = column_norms(r.view());
            let (n_cvd, total, max) = residual_summary(&norms, threshold);
            print_solver_iteration(iter, n_cvd, norms.len() - n_cvd, history.len(), total, max);
            if n_cvd == norms.len() {
                converged = true;
                break;
            }
            if iter == problem.max_iter {
                break;
            }
            let correction: Array2<f64> = problem.preconditioner.apply(&batch, r.view());
            let step: Array2<f64> = &x + &correction;
            x = history.extrapolate(step, correction);
        }
        print_solver_end("DIIS solver", converged, &timer);

        batch.scatter(x.view(), operators);
        Ok(batch.statuses(operators.len(), &norms, iterations, threshold))
    }
}
