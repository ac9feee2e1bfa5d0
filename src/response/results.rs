use crate::response::{ActiveSpace, OperatorSpec};
use ndarray::prelude::*;
use serde::Serialize;

/// Outcome of the iterative solution for one operator at one frequency.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub enum Convergence {
    Converged { iterations: usize, residual: f64 },
    NotConverged { iterations: usize, residual: f64 },
    /// The operator does not take part in the iterations (`do_response = false`).
    Skipped,
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        !matches!(self, Convergence::NotConverged { .. })
    }
}

/// The response tensor `[property component, response component, frequency]` together
/// with the convergence status of every operator at every frequency.
#[derive(Clone, Debug)]
pub struct ResponseResults {
    pub tensor: Array3<f64>,
    pub frequencies: Vec<f64>,
    /// One entry per frequency, one status per operator.
    pub convergence: Vec<Vec<Convergence>>,
}

impl ResponseResults {
    /// True if no operator failed to converge at any frequency.
    pub fn converged(&self) -> bool {
        self.convergence
            .iter()
            .all(|statuses| statuses.iter().all(Convergence::is_converged))
    }

    /// The tensor of one frequency.
    pub fn at(&self, freq_idx: usize) -> ArrayView2<'_, f64> {
        self.tensor.index_axis(Axis(2), freq_idx)
    }
}

/// Total number of components of all operators.
pub fn total_components(operators: &[OperatorSpec]) -> usize {
    operators.iter().map(OperatorSpec::n_components).sum()
}

fn stacked_columns(vecs: &[&Array2<f64>], active: Option<&ActiveSpace>) -> Array2<f64> {
    let nrows: usize = vecs.first().map_or(0, |v| v.nrows());
    let ncols: usize = vecs.iter().map(|v| v.ncols()).sum();
    let mut stacked: Array2<f64> = Array2::zeros((nrows, ncols));
    let mut start: usize = 0;
    for v in vecs.iter() {
        stacked
            .slice_mut(s![.., start..(start + v.ncols())])
            .assign(*v);
        start += v.ncols();
    }
    match active {
        Some(active) => stacked.select(Axis(0), active.indices()),
        None => stacked,
    }
}

/// The response tensors of every spin channel, shape `[ncomp_tot, ncomp_tot, nden]`:
///
/// T_s[p, q] = <g_p, x_q>
///
/// where p and q run over all components of all operators. If `active` is given the
/// vectors are restricted to the active rotations before the contraction.
pub fn form_results(
    operators: &[OperatorSpec],
    nden: usize,
    active: Option<&[ActiveSpace]>,
) -> Array3<f64> {
    let ncomp_tot: usize = total_components(operators);
    let mut tensors: Array3<f64> = Array3::zeros((ncomp_tot, ncomp_tot, nden));
    for (idx, mut tensor) in tensors.axis_iter_mut(Axis(2)).enumerate() {
        let rhs: Vec<&Array2<f64>> = operators.iter().map(|op| &op.rhsvecs[idx]).collect();
        let rsp: Vec<&Array2<f64>> = operators.iter().map(|op| &op.rspvecs[idx]).collect();
        let space: Option<&ActiveSpace> = active.map(|spaces| &spaces[idx]);
        let g: Array2<f64> = stacked_columns(&rhs, space);
        let x: Array2<f64> = stacked_columns(&rsp, space);
        tensor.assign(&g.t().dot(&x));
    }
    tensors
}

/// Closed-shell results are the alpha tensor, open-shell results 2 (alpha + beta).
pub fn combine_channels(tensors: ArrayView3<f64>) -> Array2<f64> {
    match tensors.dim().2 {
        1 => tensors.index_axis(Axis(2), 0).to_owned(),
        _ => 2.0 * (&tensors.index_axis(Axis(2), 0) + &tensors.index_axis(Axis(2), 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray_linalg::generate::random;

    fn operator_with_vectors(label: &str, ncomp: usize, nov: usize, nden: usize) -> OperatorSpec {
        let mut op = OperatorSpec::new(label, Array3::zeros((ncomp, 2, 2)), true);
        op.rhsvecs = (0..nden).map(|_| random((nov, ncomp))).collect();
        op.rspvecs = (0..nden).map(|_| random((nov, ncomp))).collect();
        op
    }

    #[test]
    fn tensor_covers_all_components_of_all_operators() {
        let ops = vec![
            operator_with_vectors("dipole", 3, 6, 1),
            operator_with_vectors("quadrupole", 6, 6, 1),
        ];
        let tensors = form_results(&ops, 1, None);
        assert_eq!(tensors.dim(), (9, 9, 1));
        // <g of quadrupole component 2, x of dipole component 1>
        let expected: f64 = ops[1].rhsvecs[0].column(2).dot(&ops[0].rspvecs[0].column(1));
        assert_abs_diff_eq!(tensors[[5, 1, 0]], expected, epsilon = 1e-12);
    }

    #[test]
    fn identical_channels_give_four_times_alpha() {
        let mut op = operator_with_vectors("dipole", 3, 4, 1);
        op.rhsvecs.push(op.rhsvecs[0].clone());
        op.rspvecs.push(op.rspvecs[0].clone());
        let ops = vec![op];
        let tensors = form_results(&ops, 2, None);
        let combined = combine_channels(tensors.view());
        let alpha = tensors.index_axis(Axis(2), 0).to_owned();
        assert!(combined.abs_diff_eq(&(4.0 * &alpha), 1e-12));
        let single = combine_channels(form_results(&ops[..], 1, None).view());
        assert!(single.abs_diff_eq(&alpha, 1e-12));
    }

    #[test]
    fn masked_results_only_contract_active_rotations() {
        let ops = vec![operator_with_vectors("dipole", 3, 6, 1)];
        let active = [ActiveSpace::new(6, vec![1, 4])];
        let tensors = form_results(&ops, 1, Some(&active));
        let g = &ops[0].rhsvecs[0];
        let x = &ops[0].rspvecs[0];
        let expected: f64 = g[[1, 0]] * x[[1, 2]] + g[[4, 0]] * x[[4, 2]];
        assert_abs_diff_eq!(tensors[[0, 2, 0]], expected, epsilon = 1e-12);
    }

    #[test]
    fn not_converged_status_is_reported() {
        let results = ResponseResults {
            tensor: Array3::zeros((3, 3, 2)),
            frequencies: vec![0.0, 0.1],
            convergence: vec![
                vec![Convergence::Converged {
                    iterations: 3,
                    residual: 1e-7,
                }],
                vec![Convergence::NotConverged {
                    iterations: 60,
                    residual: 1e-2,
                }],
            ],
        };
        assert!(!results.converged());
        assert!(Convergence::Skipped.is_converged());
    }
}
