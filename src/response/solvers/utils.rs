/*!

## Preconditioner and printing helpers shared by the response solvers

 */

use crate::defaults::PRECONDITIONER_CUTOFF;
use crate::response::indices::make_indices_mo_restricted;
use crate::response::solvers::Batch;
use crate::response::{ActiveSpace, FragmentTable, PairScope, Spin};
use crate::utils::Timer;
use log::{debug, info};
use ndarray::prelude::*;
use ndarray_linalg::Inverse;

/// Approximate inverse of (ediff - ω) for one spin channel.
#[derive(Clone, Debug, Default)]
struct ChannelPreconditioner {
    /// 1 / (ediff_(ia,ia) - ω)
    diagonal: Array1<f64>,
    /// Rotations of one fragment and the inverse of their block of (ediff - ω).
    blocks: Vec<(Vec<usize>, Array2<f64>)>,
}

impl ChannelPreconditioner {
    fn new(ediff: &Array2<f64>, frequency: f64, groups: &[ActiveSpace]) -> Self {
        let diagonal: Array1<f64> = ediff.diag().mapv(|d| {
            let shifted: f64 = d - frequency;
            if shifted.abs() < PRECONDITIONER_CUTOFF {
                1.0
            } else {
                1.0 / shifted
            }
        });

        let mut blocks: Vec<(Vec<usize>, Array2<f64>)> = Vec::with_capacity(groups.len());
        for group in groups.iter().filter(|group| group.len() > 1) {
            let idx: &[usize] = group.indices();
            let mut block: Array2<f64> = ediff.select(Axis(0), idx).select(Axis(1), idx);
            block.diag_mut().mapv_inplace(|d| d - frequency);
            match block.inv() {
                Ok(inverse) => blocks.push((idx.to_vec(), inverse)),
                Err(err) => debug!(
                    "singular fragment block of dimension {} ({}), diagonal preconditioner is used",
                    idx.len(),
                    err
                ),
            }
        }
        Self { diagonal, blocks }
    }

    fn apply(&self, r: ArrayView2<f64>) -> Array2<f64> {
        let mut z: Array2<f64> = &r * &self.diagonal.view().insert_axis(Axis(1));
        for (idx, inverse) in self.blocks.iter() {
            let r_frgm: Array2<f64> = r.select(Axis(0), idx);
            let z_frgm: Array2<f64> = inverse.dot(&r_frgm);
            for (&row, z_row) in idx.iter().zip(z_frgm.outer_iter()) {
                z.row_mut(row).assign(&z_row);
            }
        }
        z
    }
}

/// Preconditioner of the response equations. Without fragments it is the inverse of
/// the (shifted) diagonal of ediff. With fragments the local-occupied x local-virtual
/// block of every fragment is inverted exactly.
#[derive(Clone, Debug, Default)]
pub struct Preconditioner {
    channels: Vec<ChannelPreconditioner>,
}

impl Preconditioner {
    pub fn new(ediff: &[Array2<f64>], frequency: f64, fragments: &FragmentTable) -> Self {
        let channels: Vec<ChannelPreconditioner> = Spin::channels(ediff.len())
            .iter()
            .zip(ediff.iter())
            .map(|(&spin, ediff_s)| {
                let mut groups: Vec<ActiveSpace> = if fragments.is_empty() {
                    Vec::new()
                } else {
                    make_indices_mo_restricted(fragments, spin, PairScope::LocalVirtual)
                };
                // a table that does not describe this rotation space is not used
                if groups.iter().any(|group| group.dim() != ediff_s.nrows()) {
                    groups.clear();
                }
                ChannelPreconditioner::new(ediff_s, frequency, &groups)
            })
            .collect();
        Self { channels }
    }

    /// Apply the preconditioner to combined residual vectors.
    pub fn apply(&self, batch: &Batch, r: ArrayView2<f64>) -> Array2<f64> {
        let mut z: Array2<f64> = Array2::zeros(r.raw_dim());
        for (idx, (channel, r_s)) in self.channels.iter().zip(batch.split(r)).enumerate() {
            z.slice_mut(s![batch.rows(idx), ..]).assign(&channel.apply(r_s));
        }
        z
    }
}

pub fn print_solver_init(name: &str, max_iter: usize, nvec: usize, tolerance: f64) {
    info!("{:^80}", "");
    info!("{: ^80}", name);
    info!("{:-^80}", "");
    info!(
        "{: <25} {:4.2e}",
        "Response vectors are converged when residual is below:", tolerance
    );
    info!("{: <25} {}", "Maximum number of iterations:", max_iter);
    if nvec == 1 {
        info!("{: >4} {: <25}", nvec, " Response vector will be computed.");
    } else {
        info!("{: >4} {: <25}", nvec, " Response vectors will be computed.");
    }
    info!("{:-^75} ", "");
    info!(
        "{: <5}{: >14}{: >14}{: >14}{: >14}{: >14}",
        "Iter.", "Vecs. conv.", "Vecs. left", "#subsp. Vec.", "Total dev.", "Max dev."
    );
    info!("{:-^75} ", "");
}

pub fn print_solver_iteration(
    iter: usize,
    n_cvd: usize,
    n_lft: usize,
    nsub: usize,
    t_dev: f64,
    max_dev: f64,
) {
    info!(
        "{: >5}{:>14}{:>14}{:>14}{:>14.8}{:>14.8}",
        iter, n_cvd, n_lft, nsub, t_dev, max_dev
    );
}

pub fn print_solver_end(name: &str, converged: bool, timer: &Timer) {
    info!("{:-^75} ", "");
    if converged {
        info!("{} converged", name)
    } else {
        info!("{} did not converge!", name)
    }
    info!("{}", timer);
    info!("{:-^80}", "");
    info!("{:^80}", "");
}

/// Number of converged columns, the sum and the maximum of the residual norms.
pub fn residual_summary(norms: &[f64], tolerance: f64) -> (usize, f64, f64) {
    let n_cvd: usize = norms.iter().filter(|&&x| x < tolerance).count();
    let total: f64 = norms.iter().sum();
    let max: f64 = norms.iter().copied().fold(0.0, f64::max);
    (n_cvd, total, max)
}
