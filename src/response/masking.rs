use crate::response::ediff::check_shape;
use crate::response::{ActiveSpace, ResponseError};
use ndarray::prelude::*;

/// What happens to the diagonal elements of rotations outside of the active space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DiagonalPolicy {
    /// Treated like the off-diagonal elements.
    Fill,
    /// The original diagonal is kept, so a masked energy-difference operator stays
    /// invertible when it is used as a denominator.
    Keep,
    /// The diagonal is set to the given value.
    Sentinel(f64),
}

/// Copy of the square matrix `mat` in which every element whose row or column lies
/// outside of `active` is replaced by `fill_value`. The diagonal of the excluded
/// rotations follows `policy`. The matrix has to span the full rotation space of `active`.
pub fn make_masked_mat(
    mat: ArrayView2<f64>,
    active: &ActiveSpace,
    fill_value: f64,
    policy: DiagonalPolicy,
) -> Result<Array2<f64>, ResponseError> {
    check_shape(
        "masked matrix",
        &[active.dim(), active.dim()],
        mat.shape(),
    )?;
    let mask: Vec<bool> = active.mask();

    let mut masked: Array2<f64> = Array2::from_elem(mat.raw_dim(), fill_value);
    for &i in active.indices().iter() {
        for &j in active.indices().iter() {
            masked[[i, j]] = mat[[i, j]];
        }
    }
    for (idx, _) in mask.iter().enumerate().filter(|(_, &is_active)| !is_active) {
        masked[[idx, idx]] = match policy {
            DiagonalPolicy::Fill => fill_value,
            DiagonalPolicy::Keep => mat[[idx, idx]],
            DiagonalPolicy::Sentinel(value) => value,
        };
    }
    Ok(masked)
}
