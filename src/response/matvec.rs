use crate::response::ediff::check_shape;
use crate::response::ResponseError;
use ndarray::prelude::*;
use ndarray::Data;

/// Abstract trait for the orbital-Hessian coupling G(X) of the response equations
///
/// (ediff - ω) X + G(X) = V
///
/// Implementations compute the coupling products without storing the Hessian. The
/// uncoupled part (ediff - ω) X is handled by the solvers.
pub trait MatVec {
    /// Compute the coupling products of the trial vectors. `trial` holds one
    /// `[nov_s, nvec]` block per spin channel and the products are returned in the same
    /// layout and order. The products only depend on the trial vectors and the frequency.
    fn compute_products(
        &self,
        trial: &[ArrayView2<f64>],
        frequency: f64,
    ) -> Result<Vec<Array2<f64>>, ResponseError>;
}

/// No coupling at all: the solution is the uncoupled response.
#[derive(Copy, Clone, Debug, Default)]
pub struct Uncoupled;

impl MatVec for Uncoupled {
    fn compute_products(
        &self,
        trial: &[ArrayView2<f64>],
        _frequency: f64,
    ) -> Result<Vec<Array2<f64>>, ResponseError> {
        Ok(trial.iter().map(|x| Array2::zeros(x.raw_dim())).collect())
    }
}

/// A dense, frequency independent coupling matrix that is applied to every spin
/// channel. The channels are not coupled to each other.
impl<S> MatVec for ArrayBase<S, Ix2>
where
    S: Data<Elem = f64>,
{
    fn compute_products(
        &self,
        trial: &[ArrayView2<f64>],
        _frequency: f64,
    ) -> Result<Vec<Array2<f64>>, ResponseError> {
        trial
            .iter()
            .map(|x| {
                check_shape(
                    "trial vectors of the coupling matrix",
                    &[self.ncols(), x.ncols()],
                    x.shape(),
                )?;
                Ok(self.dot(x))
            })
            .collect()
    }
}
