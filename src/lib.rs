//! Frequency-dependent linear response of (possibly non-orthogonal,
//! fragment-localized) reference states.
//!
//! The entry point is [solve_linear_response](response::solve_linear_response), which
//! builds the uncoupled energy-difference operators, forms the property gradients and
//! drives an iterative [ResponseSolver](response::ResponseSolver) over all frequencies.

pub mod defaults;
pub mod io;
pub mod response;
pub mod utils;
