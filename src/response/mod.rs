use std::fmt;

pub mod driver;
pub mod ediff;
pub mod error;
pub mod indices;
pub mod logging;
pub mod masking;
pub mod matvec;
pub mod occupations;
pub mod operator;
pub mod results;
pub mod solvers;

pub use driver::{solve_linear_response, ReferenceState};
pub use ediff::{form_ediff_terms, form_ediff_terms_orthogonal, pinv, MoBasis};
pub use error::ResponseError;
pub use indices::{ActiveSpace, PairScope};
pub use masking::{make_masked_mat, DiagonalPolicy};
pub use matvec::{MatVec, Uncoupled};
pub use occupations::{FragmentTable, Occupations};
pub use operator::OperatorSpec;
pub use results::{Convergence, ResponseResults};
pub use solvers::{build_solver, ResponseSolver, SolverKind};

/// The two spin channels of an unrestricted reference. A restricted (closed-shell)
/// reference only uses `Spin::Alpha`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Spin {
    Alpha,
    Beta,
}

impl Spin {
    /// The spin channels that are present for `nden` coefficient blocks.
    pub fn channels(nden: usize) -> &'static [Spin] {
        match nden {
            1 => &[Spin::Alpha],
            _ => &[Spin::Alpha, Spin::Beta],
        }
    }

    /// Position of the channel in all per-channel containers.
    pub fn index(self) -> usize {
        match self {
            Spin::Alpha => 0,
            Spin::Beta => 1,
        }
    }

    /// Tag used in checkpoint file names.
    pub fn tag(self) -> &'static str {
        match self {
            Spin::Alpha => "alph",
            Spin::Beta => "beta",
        }
    }
}

impl fmt::Display for Spin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spin::Alpha => write!(f, "alpha"),
            Spin::Beta => write!(f, "beta"),
        }
    }
}

/// Representation in which response vectors are stored on disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Basis {
    /// Flattened occupied-virtual MO vectors, shape `[nocc * nvirt, ncomp]`.
    Mo,
    /// AO matrices, shape `[ncomp, nbasis, nbasis]`.
    Ao,
}

impl Basis {
    pub fn tag(self) -> &'static str {
        match self {
            Basis::Mo => "mo",
            Basis::Ao => "ao",
        }
    }
}
