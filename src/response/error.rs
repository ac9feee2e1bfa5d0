use crate::response::Spin;
use std::error;
use std::fmt;
use std::path::PathBuf;

/// Errors of the response orchestration.
///
/// Usage errors (`NoFrequencies`, `NoOperators`) are reported before any matrix is
/// touched. Precondition violations describe a broken caller contract. Numerical and
/// checkpoint errors are raised while the calculation is running.
#[derive(Debug, PartialEq)]
pub enum ResponseError {
    /// The list of frequencies is empty.
    NoFrequencies,
    /// The list of operators is empty.
    NoOperators,
    /// The occupation vector does not have exactly four entries.
    MalformedOccupations(usize),
    /// Only one (restricted) or two (unrestricted) coefficient blocks are supported.
    InvalidChannelCount(usize),
    /// `norb != nocc + nvirt` for one spin channel.
    InconsistentOrbitalCount {
        spin: Spin,
        norb: usize,
        nocc: usize,
        nvirt: usize,
    },
    /// Same number of occupied orbitals in both channels, but different rotation spaces.
    MismatchedRotationSpace { nov_alpha: usize, nov_beta: usize },
    /// An input array does not have the expected dimensions.
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// The fragment occupation table does not add up to the orbital occupations.
    InconsistentFragments(String),
    /// The selected fragment (one-based) does not exist.
    FragmentOutOfRange { index: usize, n_fragments: usize },
    /// A dense linear-algebra operation failed.
    Numerical(String),
    /// Reading or writing a checkpoint file failed.
    Checkpoint {
        path: PathBuf,
        operator: String,
        reason: String,
    },
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrequencies => write!(f, "Supply one or more frequencies."),
            Self::NoOperators => write!(f, "Supply one or more operators."),
            Self::MalformedOccupations(n) => write!(
                f,
                "The occupation vector needs exactly 4 entries [nocc_alph, nvirt_alph, nocc_beta, nvirt_beta], found {}",
                n
            ),
            Self::InvalidChannelCount(n) => write!(
                f,
                "The MO coefficients need 1 or 2 spin channels, found {}",
                n
            ),
            Self::InconsistentOrbitalCount {
                spin,
                norb,
                nocc,
                nvirt,
            } => write!(
                f,
                "{} channel: norb ({}) != nocc ({}) + nvirt ({})",
                spin, norb, nocc, nvirt
            ),
            Self::MismatchedRotationSpace {
                nov_alpha,
                nov_beta,
            } => write!(
                f,
                "nocc_alph == nocc_beta but nov_alph ({}) != nov_beta ({})",
                nov_alpha, nov_beta
            ),
            Self::ShapeMismatch {
                what,
                expected,
                found,
            } => write!(
                f,
                "Shape of {} is {:?}, expected {:?}",
                what, found, expected
            ),
            Self::InconsistentFragments(msg) => {
                write!(f, "Inconsistent fragment occupations: {}", msg)
            }
            Self::FragmentOutOfRange { index, n_fragments } => write!(
                f,
                "Fragment {} was requested, but only {} fragments are defined",
                index, n_fragments
            ),
            Self::Numerical(msg) => write!(f, "Numerical failure: {}", msg),
            Self::Checkpoint {
                path,
                operator,
                reason,
            } => write!(
                f,
                "Checkpoint file {} of operator '{}': {}",
                path.display(),
                operator,
                reason
            ),
        }
    }
}

impl error::Error for ResponseError {}

impl From<ndarray_linalg::error::LinalgError> for ResponseError {
    fn from(err: ndarray_linalg::error::LinalgError) -> Self {
        Self::Numerical(err.to_string())
    }
}
