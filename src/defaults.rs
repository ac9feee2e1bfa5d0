use crate::io::settings::ReadMode;
use crate::response::solvers::SolverKind;

// config file
pub const CONFIG_FILE_NAME: &str = "linresp.toml";
// input file of the binary, read if no path is given on the command line
pub const INPUT_FILE_NAME: &str = "response.toml";

// PRINTING
// 0: quiet, 1: settings and tensors, >= 10: all intermediate matrices
pub const PRINT_LEVEL: i32 = 1;
pub const PRINT_LEVEL_VERBOSE: i32 = 10;

// SOLVER
pub const SOLVER: SolverKind = SolverKind::Diis;
// stop the response iterations after maxiter iterations
pub const MAX_ITER: usize = 60;
// convergence threshold of the residual norm is 10^(-CONV)
pub const CONV: i32 = 5;
pub const HAMILTONIAN: &str = "rpa";
pub const SPIN: &str = "singlet";

// number of stored trial vectors for the DIIS extrapolation
pub const DIIS_LIMIT: usize = 8;
// the DIIS extrapolation is started from this iteration on
pub const DIIS_START: usize = 2;
// maximum number of subspace vectors per right-hand side before the
// Krylov subspace is collapsed
pub const KRYLOV_SUBSPACE_MULTIPLIER: usize = 20;
// new subspace vectors with a smaller norm after orthogonalization are dropped
pub const KRYLOV_ORTH_THRESHOLD: f64 = 1.0e-10;
// denominators of the diagonal preconditioner smaller than this value are replaced by 1.0
pub const PRECONDITIONER_CUTOFF: f64 = 1.0e-4;

// FRAGMENTS AND MASKING
pub const DO_ORTHOGONALIZATION_CANONICAL: bool = false;
pub const FRGM_RESPONSE_IDX: usize = 0;
pub const MASK_EDIFF_MO: bool = false;
// diagonal of the masked energy differences for rotations outside of the active space
pub const MASK_EDIFF_SENTINEL: f64 = 1.0e10;
pub const MASK_FORM_RESULTS_MO: bool = false;

// CHECKPOINTS
pub const SAVE_LEVEL: u8 = 0;
pub const READ_MODE: ReadMode = ReadMode::Compute;
pub const PREFIX: &str = "";
pub const CHECKPOINT_SUFFIX: &str = ".dat";

// PARALLELIZATION
pub const NUMBER_OF_CORES: usize = 1;
