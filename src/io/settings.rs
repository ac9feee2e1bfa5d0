use crate::defaults::*;
use crate::response::solvers::SolverKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fs;
use std::path::Path;

fn default_print_level() -> i32 {
    PRINT_LEVEL
}
fn default_solver() -> SolverKind {
    SOLVER
}
fn default_maxiter() -> usize {
    MAX_ITER
}
fn default_conv() -> i32 {
    CONV
}
fn default_hamiltonian() -> String {
    String::from(HAMILTONIAN)
}
fn default_spin() -> String {
    String::from(SPIN)
}
fn default_do_orthogonalization_canonical() -> bool {
    DO_ORTHOGONALIZATION_CANONICAL
}
fn default_frgm_response_idx() -> usize {
    FRGM_RESPONSE_IDX
}
fn default_mask_ediff_mo() -> bool {
    MASK_EDIFF_MO
}
fn default_mask_ediff_sentinel() -> f64 {
    MASK_EDIFF_SENTINEL
}
fn default_mask_form_results_mo() -> bool {
    MASK_FORM_RESULTS_MO
}
fn default_save() -> u8 {
    SAVE_LEVEL
}
fn default_read() -> ReadMode {
    READ_MODE
}
fn default_prefix() -> String {
    String::from(PREFIX)
}

/// Source of the response vectors that start the iterations.
#[derive(Serialize_repr, Deserialize_repr, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadMode {
    /// The uncoupled result is used as the guess.
    Compute = 0,
    /// Converged response vectors are read in the MO basis.
    MolecularOrbital = 1,
    /// Converged response vectors are read in the AO basis and transformed to the MO basis.
    AtomicOrbital = 2,
}

/// Settings of the response calculation. The names of the keys follow the names
/// of the options in the configuration file; options with a leading underscore are
/// meant for fragment-based and debugging calculations.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResponseConfig {
    #[serde(default = "default_print_level")]
    pub print_level: i32,
    #[serde(default = "default_solver")]
    pub solver: SolverKind,
    #[serde(default = "default_maxiter")]
    pub maxiter: usize,
    /// The residual threshold is 10^(-conv).
    #[serde(default = "default_conv")]
    pub conv: i32,
    #[serde(default = "default_hamiltonian")]
    pub hamiltonian: String,
    #[serde(default = "default_spin")]
    pub spin: String,
    #[serde(
        rename = "_do_orthogonalization_canonical",
        default = "default_do_orthogonalization_canonical"
    )]
    pub do_orthogonalization_canonical: bool,
    /// 0: pooled fragments, k > 0: only the (one-based) fragment k.
    #[serde(
        rename = "_frgm_response_idx",
        default = "default_frgm_response_idx"
    )]
    pub frgm_response_idx: usize,
    #[serde(rename = "_mask_ediff_mo", default = "default_mask_ediff_mo")]
    pub mask_ediff_mo: bool,
    /// Diagonal of the excluded rotations in the masked energy differences. A large
    /// value decouples these rotations from the response.
    #[serde(
        rename = "_mask_ediff_sentinel",
        default = "default_mask_ediff_sentinel"
    )]
    pub mask_ediff_sentinel: f64,
    #[serde(
        rename = "_mask_form_results_mo",
        default = "default_mask_form_results_mo"
    )]
    pub mask_form_results_mo: bool,
    /// 0: nothing is written, >= 1: MO quantities, >= 2: also AO response vectors.
    #[serde(default = "default_save")]
    pub save: u8,
    #[serde(default = "default_read")]
    pub read: ReadMode,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            print_level: default_print_level(),
            solver: default_solver(),
            maxiter: default_maxiter(),
            conv: default_conv(),
            hamiltonian: default_hamiltonian(),
            spin: default_spin(),
            do_orthogonalization_canonical: default_do_orthogonalization_canonical(),
            frgm_response_idx: default_frgm_response_idx(),
            mask_ediff_mo: default_mask_ediff_mo(),
            mask_ediff_sentinel: default_mask_ediff_sentinel(),
            mask_form_results_mo: default_mask_form_results_mo(),
            save: default_save(),
            read: default_read(),
            prefix: default_prefix(),
        }
    }
}

impl ResponseConfig {
    /// Read the configuration file. If it does not exist the default settings are used
    /// and written to the file, so that the user can see all the used options.
    pub fn new(path: &Path) -> Result<Self> {
        if path.exists() {
            let config_string: String = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config file {}", path.display()))?;
            Self::from_toml(&config_string)
                .with_context(|| format!("Invalid config file {}", path.display()))
        } else {
            let config = Self::default();
            let config_string: String =
                toml::to_string(&config).context("Unable to serialize the configuration")?;
            fs::write(path, config_string)
                .with_context(|| format!("Unable to write config file {}", path.display()))?;
            Ok(config)
        }
    }

    pub fn from_toml(config_string: &str) -> Result<Self> {
        toml::from_str(config_string).context("Could not parse the response configuration")
    }

    /// Convergence threshold of the residual norm.
    pub fn threshold(&self) -> f64 {
        10.0_f64.powi(-self.conv)
    }
}
