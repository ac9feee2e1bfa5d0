use crate::defaults::{CONFIG_FILE_NAME, NUMBER_OF_CORES};
use crate::io::settings::ResponseConfig;
use crate::response::{FragmentTable, OperatorSpec};
use anyhow::{Context, Result};
use ndarray::prelude::*;
use ndarray_npy::read_npy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

fn default_do_response() -> bool {
    true
}
fn default_number_of_cores() -> usize {
    NUMBER_OF_CORES
}

/// One property operator of the input file. The AO integrals are stored as a
/// `[ncomp, nbasis, nbasis]` .npy file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OperatorInput {
    pub label: String,
    pub integrals: PathBuf,
    #[serde(default = "default_do_response")]
    pub do_response: bool,
}

/// Description of a response calculation. All arrays are .npy files, relative paths are
/// relative to the directory of the input file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InputConfig {
    pub frequencies: Vec<f64>,
    /// `[nocc_alph, nvirt_alph, nocc_beta, nvirt_beta]`
    pub occupations: Vec<usize>,
    /// Rows `[fragment id, norb, nocc_alph, nocc_beta]`.
    #[serde(default)]
    pub fragments: Vec<[usize; 4]>,
    /// MO coefficients `[nden, nbasis, norb]`.
    pub coefficients: PathBuf,
    /// AO Fock matrices `[nden, nbasis, nbasis]`.
    pub fock: PathBuf,
    /// AO overlap `[nbasis, nbasis]`.
    pub overlap: PathBuf,
    /// Dense coupling matrix `[nov, nov]`; without it the uncoupled response is computed.
    #[serde(default)]
    pub hessian: Option<PathBuf>,
    pub operators: Vec<OperatorInput>,
    #[serde(default = "default_number_of_cores")]
    pub number_of_cores: usize,
}

/// The arrays of a response calculation.
pub struct InputData {
    pub frequencies: Vec<f64>,
    pub occupations: Vec<usize>,
    pub fragments: FragmentTable,
    pub coefficients: Array3<f64>,
    pub fock: Array3<f64>,
    pub overlap: Array2<f64>,
    pub hessian: Option<Array2<f64>>,
    pub operators: Vec<OperatorSpec>,
    pub number_of_cores: usize,
}

fn load<T: ndarray_npy::ReadNpyExt>(base: &Path, file: &Path) -> Result<T> {
    let path: PathBuf = base.join(file);
    read_npy(&path).with_context(|| format!("Unable to read array from {}", path.display()))
}

impl InputConfig {
    pub fn from_toml(input_string: &str) -> Result<Self> {
        toml::from_str(input_string).context("Could not parse the input file")
    }

    /// Read all arrays, `base` is the directory of the input file.
    pub fn load_data(&self, base: &Path) -> Result<InputData> {
        let fragments: FragmentTable =
            FragmentTable::from_rows(&self.fragments).context("Invalid fragment table")?;
        let mut operators: Vec<OperatorSpec> = Vec::with_capacity(self.operators.len());
        for op in self.operators.iter() {
            let integrals: Array3<f64> = load(base, &op.integrals)?;
            operators.push(OperatorSpec::new(&op.label, integrals, op.do_response));
        }
        let hessian: Option<Array2<f64>> = match self.hessian.as_ref() {
            Some(file) => Some(load(base, file)?),
            None => None,
        };
        Ok(InputData {
            frequencies: self.frequencies.clone(),
            occupations: self.occupations.clone(),
            fragments,
            coefficients: load(base, &self.coefficients)?,
            fock: load(base, &self.fock)?,
            overlap: load(base, &self.overlap)?,
            hessian,
            operators,
            number_of_cores: self.number_of_cores,
        })
    }
}

/// Read the input file and the response settings. The settings are read from the
/// configuration file in the working directory; if it does not exist the default
/// settings are used and written to it.
pub fn read_input(input_file: &Path) -> Result<(InputData, ResponseConfig)> {
    let input_string: String = fs::read_to_string(input_file)
        .with_context(|| format!("Unable to read input file {}", input_file.display()))?;
    let input: InputConfig = InputConfig::from_toml(&input_string)?;
    let base: &Path = input_file.parent().unwrap_or_else(|| Path::new("."));
    let data: InputData = input.load_data(base)?;
    let config: ResponseConfig = ResponseConfig::new(Path::new(CONFIG_FILE_NAME))?;
    Ok((data, config))
}
