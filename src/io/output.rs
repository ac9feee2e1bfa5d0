use crate::response::{Convergence, ResponseResults};
use anyhow::{Context, Result};
use ndarray::prelude::*;
use ndarray_npy::write_npy;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// Human-readable summary of a response calculation.
#[derive(Serialize, Debug)]
pub struct ResultsSummary<'a> {
    pub frequencies: &'a [f64],
    pub labels: &'a [String],
    /// One tensor `[component, component]` per frequency.
    pub tensors: Vec<Vec<Vec<f64>>>,
    pub convergence: &'a [Vec<Convergence>],
    pub converged: bool,
}

impl<'a> ResultsSummary<'a> {
    pub fn new(results: &'a ResponseResults, labels: &'a [String]) -> Self {
        let tensors: Vec<Vec<Vec<f64>>> = results
            .tensor
            .axis_iter(Axis(2))
            .map(|tensor| tensor.outer_iter().map(|row| row.to_vec()).collect())
            .collect();
        Self {
            frequencies: &results.frequencies,
            labels,
            tensors,
            convergence: &results.convergence,
            converged: results.converged(),
        }
    }
}

/// Write the response tensor to `<prefix>results.npy` and a JSON summary to
/// `<prefix>results.json`.
pub fn write_results(prefix: &str, results: &ResponseResults, labels: &[String]) -> Result<()> {
    let npy_path: PathBuf = PathBuf::from(format!("{}results.npy", prefix));
    write_npy(&npy_path, &results.tensor)
        .with_context(|| format!("Unable to write {}", npy_path.display()))?;

    let json_path: PathBuf = PathBuf::from(format!("{}results.json", prefix));
    let summary = ResultsSummary::new(results, labels);
    let json: String =
        serde_json::to_string_pretty(&summary).context("Unable to serialize the results")?;
    fs::write(&json_path, json)
        .with_context(|| format!("Unable to write {}", json_path.display()))?;
    Ok(())
}
