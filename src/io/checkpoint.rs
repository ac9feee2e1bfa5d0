use crate::defaults::CHECKPOINT_SUFFIX;
use crate::response::{Basis, ResponseError, Spin};
use data_reader::reader::{load_txt_f64, Delimiter, ReaderParams};
use ndarray::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Tag of the converged response vectors.
pub const RSPVECS_TAG: &str = "rspvecs_";
/// Tag of the uncoupled response vectors that start the iterations.
pub const RSPVECS_GUESS_TAG: &str = "rspvecs_guess_";
/// Tag of the gradient vectors (right-hand sides).
pub const RHSVECS_TAG: &str = "rhsvecs_";
/// Tag of the energy-difference operators.
pub const EDIFF_TAG: &str = "ediff_";

/// `<prefix><tag><label>_<basis>_<spin>.dat`
pub fn checkpoint_path(prefix: &str, tag: &str, label: &str, basis: Basis, spin: Spin) -> PathBuf {
    PathBuf::from(format!(
        "{}{}{}_{}_{}{}",
        prefix,
        tag,
        label,
        basis.tag(),
        spin.tag(),
        CHECKPOINT_SUFFIX
    ))
}

/// `<prefix>ediff_<spin>.dat`
pub fn ediff_path(prefix: &str, spin: Spin) -> PathBuf {
    PathBuf::from(format!(
        "{}{}{}{}",
        prefix,
        EDIFF_TAG,
        spin.tag(),
        CHECKPOINT_SUFFIX
    ))
}

fn checkpoint_error(path: &Path, operator: &str, reason: String) -> ResponseError {
    ResponseError::Checkpoint {
        path: path.to_path_buf(),
        operator: String::from(operator),
        reason,
    }
}

fn reader_params() -> ReaderParams {
    ReaderParams {
        comments: Some(b'%'),
        delimiter: Delimiter::WhiteSpace,
        skip_header: None,
        skip_footer: None,
        usecols: None,
        max_rows: None,
    }
}

fn write_rows<I>(path: &Path, shape: &[usize], rows: I) -> std::io::Result<()>
where
    I: Iterator<Item = Vec<f64>>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    let shape_str: Vec<String> = shape.iter().map(|n| n.to_string()).collect();
    writeln!(writer, "% shape: {}", shape_str.join(" "))?;
    for row in rows {
        let line: Vec<String> = row.iter().map(|x| format!("{:.16e}", x)).collect();
        writeln!(writer, "{}", line.join(" "))?;
    }
    writer.flush()
}

/// Write a matrix as whitespace separated text, one matrix row per line.
pub fn write_array2(path: &Path, operator: &str, arr: ArrayView2<f64>) -> Result<(), ResponseError> {
    let rows = arr.outer_iter().map(|row| row.to_vec());
    write_rows(path, arr.shape(), rows)
        .map_err(|err| checkpoint_error(path, operator, err.to_string()))
}

/// Write a stack of square matrices, one flattened (row-major) matrix per line.
pub fn write_array3(path: &Path, operator: &str, arr: ArrayView3<f64>) -> Result<(), ResponseError> {
    let rows = arr.outer_iter().map(|mat| mat.iter().copied().collect::<Vec<f64>>());
    write_rows(path, arr.shape(), rows)
        .map_err(|err| checkpoint_error(path, operator, err.to_string()))
}

/// Read a matrix written by [write_array2].
pub fn read_array2(path: &Path, operator: &str) -> Result<Array2<f64>, ResponseError> {
    let file: String = path.to_string_lossy().into_owned();
    let results = load_txt_f64(&file, &reader_params())
        .map_err(|err| checkpoint_error(path, operator, err.to_string()))?;
    let shape: (usize, usize) = (results.num_lines, results.num_fields);
    Array2::from_shape_vec(shape, results.results)
        .map_err(|err| checkpoint_error(path, operator, err.to_string()))
}

/// Read a stack of square matrices written by [write_array3].
pub fn read_array3(path: &Path, operator: &str) -> Result<Array3<f64>, ResponseError> {
    let file: String = path.to_string_lossy().into_owned();
    let results = load_txt_f64(&file, &reader_params())
        .map_err(|err| checkpoint_error(path, operator, err.to_string()))?;
    let last_axis: usize = (results.num_fields as f64).sqrt().round() as usize;
    if last_axis * last_axis != results.num_fields {
        return Err(checkpoint_error(
            path,
            operator,
            format!(
                "{} values per line do not form a square matrix",
                results.num_fields
            ),
        ));
    }
    let shape: (usize, usize, usize) = (results.num_lines, last_axis, last_axis);
    Array3::from_shape_vec(shape, results.results)
        .map_err(|err| checkpoint_error(path, operator, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::scratch_dir;
    use ndarray_linalg::generate::random;

    #[test]
    fn file_names() {
        let path = checkpoint_path("h2o_", RSPVECS_TAG, "dipole", Basis::Mo, Spin::Beta);
        assert_eq!(path, PathBuf::from("h2o_rspvecs_dipole_mo_beta.dat"));
        assert_eq!(ediff_path("", Spin::Alpha), PathBuf::from("ediff_alph.dat"));
    }

    #[test]
    fn matrix_round_trip() {
        let dir = scratch_dir("array2");
        let arr: Array2<f64> = random((6, 3));
        let arr: Array2<f64> = arr - 0.5;
        let path = dir.join("mat.dat");
        write_array2(&path, "test", arr.view()).unwrap();
        let back = read_array2(&path, "test").unwrap();
        assert_eq!(back.dim(), (6, 3));
        assert!(back.abs_diff_eq(&arr, 1e-15));
    }

    #[test]
    fn stacked_matrices_round_trip() {
        let dir = scratch_dir("array3");
        let arr: Array3<f64> = random((3, 4, 4));
        let path = dir.join("stack.dat");
        write_array3(&path, "test", arr.view()).unwrap();
        let back = read_array3(&path, "test").unwrap();
        assert_eq!(back.dim(), (3, 4, 4));
        assert!(back.abs_diff_eq(&arr, 1e-15));
    }

    #[test]
    fn missing_file_names_file_and_operator() {
        let dir = scratch_dir("missing");
        let path = dir.join("rspvecs_quadrupole_mo_alph.dat");
        let err = read_array2(&path, "quadrupole").unwrap_err();
        match err {
            ResponseError::Checkpoint { path: p, operator, .. } => {
                assert_eq!(p, path);
                assert_eq!(operator, "quadrupole");
            }
            _ => panic!("unexpected error {:?}", err),
        }
    }
}
