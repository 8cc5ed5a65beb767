//! # Matrix Files
//!
//! The model core never touches the filesystem; this module is the boundary with
//! the data-preparation tooling. Matrices are exchanged as headerless,
//! comma-separated numeric text with one row per line (the layout written by
//! `numpy.savetxt(..., delimiter=',')`). A dataset directory holds:
//!
//! - `X.csv`: unit features, `n × m`, rows in ascending unit id order
//! - `Y.csv`: unit targets, `n` values (one column or one row)
//! - `F_dist.csv`, `F_flow.csv`: `n × n` relation matrices
//!
//! Failures name the file, row and column involved so a malformed export can be
//! fixed without guesswork.

use crate::dataset::{DatasetError, UnitDataset};
use crate::pairwise::PairwiseDesign;
use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ShapeError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FEATURES_FILE: &str = "X.csv";
pub const TARGET_FILE: &str = "Y.csv";
pub const DISTANCE_FILE: &str = "F_dist.csv";
pub const FLOW_FILE: &str = "F_flow.csv";
pub const PAIRWISE_FEATURES_FILE: &str = "F.csv";
pub const PAIRWISE_TARGET_FILE: &str = "Yp.csv";
pub const JOINT_DESIGN_FILE: &str = "F_joint.csv";

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("'{}' row {row}, column {col}: '{value}' is not a number.", path.display())]
    Parse {
        path: PathBuf,
        row: usize,
        col: usize,
        value: String,
    },

    #[error("'{}' row {row} has {found} columns, but the first row has {expected}.", path.display())]
    Ragged {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("'{}' contains no rows.", path.display())]
    Empty { path: PathBuf },

    #[error("'{}' has shape {rows} x {cols}; a single row or column was expected.", path.display())]
    NotAVector {
        path: PathBuf,
        rows: usize,
        cols: usize,
    },

    #[error("Matrix shape error: {0}")]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Reads a headerless numeric CSV into a dense matrix. Rows are 1-based in errors.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>, FileError> {
    let csv_error = |source| FileError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let mut values = Vec::new();
    let mut width: Option<usize> = None;
    let mut rows = 0usize;
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        rows += 1;
        match width {
            None => width = Some(record.len()),
            Some(expected) if expected != record.len() => {
                return Err(FileError::Ragged {
                    path: path.to_path_buf(),
                    row: rows,
                    expected,
                    found: record.len(),
                });
            }
            Some(_) => {}
        }
        for (col, field) in record.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| FileError::Parse {
                path: path.to_path_buf(),
                row: rows,
                col: col + 1,
                value: field.to_string(),
            })?;
            values.push(value);
        }
    }

    let width = width.ok_or_else(|| FileError::Empty {
        path: path.to_path_buf(),
    })?;
    log::debug!("Read {} x {} matrix from {}", rows, width, path.display());
    Ok(Array2::from_shape_vec((rows, width), values)?)
}

/// Reads a vector stored either as a single column or a single row.
pub fn read_vector(path: &Path) -> Result<Array1<f64>, FileError> {
    let matrix = read_matrix(path)?;
    match matrix.dim() {
        (_, 1) => Ok(matrix.column(0).to_owned()),
        (1, _) => Ok(matrix.row(0).to_owned()),
        (rows, cols) => Err(FileError::NotAVector {
            path: path.to_path_buf(),
            rows,
            cols,
        }),
    }
}

/// Writes a matrix as headerless CSV. Values use the shortest representation that
/// parses back to the same `f64`.
pub fn write_matrix(path: &Path, matrix: ArrayView2<f64>) -> Result<(), FileError> {
    let csv_error = |source| FileError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;
    for row in matrix.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|source| FileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a vector as a single column.
pub fn write_vector(path: &Path, vector: ArrayView1<f64>) -> Result<(), FileError> {
    write_matrix(path, vector.insert_axis(ndarray::Axis(1)))
}

/// Loads `X.csv`, `Y.csv`, `F_dist.csv` and `F_flow.csv` from `dir` and validates
/// them as a [`UnitDataset`].
pub fn load_dataset_dir(dir: &Path) -> Result<UnitDataset, FileError> {
    let features = read_matrix(&dir.join(FEATURES_FILE))?;
    let target = read_vector(&dir.join(TARGET_FILE))?;
    let distance = read_matrix(&dir.join(DISTANCE_FILE))?;
    let flow = read_matrix(&dir.join(FLOW_FILE))?;
    let dataset = UnitDataset::new(features, target, distance, flow)?;
    log::info!(
        "Loaded dataset from {}: {} units, {} features",
        dir.display(),
        dataset.num_units(),
        dataset.num_features()
    );
    Ok(dataset)
}

/// Writes `F.csv` and `Yp.csv` (and `F_joint.csv` when given) into `dir`,
/// creating it if needed. Returns the written paths.
pub fn export_pairwise(
    dir: &Path,
    design: &PairwiseDesign,
    joint: Option<ArrayView2<f64>>,
) -> Result<Vec<PathBuf>, FileError> {
    fs::create_dir_all(dir).map_err(|source| FileError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let features_path = dir.join(PAIRWISE_FEATURES_FILE);
    write_matrix(&features_path, design.features())?;
    let target_path = dir.join(PAIRWISE_TARGET_FILE);
    write_vector(&target_path, design.target())?;
    let mut written = vec![features_path, target_path];

    if let Some(joint) = joint {
        let joint_path = dir.join(JOINT_DESIGN_FILE);
        write_matrix(&joint_path, joint)?;
        written.push(joint_path);
    }
    Ok(written)
}
