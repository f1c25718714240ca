//! Error types in linfa-honest
//!

use thiserror::Error;

use ndarray::ShapeError;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("invalid parameter {0}")]
    Parameters(String),
    #[error("categorical column {column} is out of range for {ncols} columns")]
    InvalidCategoricalColumn { column: usize, ncols: usize },
    #[error("expected {expected} feature columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("non-finite value at row {row}, column {column:?}")]
    NonFiniteValue { row: usize, column: Option<usize> },
    #[error("invariant violated while growing tree: {0}")]
    InvariantViolation(String),
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
    #[error("invalid ndarray shape {0}")]
    NdShape(#[from] ShapeError),
    #[error("Not enough samples to grow a tree")]
    NotEnoughSamples,
    #[error(transparent)]
    BaseCrate(#[from] linfa::Error),
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::ThreadPool(err.to_string())
    }
}
