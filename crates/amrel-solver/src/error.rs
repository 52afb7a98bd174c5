//! Error types for amrel-solver

use amrel_model::ModelError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SolverError>;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("{field} is not finite at {index:?} (component {component}, amrlev={amrlev}, mglev={mglev})")]
    NonFinite {
        field: &'static str,
        amrlev: usize,
        mglev: usize,
        index: Vec<i64>,
        component: usize,
    },

    #[error("model not set on AMR level {0}; call set_model before prepare_for_solve")]
    ModelNotSet(usize),

    #[error("{0} is not implemented in 3D")]
    NotImplemented3D(&'static str),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid boundary condition: {0}")]
    InvalidBc(String),

    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Linear solver failed: {0}")]
    LinearSolve(String),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
