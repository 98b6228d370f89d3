//! Error and diagnostic types for neurodensity

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fatal errors: a malformed input contract or an unusable configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Scalar field has {actual} values but the grid {dimensions:?} needs {expected}")]
    GridSizeMismatch {
        dimensions: [usize; 3],
        expected: usize,
        actual: usize,
    },

    #[error("No density strategy registered for '{0}'")]
    UnknownStrategy(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),
}

/// Result type alias for neurodensity operations
pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal anomalies, reported next to a still usable result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// A cell contributed no edges to the density
    EmptyCell { cell_id: String },
    /// An extraction worker failed; its segment is missing from the mesh
    WorkerJoin { segment: usize, message: String },
}

impl Diagnostic {
    /// Check whether the anomaly removed geometry from a result
    pub fn is_data_loss(&self) -> bool {
        matches!(self, Diagnostic::WorkerJoin { .. })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::EmptyCell { cell_id } => {
                write!(f, "cell '{}' has no edges for the selected compartment", cell_id)
            }
            Diagnostic::WorkerJoin { segment, message } => {
                write!(f, "segment {} could not be joined: {}", segment, message)
            }
        }
    }
}
