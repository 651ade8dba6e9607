//! Error taxonomy shared by the whole crate.

use crate::oracle::Status;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, reducing, building or solving QAP models.
#[derive(Debug, Error)]
pub enum QapError {
    /// The instance file does not exist
    #[error("instance file `{}` does not exist", .0.display())]
    InstanceNotFound(PathBuf),

    /// Generator version outside the supported set
    #[error("unsupported generator version {0} (expected 1 or 2)")]
    UnsupportedGeneratorVersion(u8),

    /// QAPLIB matrix rows could not be normalized to N tokens
    #[error("malformed QAPLIB file: {0}")]
    MalformedQaplibFile(String),

    /// Instance data is inconsistent (unknown ids, bad dimensions, negative values)
    #[error("malformed instance: {0}")]
    MalformedInstance(String),

    /// The feasibility re-solve after equivalence expansion did not end optimal
    #[error("expansion infeasible for `{variant}`: re-solve ended with status {status}")]
    ExpansionInfeasible { variant: String, status: Status },

    /// A model terminated with a non-optimal status
    #[error("model `{model}` did not solve to optimality: {status}")]
    SolverNonOptimal { model: String, status: Status },

    /// The recomputed quadratic objective disagrees with the solver objective
    #[error("objective mismatch for `{variant}`: solver reported {reported}, recomputed {recomputed}")]
    ObjectiveMismatch {
        variant: String,
        reported: f64,
        recomputed: f64,
    },

    /// An equivalence merge was requested but every class is a singleton
    #[error("equivalence merge is a no-op: {0} facilities before and after reduction")]
    TrivialReduction(usize),

    /// No formulation is registered under this name
    #[error("unknown formulation `{0}`")]
    UnknownVariant(String),

    /// The solver backend failed (environment, licensing, numerical breakdown)
    #[error("solver backend error: {0}")]
    Solver(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, QapError>;
