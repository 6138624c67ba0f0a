//! Error types for rerp
//!
//! Every variant names the request or condition that triggered it, so a
//! failed batch tells the caller what to change. Internal defects (a sweep
//! that ends with live intervals, a solved block of the wrong shape) are
//! assertions, not variants here.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// rerp error types
#[derive(Error, Debug)]
pub enum Error {
    /// Two requests in one batch share a name
    #[error("name {0:?} used for two different sub-analyses")]
    DuplicateRequestName(String),

    /// Request rejected at construction
    #[error("invalid request {name:?}: {reason}")]
    InvalidRequest {
        /// Request name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Discretized epoch window holds no samples
    #[error("requested epoch span of [{start_time}, {stop_time}] ms for {name:?} contains no data points")]
    EmptyWindow {
        /// Request name
        name: String,
        /// Requested start (ms)
        start_time: f64,
        /// Requested stop (ms)
        stop_time: f64,
    },

    /// Artifact-type field holds a non-text value
    #[error("artifact type field {field:?} must be text, not {value}")]
    ArtifactTypeNotText {
        /// Field that was read
        field: String,
        /// Offending value (debug-rendered)
        value: String,
    },

    /// Formula could not be evaluated
    #[error("formula {formula:?}: {reason}")]
    Formula {
        /// Formula text
        formula: String,
        /// Why evaluation failed
        reason: String,
    },

    /// Explicit by-epoch fitting requested but not possible
    #[error("\"by-epoch\" regression strategy is not possible because: {}. Use \"continuous\" strategy instead.", .reasons.join("; also, "))]
    StrategyInfeasible {
        /// Blocking conditions
        reasons: Vec<String>,
    },

    /// Strategy string not recognized
    #[error("unknown regression strategy {0:?} requested; must be \"by-epoch\", \"continuous\", or \"auto\"")]
    UnknownStrategy(String),

    /// Dataset collaborator failure
    #[error("dataset error: {0}")]
    Dataset(String),

    /// A fitting job failed; the whole batch is aborted
    #[error("regression worker failed: {0}")]
    Worker(String),

    /// Caller-supplied block has the wrong shape
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape
        expected: String,
        /// Actual shape
        actual: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid_request(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn formula(formula: &str, reason: impl Into<String>) -> Self {
        Self::Formula {
            formula: formula.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
