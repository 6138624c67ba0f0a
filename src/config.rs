//! Batch fitting configuration
//!
//! ```rust
//! use rerp::{FitConfig, RegressionStrategy};
//!
//! let config = FitConfig::default()
//!     .overlap_correction(false)
//!     .regression_strategy(RegressionStrategy::Continuous)
//!     .threads(4);
//! assert!(!config.is_overlap_corrected());
//!
//! let config = FitConfig::from_json_str(r#"{ "regression_strategy": "by-epoch" }"#)?;
//! assert_eq!(config.strategy(), RegressionStrategy::ByEpoch);
//! # Ok::<(), rerp::Error>(())
//! ```

use crate::dataset::EventQuery;
use crate::strategy::RegressionStrategy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default name of the field holding an artifact event's type.
pub const DEFAULT_ARTIFACT_TYPE_FIELD: &str = "_ARTIFACT_TYPE";

/// Default relative pivot tolerance of the solver.
pub const DEFAULT_RANK_TOLERANCE: f64 = 1e-10;

/// Batch-level knobs shared by every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitConfig {
    artifact_query: EventQuery,
    artifact_type_field: String,
    overlap_correction: bool,
    regression_strategy: RegressionStrategy,
    threads: Option<usize>,
    rank_tolerance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            artifact_query: EventQuery::has(DEFAULT_ARTIFACT_TYPE_FIELD),
            artifact_type_field: DEFAULT_ARTIFACT_TYPE_FIELD.to_string(),
            overlap_correction: true,
            regression_strategy: RegressionStrategy::Auto,
            threads: None,
            rank_tolerance: DEFAULT_RANK_TOLERANCE,
        }
    }
}

impl FitConfig {
    /// Parse from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `Json` for malformed input, `UnknownStrategy` for an
    /// unrecognised `regression_strategy` or `Config` for invalid values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if let Some(serde_json::Value::String(name)) = value.get("regression_strategy") {
            name.parse::<RegressionStrategy>()?;
        }
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `threads` is zero or `rank_tolerance` is negative
    /// or not finite.
    pub fn validate(&self) -> Result<()> {
        if self.threads == Some(0) {
            return Err(Error::Config("threads must be at least 1".to_string()));
        }
        if !self.rank_tolerance.is_finite() || self.rank_tolerance < 0.0 {
            return Err(Error::Config(format!(
                "rank_tolerance must be finite and non-negative, got {}",
                self.rank_tolerance
            )));
        }
        if self.artifact_type_field.is_empty() {
            return Err(Error::Config("artifact_type_field must not be empty".to_string()));
        }
        Ok(())
    }

    /// Select artifact events.
    #[must_use]
    pub fn artifact_query(mut self, query: EventQuery) -> Self {
        self.artifact_query = query;
        self
    }

    /// Field naming an artifact event's type.
    #[must_use]
    pub fn artifact_type_field(mut self, field: impl Into<String>) -> Self {
        self.artifact_type_field = field.into();
        self
    }

    /// Model overlapping epochs as sharing one copy of the data.
    #[must_use]
    pub const fn overlap_correction(mut self, enabled: bool) -> Self {
        self.overlap_correction = enabled;
        self
    }

    /// Regression strategy preference.
    #[must_use]
    pub const fn regression_strategy(mut self, strategy: RegressionStrategy) -> Self {
        self.regression_strategy = strategy;
        self
    }

    /// Cap the number of worker threads.
    #[must_use]
    pub const fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Relative pivot tolerance for dropping unidentifiable columns.
    #[must_use]
    pub const fn rank_tolerance(mut self, tolerance: f64) -> Self {
        self.rank_tolerance = tolerance;
        self
    }

    /// Artifact event selector.
    #[must_use]
    pub const fn artifact_selector(&self) -> &EventQuery {
        &self.artifact_query
    }

    /// Artifact type field name.
    #[must_use]
    pub fn artifact_field(&self) -> &str {
        &self.artifact_type_field
    }

    /// Whether overlap correction is on.
    #[must_use]
    pub const fn is_overlap_corrected(&self) -> bool {
        self.overlap_correction
    }

    /// Requested strategy.
    #[must_use]
    pub const fn strategy(&self) -> RegressionStrategy {
        self.regression_strategy
    }

    /// Worker thread cap, if any.
    #[must_use]
    pub const fn thread_limit(&self) -> Option<usize> {
        self.threads
    }

    /// Solver pivot tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> f64 {
        self.rank_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FitConfig::default();
        assert_eq!(config.artifact_selector(), &EventQuery::has("_ARTIFACT_TYPE"));
        assert_eq!(config.artifact_field(), "_ARTIFACT_TYPE");
        assert!(config.is_overlap_corrected());
        assert_eq!(config.strategy(), RegressionStrategy::Auto);
        assert_eq!(config.thread_limit(), None);
        assert!((config.tolerance() - 1e-10).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_round_trip_and_partial_input() {
        let config = FitConfig::default()
            .artifact_type_field("kind")
            .artifact_query(EventQuery::IsTrue("bad".into()))
            .threads(3);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(FitConfig::from_json_str(&json).unwrap(), config);

        let partial = FitConfig::from_json_str(r#"{"overlap_correction": false}"#).unwrap();
        assert!(!partial.is_overlap_corrected());
        assert_eq!(partial.artifact_field(), DEFAULT_ARTIFACT_TYPE_FIELD);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            FitConfig::from_json_str(r#"{"regression_strategy": "fastest"}"#),
            Err(Error::UnknownStrategy(ref s)) if s == "fastest"
        ));
        assert!(matches!(
            FitConfig::from_json_str(r#"{"regression_strategy": 3}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            FitConfig::from_json_str(r#"{"thread": 2}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            FitConfig::from_json_str(r#"{"threads": 0}"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            FitConfig::from_json_str(r#"{"rank_tolerance": -1.0}"#),
            Err(Error::Config(_))
        ));
    }
}
