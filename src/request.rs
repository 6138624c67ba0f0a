//! Analysis requests
//!
//! A request names a subset of events, a window around each one (in
//! milliseconds, relative to event onset), and the formula whose
//! coefficients are estimated at every latency of that window.

use crate::dataset::EventQuery;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Formula used when none is given: one intercept, i.e. the classic average.
pub const DEFAULT_FORMULA: &str = "~ 1";

/// One sub-analysis of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerpRequest {
    event_query: EventQuery,
    start_time: f64,
    stop_time: f64,
    formula: String,
    name: String,
    all_or_nothing: bool,
}

impl RerpRequest {
    /// Create a request with the intercept-only formula.
    ///
    /// # Errors
    ///
    /// Returns error if `stop_time` comes before `start_time` or either is
    /// not finite.
    pub fn new(event_query: EventQuery, start_time: f64, stop_time: f64) -> Result<Self> {
        Self::builder(event_query, start_time, stop_time).build()
    }

    /// Create a builder for a request with optional fields.
    #[must_use]
    pub fn builder(event_query: EventQuery, start_time: f64, stop_time: f64) -> RerpRequestBuilder {
        RerpRequestBuilder::new(event_query, start_time, stop_time)
    }

    /// Event selection predicate.
    #[must_use]
    pub const fn event_query(&self) -> &EventQuery {
        &self.event_query
    }

    /// Window start (ms, relative to event onset).
    #[must_use]
    pub const fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Window stop (ms, relative to event onset, inclusive).
    #[must_use]
    pub const fn stop_time(&self) -> f64 {
        self.stop_time
    }

    /// Regressor formula.
    #[must_use]
    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Unique name within the batch.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether any artifact anywhere in an epoch rejects the whole epoch.
    #[must_use]
    pub const fn all_or_nothing(&self) -> bool {
        self.all_or_nothing
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.start_time.is_finite() || !self.stop_time.is_finite() {
            return Err(Error::invalid_request(
                &self.name,
                format!(
                    "window times must be finite, got [{}, {}]",
                    self.start_time, self.stop_time
                ),
            ));
        }
        if self.stop_time < self.start_time {
            return Err(Error::invalid_request(
                &self.name,
                format!(
                    "start time {} comes after stop time {}",
                    self.start_time, self.stop_time
                ),
            ));
        }
        Ok(())
    }
}

/// Builder for `RerpRequest`.
#[derive(Debug)]
pub struct RerpRequestBuilder {
    event_query: EventQuery,
    start_time: f64,
    stop_time: f64,
    formula: String,
    name: Option<String>,
    all_or_nothing: bool,
}

impl RerpRequestBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(event_query: EventQuery, start_time: f64, stop_time: f64) -> Self {
        Self {
            event_query,
            start_time,
            stop_time,
            formula: DEFAULT_FORMULA.to_string(),
            name: None,
            all_or_nothing: false,
        }
    }

    /// Set the regressor formula.
    #[must_use]
    pub fn formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = formula.into();
        self
    }

    /// Set the name (defaults to `"<query>: <formula>"`).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reject whole epochs that touch any artifact.
    #[must_use]
    pub const fn all_or_nothing(mut self, all_or_nothing: bool) -> Self {
        self.all_or_nothing = all_or_nothing;
        self
    }

    /// Build the `RerpRequest`.
    ///
    /// # Errors
    ///
    /// Returns error if the window is reversed or not finite.
    pub fn build(self) -> Result<RerpRequest> {
        let name = self
            .name
            .unwrap_or_else(|| format!("{}: {}", self.event_query, self.formula));
        let request = RerpRequest {
            event_query: self.event_query,
            start_time: self.start_time,
            stop_time: self.stop_time,
            formula: self.formula,
            name,
            all_or_nothing: self.all_or_nothing,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Reject batches in which two requests share a name.
///
/// # Errors
///
/// Returns `DuplicateRequestName` naming the first repeated name.
pub fn check_unique_names(requests: &[RerpRequest]) -> Result<()> {
    let mut names = HashSet::with_capacity(requests.len());
    for request in requests {
        if !names.insert(request.name()) {
            return Err(Error::DuplicateRequestName(request.name().to_string()));
        }
    }
    Ok(())
}
