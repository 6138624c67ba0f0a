//! Recording storage and event query contract
//!
//! The fitting pipeline never touches sample storage directly. It asks a
//! [`Dataset`] for three things: which recordings exist (and how long they
//! are), which events match a predicate, and the samples inside a tick range.
//!
//! # Example
//!
//! ```rust
//! use ndarray::Array2;
//! use rerp::dataset::{DataFormat, Dataset, EventQuery, FieldValue, MemoryDataset};
//!
//! # fn main() -> rerp::Result<()> {
//! let format = DataFormat::new(250.0, "uV", vec!["Cz".into(), "Pz".into()])?;
//! let mut dataset = MemoryDataset::new(format);
//! let rec = dataset.add_recording(Array2::zeros((100, 2)), Default::default())?;
//! dataset.add_event(rec, 10, 11, [("word", FieldValue::from(true))])?;
//!
//! let hits = dataset.events(&EventQuery::IsTrue("word".into()))?;
//! assert_eq!(hits.len(), 1);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryDataset;

use crate::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Identifier of one contiguous recording span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordingId(pub u32);

impl fmt::Display for RecordingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recording {}", self.0)
    }
}

/// Length and metadata of one recording span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingInfo {
    /// Recording identifier
    pub id: RecordingId,
    /// Number of samples
    pub ticks: i64,
    /// Free-form metadata (subject, session, ...)
    pub metadata: BTreeMap<String, FieldValue>,
}

/// Value stored in an event or recording metadata field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicitly empty
    Null,
    /// Boolean flag
    Bool(bool),
    /// Numeric value
    Number(f64),
    /// Text value
    Text(String),
}

impl FieldValue {
    /// Text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view used by regressors: numbers as-is, booleans as 0/1.
    #[must_use]
    pub fn as_regressor(&self) -> Option<f64> {
        match self {
            Self::Number(x) => Some(*x),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Null | Self::Text(_) => None,
        }
    }

    fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(x) => *x != 0.0,
            Self::Text(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("None"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// An annotated occurrence: a half-open tick interval plus fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Recording the event lives in
    pub recording: RecordingId,
    /// First tick (inclusive)
    pub start_tick: i64,
    /// Last tick (exclusive)
    pub stop_tick: i64,
    /// Field name -> value
    pub fields: BTreeMap<String, FieldValue>,
}

impl Event {
    /// Look up a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// Event selection predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventQuery {
    /// Every event
    #[default]
    All,
    /// Field is present (any value, including null)
    Has(String),
    /// Field is present and truthy
    IsTrue(String),
    /// Field equals the value
    Equals(String, FieldValue),
    /// Negation
    Not(Box<EventQuery>),
    /// All sub-queries match
    And(Vec<EventQuery>),
    /// Any sub-query matches
    Or(Vec<EventQuery>),
}

impl EventQuery {
    /// Shorthand for [`EventQuery::Has`].
    #[must_use]
    pub fn has(field: impl Into<String>) -> Self {
        Self::Has(field.into())
    }

    /// Shorthand for [`EventQuery::Equals`].
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Equals(field.into(), value.into())
    }

    /// Evaluate the predicate against one event.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Has(field) => event.fields.contains_key(field),
            Self::IsTrue(field) => event.get(field).is_some_and(FieldValue::is_truthy),
            Self::Equals(field, value) => event.get(field) == Some(value),
            Self::Not(inner) => !inner.matches(event),
            Self::And(parts) => parts.iter().all(|q| q.matches(event)),
            Self::Or(parts) => parts.iter().any(|q| q.matches(event)),
        }
    }
}

impl fmt::Display for EventQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[EventQuery], sep: &str) -> fmt::Result {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                write!(f, "({part})")?;
            }
            Ok(())
        }
        match self {
            Self::All => f.write_str("all"),
            Self::Has(field) => write!(f, "has {field}"),
            Self::IsTrue(field) => f.write_str(field),
            Self::Equals(field, value) => write!(f, "{field} == {value}"),
            Self::Not(inner) => write!(f, "not ({inner})"),
            Self::And(parts) => join(f, parts, " and "),
            Self::Or(parts) => join(f, parts, " or "),
        }
    }
}

/// How to round a real time onto the tick grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Towards +infinity
    Up,
    /// Towards -infinity
    Down,
    /// To the closest tick
    Nearest,
}

/// Sampling rate, units and channel layout shared by every recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFormat {
    hz: f64,
    units: String,
    channel_names: Vec<String>,
}

impl DataFormat {
    /// Create a data format.
    ///
    /// # Errors
    ///
    /// Returns error if the sampling rate is not a positive finite number or
    /// no channels are named.
    pub fn new(hz: f64, units: impl Into<String>, channel_names: Vec<String>) -> Result<Self> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::Dataset(format!(
                "sampling rate must be positive and finite, got {hz}"
            )));
        }
        if channel_names.is_empty() {
            return Err(Error::Dataset("data format needs at least one channel".to_string()));
        }
        Ok(Self {
            hz,
            units: units.into(),
            channel_names,
        })
    }

    /// Sampling rate (Hz).
    #[must_use]
    pub const fn hz(&self) -> f64 {
        self.hz
    }

    /// Measurement units.
    #[must_use]
    pub fn units(&self) -> &str {
        &self.units
    }

    /// Channel names, in column order.
    #[must_use]
    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    /// Number of channels.
    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channel_names.len()
    }

    /// Convert milliseconds to a tick offset.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ms_to_ticks(&self, ms: f64, rounding: Rounding) -> i64 {
        let ticks = ms * self.hz / 1000.0;
        let rounded = match rounding {
            Rounding::Up => ticks.ceil(),
            Rounding::Down => ticks.floor(),
            Rounding::Nearest => ticks.round(),
        };
        rounded as i64
    }

    /// Convert a tick offset to milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ticks_to_ms(&self, tick: i64) -> f64 {
        tick as f64 * 1000.0 / self.hz
    }
}

/// Recording storage and event query contract.
///
/// Implementations must be `Sync`: regression workers read sample blocks
/// concurrently.
pub trait Dataset: Sync {
    /// Format shared by all recordings.
    fn data_format(&self) -> &DataFormat;

    /// Every recording span, in id order.
    fn recordings(&self) -> Vec<RecordingInfo>;

    /// Events matching `query`, ordered by (recording, start tick).
    ///
    /// # Errors
    ///
    /// Returns error if the event store cannot be read.
    fn events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// Samples for `ticks` of `recording`, shaped `ticks × channels`.
    ///
    /// # Errors
    ///
    /// Returns error if the recording is unknown or the range falls outside it.
    fn sample_block(&self, recording: RecordingId, ticks: Range<i64>) -> Result<Array2<f64>>;
}
