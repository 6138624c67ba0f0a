//! Span extraction
//!
//! Flattens a batch into tagged intervals on the `(recording, tick)` line:
//! - one epoch span per (request, selected event)
//! - one artifact span per artifact event
//! - two `_NO_RECORDING` artifact spans bracketing every recording, so that
//!   epochs hanging off either end of a recording are excluded rather than
//!   read past the data
//!
//! Epochs have identity semantics: two epochs with identical fields are still
//! different occurrences. They live in an [`EpochTable`] and everything else
//! refers to them by [`EpochId`].

use crate::dataset::{Dataset, EventQuery, RecordingId, RecordingInfo, Rounding};
use crate::formula::{DesignInfo, RegressorEvaluator};
use crate::request::RerpRequest;
use crate::{Error, Result};
use std::fmt;
use tracing::debug;

/// Artifact label covering everything outside a recording.
pub const NO_RECORDING: &str = "_NO_RECORDING";
/// Intrinsic artifact of epochs whose event lacks a predictor.
pub const MISSING_PREDICTOR: &str = "_MISSING_PREDICTOR";
/// Label for artifact events without a type field.
pub const UNKNOWN_ARTIFACT: &str = "_UNKNOWN";

/// Outer bounds of the `_NO_RECORDING` brackets. The trailing bracket is
/// stretched past these for recordings that reach them.
const BEFORE_RECORDING: i64 = i64::MIN / 2;
const AFTER_RECORDING: i64 = i64::MAX / 2;

/// `_NO_RECORDING` spans before tick 0 and from `ticks` onwards.
fn recording_brackets(info: &RecordingInfo) -> [DataSpan; 2] {
    let end = AFTER_RECORDING.max(info.ticks.saturating_add(1));
    [
        DataSpan::artifact(
            Position::new(info.id, BEFORE_RECORDING),
            Position::new(info.id, 0),
            NO_RECORDING,
        ),
        DataSpan::artifact(
            Position::new(info.id, info.ticks),
            Position::new(info.id, end),
            NO_RECORDING,
        ),
    ]
}

/// A point on the concatenated timeline, ordered by recording then tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    /// Recording
    pub recording: RecordingId,
    /// Tick within the recording
    pub tick: i64,
}

impl Position {
    /// Create a position.
    #[must_use]
    pub const fn new(recording: RecordingId, tick: i64) -> Self {
        Self { recording, tick }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.recording.0, self.tick)
    }
}

/// Identity of one epoch; index into its [`EpochTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpochId(pub usize);

/// Analysis window anchored at one event for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
    /// Recording the window lives in
    pub recording: RecordingId,
    /// First tick of the window
    pub start_tick: i64,
    /// Window length in ticks (> 0)
    pub ticks: i64,
    /// Regressor values; `None` when the event lacked a predictor
    pub design_row: Option<Vec<f64>>,
    /// Index of the owning request in the batch
    pub request: usize,
    intrinsic_artifacts: Vec<String>,
}

impl Epoch {
    /// Create an epoch with no intrinsic artifacts.
    #[must_use]
    pub const fn new(
        recording: RecordingId,
        start_tick: i64,
        ticks: i64,
        design_row: Option<Vec<f64>>,
        request: usize,
    ) -> Self {
        Self {
            recording,
            start_tick,
            ticks,
            design_row,
            request,
            intrinsic_artifacts: Vec::new(),
        }
    }

    /// One past the last tick of the window.
    #[must_use]
    pub const fn stop_tick(&self) -> i64 {
        self.start_tick + self.ticks
    }

    /// Artifact labels attached to this epoch's own copy of the data.
    #[must_use]
    pub fn intrinsic_artifacts(&self) -> &[String] {
        &self.intrinsic_artifacts
    }

    /// Whether this epoch carries any intrinsic artifact.
    #[must_use]
    pub fn has_intrinsic_artifacts(&self) -> bool {
        !self.intrinsic_artifacts.is_empty()
    }

    /// Attach an intrinsic artifact. Labels are never removed.
    pub fn add_intrinsic_artifact(&mut self, label: impl Into<String>) {
        self.intrinsic_artifacts.push(label.into());
    }
}

/// Owner of every epoch in a batch.
#[derive(Debug, Clone, Default)]
pub struct EpochTable {
    epochs: Vec<Epoch>,
}

impl EpochTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self { epochs: Vec::new() }
    }

    /// Store an epoch and return its identity.
    pub fn insert(&mut self, epoch: Epoch) -> EpochId {
        self.epochs.push(epoch);
        EpochId(self.epochs.len() - 1)
    }

    /// Number of epochs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Iterate over `(id, epoch)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (EpochId, &Epoch)> {
        self.epochs.iter().enumerate().map(|(i, e)| (EpochId(i), e))
    }
}

impl std::ops::Index<EpochId> for EpochTable {
    type Output = Epoch;

    fn index(&self, id: EpochId) -> &Epoch {
        &self.epochs[id.0]
    }
}

impl std::ops::IndexMut<EpochId> for EpochTable {
    fn index_mut(&mut self, id: EpochId) -> &mut Epoch {
        &mut self.epochs[id.0]
    }
}

/// Tagged interval `[start, stop)` carrying an epoch or an artifact label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpan {
    /// Inclusive start
    pub start: Position,
    /// Exclusive stop
    pub stop: Position,
    /// Epoch covering the interval
    pub epoch: Option<EpochId>,
    /// Artifact covering the interval
    pub artifact: Option<String>,
}

impl DataSpan {
    /// Epoch span.
    #[must_use]
    pub const fn epoch(start: Position, stop: Position, epoch: EpochId) -> Self {
        Self {
            start,
            stop,
            epoch: Some(epoch),
            artifact: None,
        }
    }

    /// Artifact span.
    #[must_use]
    pub fn artifact(start: Position, stop: Position, label: impl Into<String>) -> Self {
        Self {
            start,
            stop,
            epoch: None,
            artifact: Some(label.into()),
        }
    }
}

/// What extraction learned about one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RerpPlan {
    /// Position of the request in the batch
    pub index: usize,
    /// The request itself
    pub request: RerpRequest,
    /// Predictor columns produced by its formula
    pub design_info: DesignInfo,
    /// First tick of the window, relative to event onset
    pub start_tick: i64,
    /// One past the last tick, relative to event onset
    pub stop_tick: i64,
    /// Epochs created for this request, in event order
    pub epochs: Vec<EpochId>,
}

impl RerpPlan {
    /// Window length in ticks.
    #[must_use]
    pub const fn ticks(&self) -> i64 {
        self.stop_tick - self.start_tick
    }
}

/// Everything span extraction produces.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Epoch and artifact spans
    pub spans: Vec<DataSpan>,
    /// Epoch storage
    pub epochs: EpochTable,
    /// One plan per request, in request order
    pub plans: Vec<RerpPlan>,
}

/// Artifact spans: recording brackets plus one span per artifact event.
///
/// # Errors
///
/// Returns `ArtifactTypeNotText` if an artifact event's type field holds a
/// non-text value, or any error from the dataset.
pub fn artifact_spans<D: Dataset + ?Sized>(
    dataset: &D,
    artifact_query: &EventQuery,
    artifact_type_field: &str,
) -> Result<Vec<DataSpan>> {
    let mut spans = Vec::new();
    for info in dataset.recordings() {
        spans.extend(recording_brackets(&info));
    }

    for event in dataset.events(artifact_query)? {
        let label = match event.get(artifact_type_field) {
            None => UNKNOWN_ARTIFACT,
            Some(value) => value.as_text().ok_or_else(|| Error::ArtifactTypeNotText {
                field: artifact_type_field.to_string(),
                value: value.to_string(),
            })?,
        };
        if event.stop_tick <= event.start_tick {
            debug!(
                recording = event.recording.0,
                start = event.start_tick,
                stop = event.stop_tick,
                "skipping empty artifact event"
            );
            continue;
        }
        spans.push(DataSpan::artifact(
            Position::new(event.recording, event.start_tick),
            Position::new(event.recording, event.stop_tick),
            label,
        ));
    }
    Ok(spans)
}

/// Build the epochs and epoch spans for one request.
///
/// The request window `[start_time, stop_time]` is a closed interval in ms.
/// It is discretized inward (start rounded up, stop rounded down) so every
/// selected tick lies within the requested bounds, then made half-open.
///
/// # Errors
///
/// Returns `EmptyWindow` if no tick falls inside the window, `Formula` if the
/// formula cannot be evaluated, or any error from the dataset.
pub fn epoch_spans<D, F>(
    dataset: &D,
    evaluator: &F,
    request: &RerpRequest,
    index: usize,
    epochs: &mut EpochTable,
) -> Result<(RerpPlan, Vec<DataSpan>)>
where
    D: Dataset + ?Sized,
    F: RegressorEvaluator + ?Sized,
{
    request.validate()?;
    let format = dataset.data_format();
    let start_tick = format.ms_to_ticks(request.start_time(), Rounding::Up);
    let stop_tick = format.ms_to_ticks(request.stop_time(), Rounding::Down) + 1;
    if stop_tick <= start_tick {
        return Err(Error::EmptyWindow {
            name: request.name().to_string(),
            start_time: request.start_time(),
            stop_time: request.stop_time(),
        });
    }
    let ticks = stop_tick - start_tick;

    let events = dataset.events(request.event_query())?;
    let design = evaluator.evaluate(request.formula(), &events)?;
    if design.rows.len() != events.len() {
        return Err(Error::shape(
            format!("{} regressor rows", events.len()),
            format!("{} rows from formula {:?}", design.rows.len(), request.formula()),
        ));
    }

    let mut spans = Vec::with_capacity(events.len());
    let mut ids = Vec::with_capacity(events.len());
    for (event, row) in events.iter().zip(design.rows) {
        if let Some(row) = &row {
            if row.len() != design.info.width() {
                return Err(Error::shape(
                    format!("{} predictors", design.info.width()),
                    format!("row of {}", row.len()),
                ));
            }
        }
        let missing = row.is_none();
        let mut epoch = Epoch::new(
            event.recording,
            event.start_tick + start_tick,
            ticks,
            row,
            index,
        );
        if missing {
            // Kept as an artifact so the excluded epoch still shows up in
            // the accounting.
            epoch.add_intrinsic_artifact(MISSING_PREDICTOR);
        }
        let start = Position::new(epoch.recording, epoch.start_tick);
        let stop = Position::new(epoch.recording, epoch.stop_tick());
        let id = epochs.insert(epoch);
        spans.push(DataSpan::epoch(start, stop, id));
        ids.push(id);
    }

    let plan = RerpPlan {
        index,
        request: request.clone(),
        design_info: design.info,
        start_tick,
        stop_tick,
        epochs: ids,
    };
    Ok((plan, spans))
}

/// Extract all spans for a batch.
///
/// # Errors
///
/// Propagates errors from [`artifact_spans`] and [`epoch_spans`].
pub fn extract_spans<D, F>(
    dataset: &D,
    evaluator: &F,
    requests: &[RerpRequest],
    artifact_query: &EventQuery,
    artifact_type_field: &str,
) -> Result<Extraction>
where
    D: Dataset + ?Sized,
    F: RegressorEvaluator + ?Sized,
{
    let mut spans = artifact_spans(dataset, artifact_query, artifact_type_field)?;
    let artifact_count = spans.len();
    let mut epochs = EpochTable::new();
    let mut plans = Vec::with_capacity(requests.len());
    for (index, request) in requests.iter().enumerate() {
        let (plan, epoch_spans) = epoch_spans(dataset, evaluator, request, index, &mut epochs)?;
        spans.extend(epoch_spans);
        plans.push(plan);
    }
    debug!(
        artifact_spans = artifact_count,
        epochs = epochs.len(),
        requests = plans.len(),
        "extracted spans"
    );
    Ok(Extraction {
        spans,
        epochs,
        plans,
    })
}
