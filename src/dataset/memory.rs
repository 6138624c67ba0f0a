//! In-memory dataset implementation.
//!
//! Holds every recording as a dense `ticks × channels` block. Intended for
//! tests, benchmarks and small analyses; nothing is persisted.

use super::{DataFormat, Dataset, Event, EventQuery, FieldValue, RecordingId, RecordingInfo};
use crate::{Error, Result};
use ndarray::{s, Array2};
use std::collections::BTreeMap;
use std::ops::Range;

/// In-memory dataset.
///
/// # Example
///
/// ```rust
/// use ndarray::Array2;
/// use rerp::dataset::{DataFormat, Dataset, MemoryDataset};
///
/// # fn main() -> rerp::Result<()> {
/// let format = DataFormat::new(1000.0, "uV", vec!["Cz".into()])?;
/// let mut dataset = MemoryDataset::new(format);
/// let rec = dataset.add_recording(Array2::ones((50, 1)), Default::default())?;
/// let block = dataset.sample_block(rec, 10..20)?;
/// assert_eq!(block.dim(), (10, 1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryDataset {
    format: DataFormat,
    recordings: Vec<(RecordingInfo, Array2<f64>)>,
    events: Vec<Event>,
}

impl MemoryDataset {
    /// Create an empty dataset.
    #[must_use]
    pub const fn new(format: DataFormat) -> Self {
        Self {
            format,
            recordings: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Number of recordings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    /// Check if the dataset has no recordings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }

    /// Number of events.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Append a recording shaped `ticks × channels`.
    ///
    /// # Errors
    ///
    /// Returns error if the column count does not match the data format.
    pub fn add_recording(
        &mut self,
        data: Array2<f64>,
        metadata: BTreeMap<String, FieldValue>,
    ) -> Result<RecordingId> {
        if data.ncols() != self.format.num_channels() {
            return Err(Error::Dataset(format!(
                "recording has {} channels, data format expects {}",
                data.ncols(),
                self.format.num_channels()
            )));
        }
        let id = RecordingId(u32::try_from(self.recordings.len()).map_err(|_| {
            Error::Dataset("too many recordings for a 32-bit recording id".to_string())
        })?);
        let ticks = i64::try_from(data.nrows())
            .map_err(|_| Error::Dataset("recording too long".to_string()))?;
        self.recordings.push((
            RecordingInfo {
                id,
                ticks,
                metadata,
            },
            data,
        ));
        Ok(id)
    }

    /// Add an event covering `[start_tick, stop_tick)` of `recording`.
    ///
    /// # Errors
    ///
    /// Returns error if the recording is unknown or the interval is empty.
    pub fn add_event<K, V>(
        &mut self,
        recording: RecordingId,
        start_tick: i64,
        stop_tick: i64,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.recording(recording)?;
        if stop_tick <= start_tick {
            return Err(Error::Dataset(format!(
                "event interval [{start_tick}, {stop_tick}) is empty"
            )));
        }
        let event = Event {
            recording,
            start_tick,
            stop_tick,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        };
        // Keep events ordered by position; ties keep insertion order.
        let at = self
            .events
            .partition_point(|e| (e.recording, e.start_tick) <= (recording, start_tick));
        self.events.insert(at, event);
        Ok(())
    }

    fn recording(&self, id: RecordingId) -> Result<&(RecordingInfo, Array2<f64>)> {
        self.recordings
            .get(id.0 as usize)
            .ok_or_else(|| Error::Dataset(format!("unknown {id}")))
    }
}

impl Dataset for MemoryDataset {
    fn data_format(&self) -> &DataFormat {
        &self.format
    }

    fn recordings(&self) -> Vec<RecordingInfo> {
        self.recordings.iter().map(|(info, _)| info.clone()).collect()
    }

    fn events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        Ok(self
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    fn sample_block(&self, recording: RecordingId, ticks: Range<i64>) -> Result<Array2<f64>> {
        let (info, data) = self.recording(recording)?;
        if ticks.start < 0 || ticks.end > info.ticks || ticks.start > ticks.end {
            return Err(Error::Dataset(format!(
                "tick range [{}, {}) outside {recording} of {} ticks",
                ticks.start, ticks.end, info.ticks
            )));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (start, end) = (ticks.start as usize, ticks.end as usize);
        Ok(data.slice(s![start..end, ..]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dataset() -> MemoryDataset {
        let format = DataFormat::new(250.0, "uV", vec!["A".into(), "B".into()]).unwrap();
        MemoryDataset::new(format)
    }

    #[test]
    fn test_add_recording_checks_channels() {
        let mut ds = dataset();
        assert!(ds.add_recording(Array2::zeros((10, 3)), BTreeMap::new()).is_err());
        let id = ds.add_recording(Array2::zeros((10, 2)), BTreeMap::new()).unwrap();
        assert_eq!(id, RecordingId(0));
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.recordings()[0].ticks, 10);
    }

    #[test]
    fn test_events_are_position_ordered() {
        let mut ds = dataset();
        let r0 = ds.add_recording(Array2::zeros((100, 2)), BTreeMap::new()).unwrap();
        let r1 = ds.add_recording(Array2::zeros((100, 2)), BTreeMap::new()).unwrap();
        ds.add_event(r1, 5, 6, [("n", 1)]).unwrap();
        ds.add_event(r0, 50, 51, [("n", 2)]).unwrap();
        ds.add_event(r0, 10, 11, [("n", 3)]).unwrap();
        ds.add_event(r0, 10, 12, [("n", 4)]).unwrap();

        let order: Vec<_> = ds
            .events(&EventQuery::All)
            .unwrap()
            .iter()
            .map(|e| e.get("n").and_then(FieldValue::as_regressor).unwrap())
            .collect();
        assert_eq!(order, vec![3.0, 4.0, 2.0, 1.0]);
    }

    #[test]
    fn test_add_event_validation() {
        let mut ds = dataset();
        let r0 = ds.add_recording(Array2::zeros((10, 2)), BTreeMap::new()).unwrap();
        assert!(ds.add_event(r0, 5, 5, [("a", 1)]).is_err());
        assert!(ds.add_event(RecordingId(7), 0, 1, [("a", 1)]).is_err());
        assert_eq!(ds.event_count(), 0);
    }

    #[test]
    fn test_sample_block_bounds() {
        let mut ds = dataset();
        let data = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let r0 = ds.add_recording(data, BTreeMap::new()).unwrap();
        assert_eq!(ds.sample_block(r0, 1..3).unwrap(), array![[3.0, 4.0], [5.0, 6.0]]);
        assert!(ds.sample_block(r0, -1..2).is_err());
        assert!(ds.sample_block(r0, 0..4).is_err());
        assert!(ds.sample_block(RecordingId(1), 0..1).is_err());
    }
}
