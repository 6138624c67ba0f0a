//! Artifact accounting
//!
//! Tallies how much of the requested data survives artifact rejection, once
//! for the whole batch and once per request. The global bucket also drives
//! strategy selection.

use crate::all_or_nothing::ALL_OR_NOTHING;
use crate::spans::{EpochId, EpochTable};
use crate::subspan::Subspan;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ticks touched by one artifact type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactTally {
    /// Ticks where this artifact is present
    pub affected_ticks: i64,
    /// Ticks where this artifact is the only one present
    pub unique_ticks: i64,
}

/// Accounting bucket.
///
/// "Event ticks" weight each tick by the number of epochs that claim it, so
/// `event_ticks_accepted / ticks_accepted` is the mean overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Epochs in this bucket
    pub epochs_requested: u64,
    /// Epochs that never touched an artifact
    pub epochs_fully_accepted: u64,
    /// Epochs with both clean and rejected ticks
    pub epochs_partially_accepted: u64,
    /// Epochs with no clean tick at all
    pub epochs_fully_rejected: u64,
    /// Ticks covered by at least one epoch
    pub ticks_requested: i64,
    /// Requested ticks free of artifacts
    pub ticks_accepted: i64,
    /// Requested ticks weighted by epoch multiplicity
    pub event_ticks_requested: i64,
    /// Accepted ticks weighted by epoch multiplicity
    pub event_ticks_accepted: i64,
    /// Requested ticks claimed by exactly one epoch
    pub no_overlap_ticks_requested: i64,
    /// Accepted ticks claimed by exactly one epoch
    pub no_overlap_ticks_accepted: i64,
    /// Per artifact type, in label order
    pub artifacts: BTreeMap<String, ArtifactTally>,
}

impl ArtifactInfo {
    fn count_requested(&mut self, ticks: i64, multiplicity: i64, no_overlap_ticks: i64) {
        self.ticks_requested += ticks;
        self.event_ticks_requested += ticks * multiplicity;
        self.no_overlap_ticks_requested += no_overlap_ticks;
    }

    fn count_accepted(&mut self, ticks: i64, multiplicity: i64, no_overlap_ticks: i64) {
        self.ticks_accepted += ticks;
        self.event_ticks_accepted += ticks * multiplicity;
        self.no_overlap_ticks_accepted += no_overlap_ticks;
    }

    fn count_artifacts(&mut self, artifacts: &[&str], ticks: i64) {
        let unique = artifacts.len() == 1;
        for label in artifacts {
            let tally = self.artifacts.entry((*label).to_string()).or_default();
            tally.affected_ticks += ticks;
            if unique {
                tally.unique_ticks += ticks;
            }
        }
    }

    fn classify(&mut self, with_data: bool, with_artifacts: bool) {
        self.epochs_requested += 1;
        if !with_artifacts {
            self.epochs_fully_accepted += 1;
        } else if !with_data {
            self.epochs_fully_rejected += 1;
        } else {
            self.epochs_partially_accepted += 1;
        }
    }
}

/// Finished accounting for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounting {
    /// Whole batch
    pub global: ArtifactInfo,
    /// One bucket per request, in request order
    pub per_request: Vec<ArtifactInfo>,
}

/// Single pass accumulator over a subspan stream.
#[derive(Debug)]
pub struct Accountant {
    global: ArtifactInfo,
    per_request: Vec<ArtifactInfo>,
    epochs_with_data: FxHashSet<EpochId>,
    epochs_with_artifacts: FxHashSet<EpochId>,
}

impl Accountant {
    /// Create an accountant for a batch of `requests` requests.
    #[must_use]
    pub fn new(requests: usize) -> Self {
        Self {
            global: ArtifactInfo::default(),
            per_request: vec![ArtifactInfo::default(); requests],
            epochs_with_data: FxHashSet::default(),
            epochs_with_artifacts: FxHashSet::default(),
        }
    }

    /// Add one subspan to every bucket it touches.
    ///
    /// A request's multiplicity is the number of its own epochs live in the
    /// subspan; overlap-free ticks require exactly one live epoch overall.
    pub fn count(&mut self, subspan: &Subspan, epochs: &EpochTable) {
        if subspan.epochs.is_empty() {
            return;
        }
        let ticks = subspan.ticks();
        let multiplicity = subspan.epochs.len() as i64;
        let no_overlap_ticks = if subspan.epochs.len() == 1 { ticks } else { 0 };

        let mut request_multiplicity: FxHashMap<usize, i64> = FxHashMap::default();
        for id in &subspan.epochs {
            *request_multiplicity.entry(epochs[*id].request).or_default() += 1;
        }

        self.global.count_requested(ticks, multiplicity, no_overlap_ticks);
        for (&request, &m) in &request_multiplicity {
            self.per_request[request].count_requested(ticks, m, no_overlap_ticks);
        }

        if subspan.is_clean() {
            self.epochs_with_data.extend(subspan.epochs.iter().copied());
            self.global.count_accepted(ticks, multiplicity, no_overlap_ticks);
            for (&request, &m) in &request_multiplicity {
                self.per_request[request].count_accepted(ticks, m, no_overlap_ticks);
            }
        } else {
            self.epochs_with_artifacts.extend(subspan.epochs.iter().copied());
            // All-or-nothing rejection only covers what no real artifact
            // already explains, so a real artifact takes the credit.
            let mut artifacts: Vec<&str> = subspan.artifacts.iter().map(String::as_str).collect();
            if artifacts.len() >= 2 {
                artifacts.retain(|label| *label != ALL_OR_NOTHING);
            }
            self.global.count_artifacts(&artifacts, ticks);
            for &request in request_multiplicity.keys() {
                self.per_request[request].count_artifacts(&artifacts, ticks);
            }
        }
    }

    /// Classify every epoch seen and return the finished buckets.
    #[must_use]
    pub fn close(mut self, epochs: &EpochTable) -> Accounting {
        for (id, epoch) in epochs.iter() {
            let with_data = self.epochs_with_data.contains(&id);
            let with_artifacts = self.epochs_with_artifacts.contains(&id);
            if !with_data && !with_artifacts {
                continue;
            }
            self.global.classify(with_data, with_artifacts);
            self.per_request[epoch.request].classify(with_data, with_artifacts);
        }
        Accounting {
            global: self.global,
            per_request: self.per_request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RecordingId;
    use crate::spans::{DataSpan, Epoch, Position};
    use crate::subspan::canonical_subspans;

    fn pos(tick: i64) -> Position {
        Position::new(RecordingId(0), tick)
    }

    fn run(spans: &[DataSpan], epochs: &EpochTable, requests: usize, oc: bool) -> Accounting {
        let mut accountant = Accountant::new(requests);
        for subspan in canonical_subspans(spans, epochs, oc) {
            accountant.count(&subspan, epochs);
        }
        accountant.close(epochs)
    }

    #[test]
    fn test_two_requests_one_artifact() {
        let mut epochs = EpochTable::new();
        let a = epochs.insert(Epoch::new(RecordingId(0), 0, 10, Some(vec![1.0]), 0));
        let b = epochs.insert(Epoch::new(RecordingId(0), 5, 10, Some(vec![1.0]), 1));
        let spans = vec![
            DataSpan::epoch(pos(0), pos(10), a),
            DataSpan::epoch(pos(5), pos(15), b),
            DataSpan::artifact(pos(12), pos(14), "blink"),
        ];
        let accounting = run(&spans, &epochs, 2, true);

        let g = &accounting.global;
        assert_eq!(g.ticks_requested, 15);
        assert_eq!(g.ticks_accepted, 13);
        assert_eq!(g.event_ticks_requested, 20);
        assert_eq!(g.event_ticks_accepted, 18);
        assert_eq!(g.no_overlap_ticks_requested, 10);
        assert_eq!(g.no_overlap_ticks_accepted, 8);
        assert_eq!(
            g.artifacts["blink"],
            ArtifactTally {
                affected_ticks: 2,
                unique_ticks: 2
            }
        );
        assert_eq!(
            (g.epochs_requested, g.epochs_fully_accepted, g.epochs_partially_accepted, g.epochs_fully_rejected),
            (2, 1, 1, 0)
        );

        let r0 = &accounting.per_request[0];
        assert_eq!(r0.ticks_requested, 10);
        assert_eq!(r0.ticks_accepted, 10);
        assert_eq!(r0.event_ticks_requested, 10);
        assert_eq!(r0.no_overlap_ticks_requested, 5);
        assert!(r0.artifacts.is_empty());
        assert_eq!(r0.epochs_fully_accepted, 1);

        let r1 = &accounting.per_request[1];
        assert_eq!(r1.ticks_requested, 10);
        assert_eq!(r1.ticks_accepted, 8);
        assert_eq!(r1.event_ticks_accepted, 8);
        assert_eq!(r1.no_overlap_ticks_requested, 5);
        assert_eq!(r1.no_overlap_ticks_accepted, 3);
        assert_eq!(r1.artifacts["blink"].affected_ticks, 2);
        assert_eq!(r1.epochs_partially_accepted, 1);
    }

    #[test]
    fn test_same_request_multiplicity() {
        let mut epochs = EpochTable::new();
        let a = epochs.insert(Epoch::new(RecordingId(0), 0, 10, Some(vec![1.0]), 0));
        let b = epochs.insert(Epoch::new(RecordingId(0), 5, 10, Some(vec![1.0]), 0));
        let spans = vec![
            DataSpan::epoch(pos(0), pos(10), a),
            DataSpan::epoch(pos(5), pos(15), b),
        ];
        let accounting = run(&spans, &epochs, 1, true);
        assert_eq!(accounting.per_request[0], accounting.global);
        assert_eq!(accounting.global.event_ticks_accepted, 20);
        assert_eq!(accounting.global.ticks_accepted, 15);

        let private = run(&spans, &epochs, 1, false);
        assert_eq!(private.global.ticks_accepted, 20);
        assert_eq!(private.global.event_ticks_accepted, 20);
        assert_eq!(private.global.no_overlap_ticks_accepted, 20);
    }

    #[test]
    fn test_real_artifact_takes_credit_from_all_or_nothing() {
        let mut epochs = EpochTable::new();
        let mut epoch = Epoch::new(RecordingId(0), 0, 10, Some(vec![1.0]), 0);
        epoch.add_intrinsic_artifact(ALL_OR_NOTHING);
        let a = epochs.insert(epoch);
        let spans = vec![
            DataSpan::epoch(pos(0), pos(10), a),
            DataSpan::artifact(pos(2), pos(5), "blink"),
            DataSpan::artifact(pos(4), pos(6), "muscle"),
        ];
        let accounting = run(&spans, &epochs, 1, true);
        let artifacts = &accounting.global.artifacts;
        assert_eq!(
            artifacts[ALL_OR_NOTHING],
            ArtifactTally {
                affected_ticks: 6,
                unique_ticks: 6
            }
        );
        assert_eq!(
            artifacts["blink"],
            ArtifactTally {
                affected_ticks: 3,
                unique_ticks: 2
            }
        );
        assert_eq!(
            artifacts["muscle"],
            ArtifactTally {
                affected_ticks: 2,
                unique_ticks: 1
            }
        );
        assert_eq!(accounting.global.ticks_accepted, 0);
        assert_eq!(accounting.global.epochs_fully_rejected, 1);
    }
}
