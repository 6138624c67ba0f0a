//! Canonical subspan generation
//!
//! Sweep-line over interval boundaries. Each span contributes a `+1` at its
//! start and a `-1` at its stop; boundaries are sorted by position and every
//! boundary at a position is applied before a subspan ending there is
//! emitted, so live multiplicities are exact.
//!
//! With overlap correction on, every interval of constant membership yields
//! one subspan naming all live epochs. With it off, each live epoch gets its
//! own subspan over its private copy of the samples, and only that epoch's
//! intrinsic artifacts apply to it.

use crate::spans::{DataSpan, EpochId, EpochTable, Position};
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, VecDeque};
use std::hash::Hash;

/// Maximal interval with constant live epochs and artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspan {
    /// Inclusive start
    pub start: Position,
    /// Exclusive stop (same recording as `start`)
    pub stop: Position,
    /// Live epochs, ascending by id
    pub epochs: Vec<EpochId>,
    /// Effective artifacts: live artifact spans plus intrinsic artifacts
    pub artifacts: BTreeSet<String>,
}

impl Subspan {
    /// Length in ticks.
    #[must_use]
    pub const fn ticks(&self) -> i64 {
        self.stop.tick - self.start.tick
    }

    /// True when no artifact applies, i.e. the data is usable.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Boundary<'a> {
    position: Position,
    epoch: Option<EpochId>,
    artifact: Option<&'a str>,
    opening: bool,
}

/// Iterator over canonical subspans of a span list.
///
/// Created by [`canonical_subspans`].
pub struct CanonicalSubspans<'a> {
    epochs: &'a EpochTable,
    overlap_correction: bool,
    boundaries: Vec<Boundary<'a>>,
    cursor: usize,
    last_position: Option<Position>,
    live_epochs: FxHashMap<EpochId, u32>,
    live_artifacts: FxHashMap<&'a str, u32>,
    pending: VecDeque<Subspan>,
    finished: bool,
}

/// Partition `spans` into canonical subspans.
///
/// # Panics
///
/// Panics if an interval closes before it opens or is still open once the
/// sweep ends. Neither can happen for spans produced by extraction.
#[must_use]
pub fn canonical_subspans<'a>(
    spans: &'a [DataSpan],
    epochs: &'a EpochTable,
    overlap_correction: bool,
) -> CanonicalSubspans<'a> {
    let mut boundaries = Vec::with_capacity(spans.len() * 2);
    for span in spans {
        let artifact = span.artifact.as_deref();
        boundaries.push(Boundary {
            position: span.start,
            epoch: span.epoch,
            artifact,
            opening: true,
        });
        boundaries.push(Boundary {
            position: span.stop,
            epoch: span.epoch,
            artifact,
            opening: false,
        });
    }
    // Stable: a span's own start always precedes its stop.
    boundaries.sort_by_key(|b| b.position);

    CanonicalSubspans {
        epochs,
        overlap_correction,
        boundaries,
        cursor: 0,
        last_position: None,
        live_epochs: FxHashMap::default(),
        live_artifacts: FxHashMap::default(),
        pending: VecDeque::new(),
        finished: false,
    }
}

fn apply<K: Eq + Hash + Copy>(live: &mut FxHashMap<K, u32>, key: K, opening: bool, at: Position) {
    match live.entry(key) {
        Entry::Occupied(mut entry) => {
            if opening {
                *entry.get_mut() += 1;
            } else {
                *entry.get_mut() -= 1;
                if *entry.get() == 0 {
                    entry.remove();
                }
            }
        }
        Entry::Vacant(entry) => {
            assert!(opening, "interval closed at {at} before it was opened");
            entry.insert(1);
        }
    }
}

impl CanonicalSubspans<'_> {
    fn emit(&mut self, start: Position, stop: Position) {
        let live_artifacts: BTreeSet<String> = self
            .live_artifacts
            .keys()
            .map(|label| (*label).to_string())
            .collect();

        if self.overlap_correction {
            let mut epochs: Vec<EpochId> = self.live_epochs.keys().copied().collect();
            epochs.sort_unstable();
            let mut artifacts = live_artifacts;
            for id in &epochs {
                artifacts.extend(self.epochs[*id].intrinsic_artifacts().iter().cloned());
            }
            self.pending.push_back(Subspan {
                start,
                stop,
                epochs,
                artifacts,
            });
        } else {
            let mut epochs: Vec<EpochId> = self.live_epochs.keys().copied().collect();
            epochs.sort_unstable_by_key(|id| (self.epochs[*id].start_tick, *id));
            for id in epochs {
                let mut artifacts = live_artifacts.clone();
                artifacts.extend(self.epochs[id].intrinsic_artifacts().iter().cloned());
                self.pending.push_back(Subspan {
                    start,
                    stop,
                    epochs: vec![id],
                    artifacts,
                });
            }
        }
    }
}

impl Iterator for CanonicalSubspans<'_> {
    type Item = Subspan;

    fn next(&mut self) -> Option<Subspan> {
        loop {
            if let Some(subspan) = self.pending.pop_front() {
                return Some(subspan);
            }
            if self.finished {
                return None;
            }
            let Some(boundary) = self.boundaries.get(self.cursor).copied() else {
                self.finished = true;
                assert!(
                    self.live_epochs.is_empty() && self.live_artifacts.is_empty(),
                    "sweep ended with {} epochs and {} artifacts still live",
                    self.live_epochs.len(),
                    self.live_artifacts.len()
                );
                continue;
            };
            self.cursor += 1;

            if let Some(last) = self.last_position {
                if last != boundary.position && !self.live_epochs.is_empty() {
                    self.emit(last, boundary.position);
                }
            }
            if let Some(epoch) = boundary.epoch {
                apply(&mut self.live_epochs, epoch, boundary.opening, boundary.position);
            }
            if let Some(artifact) = boundary.artifact {
                apply(
                    &mut self.live_artifacts,
                    artifact,
                    boundary.opening,
                    boundary.position,
                );
            }
            self.last_position = Some(boundary.position);
        }
    }
}

impl std::iter::FusedIterator for CanonicalSubspans<'_> {}
