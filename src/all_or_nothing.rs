//! All-or-nothing rejection
//!
//! Requests that opt into all-or-nothing rejection lose an entire epoch as
//! soon as any part of it is touched by an artifact. With overlap correction
//! on, overlapping all-or-nothing epochs share data, so rejection spreads
//! along chains of overlap until it reaches a fixpoint.

use crate::spans::{DataSpan, EpochId, EpochTable};
use crate::subspan::canonical_subspans;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use tracing::debug;

/// Intrinsic artifact attached to epochs rejected by propagation.
pub const ALL_OR_NOTHING: &str = "_ALL_OR_NOTHING";

/// Taint every all-or-nothing epoch that touches an artifact, directly or
/// through overlap with another tainted all-or-nothing epoch.
///
/// `all_or_nothing[r]` tells whether request `r` opted in. Epochs that already
/// carry an intrinsic artifact are never tainted again but still spread
/// rejection to their neighbours. Returns the number of epochs tainted.
pub fn propagate_all_or_nothing(
    spans: &[DataSpan],
    epochs: &mut EpochTable,
    all_or_nothing: &[bool],
    overlap_correction: bool,
) -> usize {
    let mut overlap_graph: FxHashMap<EpochId, FxHashSet<EpochId>> = FxHashMap::default();
    let mut pending = BTreeSet::new();
    {
        let table: &EpochTable = epochs;
        let participates = |id: &EpochId| {
            all_or_nothing
                .get(table[*id].request)
                .copied()
                .unwrap_or(false)
        };
        for subspan in canonical_subspans(spans, table, overlap_correction) {
            let relevant: Vec<EpochId> = subspan.epochs.iter().copied().filter(participates).collect();
            for &a in &relevant {
                for &b in &relevant {
                    if a != b {
                        overlap_graph.entry(a).or_default().insert(b);
                    }
                }
            }
            if !subspan.artifacts.is_empty() {
                pending.extend(
                    relevant
                        .iter()
                        .copied()
                        .filter(|id| !table[*id].has_intrinsic_artifacts()),
                );
            }
        }
    }

    let mut tainted = 0;
    while let Some(id) = pending.pop_first() {
        debug_assert!(!epochs[id].has_intrinsic_artifacts());
        epochs[id].add_intrinsic_artifact(ALL_OR_NOTHING);
        tainted += 1;
        if let Some(neighbours) = overlap_graph.get(&id) {
            pending.extend(
                neighbours
                    .iter()
                    .copied()
                    .filter(|n| !epochs[*n].has_intrinsic_artifacts()),
            );
        }
    }

    debug!(tainted, "all-or-nothing propagation finished");
    tainted
}
