//! Regression jobs and workers
//!
//! Jobs are generated single-threaded from the accepted subspans and carry
//! everything a worker needs besides the dataset, so workers share nothing
//! mutable.

use super::incremental_ls::{PartialStatistic, RegressorBlock, SparseBlock};
use crate::dataset::{Dataset, RecordingId};
use crate::layout::DesignLayout;
use crate::spans::{EpochId, EpochTable};
use crate::subspan::Subspan;
use crate::{Error, Result};
use ndarray::{s, Array2};
use std::collections::BTreeSet;

/// One fully accepted epoch, fit as a single regression row.
#[derive(Debug, Clone, PartialEq)]
pub struct ByEpochJob {
    /// Recording holding the epoch
    pub recording: RecordingId,
    /// First tick of the epoch
    pub start_tick: i64,
    /// Epoch length in ticks
    pub ticks: i64,
    /// Regressor values of the epoch
    pub design_row: Vec<f64>,
    /// Compact column of the first regressor
    pub compact_offset: usize,
}

/// Contribution of one live epoch to a continuous job.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochTerm {
    /// Regressor values of the epoch
    pub design_row: Vec<f64>,
    /// Expanded column of (first predictor, lag 0) for the epoch's request
    pub expanded_offset: usize,
    /// Window length of the epoch's request
    pub window_ticks: usize,
    /// Lag of the job's first tick within the epoch's window
    pub lag: usize,
}

/// One accepted subspan, fit as one regression row per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousJob {
    /// Recording holding the subspan
    pub recording: RecordingId,
    /// First tick of the subspan
    pub start_tick: i64,
    /// One past the last tick
    pub stop_tick: i64,
    /// Live epochs
    pub terms: Vec<EpochTerm>,
}

/// One job per fully accepted epoch, in timeline order.
///
/// Only valid when no accepted subspan holds more than one epoch and every
/// epoch touching clean data is clean throughout.
#[must_use]
pub fn by_epoch_jobs(subspans: &[Subspan], epochs: &EpochTable, layout: &DesignLayout) -> Vec<ByEpochJob> {
    let mut accepted = BTreeSet::new();
    for subspan in subspans.iter().filter(|s| s.is_clean()) {
        debug_assert_eq!(subspan.epochs.len(), 1, "by-epoch fitting with overlap");
        accepted.extend(subspan.epochs.iter().copied());
    }

    let mut ordered: Vec<EpochId> = accepted.into_iter().collect();
    ordered.sort_by_key(|id| (epochs[*id].recording, epochs[*id].start_tick, *id));
    ordered
        .into_iter()
        .filter_map(|id| {
            let epoch = &epochs[id];
            let design_row = epoch.design_row.clone()?;
            Some(ByEpochJob {
                recording: epoch.recording,
                start_tick: epoch.start_tick,
                ticks: epoch.ticks,
                design_row,
                compact_offset: layout.offsets(epoch.request).compact,
            })
        })
        .collect()
}

/// One job per accepted subspan.
#[must_use]
pub fn continuous_jobs(
    subspans: &[Subspan],
    epochs: &EpochTable,
    layout: &DesignLayout,
) -> Vec<ContinuousJob> {
    subspans
        .iter()
        .filter(|s| s.is_clean())
        .map(|subspan| {
            let terms = subspan
                .epochs
                .iter()
                .filter_map(|id| {
                    let epoch = &epochs[*id];
                    let lag = usize::try_from(subspan.start.tick - epoch.start_tick)
                        .unwrap_or_else(|_| {
                            panic!(
                                "subspan at {} starts before live epoch {} at tick {}",
                                subspan.start, id.0, epoch.start_tick
                            )
                        });
                    let design_row = epoch.design_row.clone()?;
                    Some(EpochTerm {
                        design_row,
                        expanded_offset: layout.offsets(epoch.request).expanded,
                        window_ticks: layout.ticks(epoch.request),
                        lag,
                    })
                })
                .collect();
            ContinuousJob {
                recording: subspan.start.recording,
                start_tick: subspan.start.tick,
                stop_tick: subspan.stop.tick,
                terms,
            }
        })
        .collect()
}

fn worker_error(what: &str, recording: RecordingId, start: i64, stop: i64, e: &Error) -> Error {
    Error::Worker(format!("{what} [{start}, {stop}) of {recording}: {e}"))
}

/// Reject sample blocks that are not `ticks × channels`.
fn check_block(data: &Array2<f64>, ticks: i64, channels: usize) -> Result<()> {
    let rows = i64::try_from(data.nrows()).unwrap_or(i64::MAX);
    if rows != ticks || data.ncols() != channels {
        return Err(Error::shape(
            format!("{ticks} ticks × {channels} channels"),
            format!("{} ticks × {} channels", data.nrows(), data.ncols()),
        ));
    }
    Ok(())
}

/// Builds the single-row statistic of a [`ByEpochJob`].
///
/// Responses are flattened tick-major (`lag * channels + channel`) and
/// zero-padded to the longest window in the batch.
pub struct ByEpochWorker<'a, D: ?Sized> {
    dataset: &'a D,
    compact_width: usize,
    max_ticks: usize,
    channels: usize,
}

impl<'a, D: Dataset + ?Sized> ByEpochWorker<'a, D> {
    /// Create a worker for `layout`.
    #[must_use]
    pub fn new(dataset: &'a D, layout: &DesignLayout) -> Self {
        Self {
            dataset,
            compact_width: layout.compact_width(),
            max_ticks: layout.max_ticks(),
            channels: dataset.data_format().num_channels(),
        }
    }

    /// Response columns of every row.
    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.max_ticks * self.channels
    }

    /// Run one job.
    ///
    /// # Errors
    ///
    /// Returns `Worker` if the samples cannot be read or the dataset returns
    /// a block of the wrong shape.
    pub fn run(&self, job: ByEpochJob) -> Result<PartialStatistic> {
        let stop = job.start_tick + job.ticks;
        let data = self
            .dataset
            .sample_block(job.recording, job.start_tick..stop)
            .and_then(|data| check_block(&data, job.ticks, self.channels).map(|()| data))
            .map_err(|e| worker_error("epoch", job.recording, job.start_tick, stop, &e))?;

        let mut x = Array2::zeros((1, self.compact_width));
        let predictors = job.design_row.len();
        x.slice_mut(s![0, job.compact_offset..job.compact_offset + predictors])
            .iter_mut()
            .zip(&job.design_row)
            .for_each(|(slot, value)| *slot = *value);

        let mut y = Array2::zeros((1, self.outputs()));
        for ((lag, channel), value) in data.indexed_iter() {
            y[[0, lag * self.channels + channel]] = *value;
        }
        PartialStatistic::from_block(&RegressorBlock::Dense(x), y.view())
    }
}

/// Builds the per-tick statistic of a [`ContinuousJob`].
///
/// Each live epoch puts its regressor value for predictor `p` at expanded
/// column `offset + p * window + lag + row`. Coordinates shared by several
/// epochs add up, which is what makes overlapping responses sum.
pub struct ContinuousWorker<'a, D: ?Sized> {
    dataset: &'a D,
    expanded_width: usize,
    channels: usize,
}

impl<'a, D: Dataset + ?Sized> ContinuousWorker<'a, D> {
    /// Create a worker for `layout`.
    #[must_use]
    pub fn new(dataset: &'a D, layout: &DesignLayout) -> Self {
        Self {
            dataset,
            expanded_width: layout.expanded_width(),
            channels: dataset.data_format().num_channels(),
        }
    }

    /// Run one job.
    ///
    /// # Errors
    ///
    /// Returns `Worker` if the samples cannot be read or the dataset returns
    /// a block of the wrong shape.
    pub fn run(&self, job: ContinuousJob) -> Result<PartialStatistic> {
        let data = self
            .dataset
            .sample_block(job.recording, job.start_tick..job.stop_tick)
            .and_then(|data| {
                check_block(&data, job.stop_tick - job.start_tick, self.channels).map(|()| data)
            })
            .map_err(|e| worker_error("subspan", job.recording, job.start_tick, job.stop_tick, &e))?;
        let rows = data.nrows();

        let mut x = SparseBlock::new(rows, self.expanded_width);
        for term in &job.terms {
            for (predictor, &value) in term.design_row.iter().enumerate() {
                if value == 0.0 {
                    continue;
                }
                let base = term.expanded_offset + predictor * term.window_ticks + term.lag;
                for row in 0..rows {
                    x.push(row, base + row, value)?;
                }
            }
        }
        PartialStatistic::from_block(&RegressorBlock::Sparse(x), data.view())
    }
}
