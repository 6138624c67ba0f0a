//! Regression fitting
//!
//! Turns accepted subspans into jobs, runs them on an executor and folds the
//! partial statistics into one accumulator. Partials are absorbed strictly in
//! job order, whatever order they finish in, so a fit is bit-for-bit
//! reproducible across thread counts and executors.

pub mod executor;
pub mod incremental_ls;
pub mod jobs;

use crate::dataset::Dataset;
use crate::layout::DesignLayout;
use crate::spans::EpochTable;
use crate::strategy::FitStrategy;
use crate::subspan::Subspan;
use crate::Result;
use executor::ParallelExecutor;
use incremental_ls::{PartialStatistic, Solution, XtXAccumulator};
use jobs::{by_epoch_jobs, continuous_jobs, ByEpochWorker, ContinuousWorker};
use std::collections::BTreeMap;
use tracing::debug;

/// Absorbs partial statistics in job order.
///
/// Results that arrive early are parked until every job before them has been
/// absorbed.
#[derive(Debug)]
pub struct OrderedAbsorber {
    accumulator: XtXAccumulator,
    next: usize,
    parked: BTreeMap<usize, PartialStatistic>,
}

impl OrderedAbsorber {
    /// Wrap an empty accumulator.
    #[must_use]
    pub fn new(accumulator: XtXAccumulator) -> Self {
        Self {
            accumulator,
            next: 0,
            parked: BTreeMap::new(),
        }
    }

    /// Accept the result of job `index`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the partial does not fit the accumulator.
    pub fn accept(&mut self, index: usize, partial: PartialStatistic) -> Result<()> {
        self.parked.insert(index, partial);
        while let Some(partial) = self.parked.remove(&self.next) {
            self.accumulator.absorb(&partial)?;
            self.next += 1;
        }
        Ok(())
    }

    /// Number of results absorbed so far.
    #[must_use]
    pub const fn absorbed(&self) -> usize {
        self.next
    }

    /// Return the accumulator.
    ///
    /// # Panics
    ///
    /// Panics if some job's result never arrived.
    #[must_use]
    pub fn finish(self) -> XtXAccumulator {
        assert!(
            self.parked.is_empty(),
            "results parked past missing job {}",
            self.next
        );
        self.accumulator
    }
}

/// Solved regression together with the coordinate system it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct Fit {
    /// Strategy used
    pub strategy: FitStrategy,
    /// Coefficients: compact columns × (max lag, channel) for by-epoch,
    /// expanded columns × channel for continuous
    pub solution: Solution,
    /// Regression rows absorbed
    pub rows: usize,
}

/// Fit the accepted subspans with `strategy`.
///
/// # Errors
///
/// Returns the first worker failure; no partial fit is returned.
pub fn fit<D, E>(
    dataset: &D,
    executor: &E,
    subspans: &[Subspan],
    epochs: &EpochTable,
    layout: &DesignLayout,
    strategy: FitStrategy,
    rank_tolerance: f64,
) -> Result<Fit>
where
    D: Dataset + ?Sized,
    E: ParallelExecutor,
{
    let channels = dataset.data_format().num_channels();
    let accumulator = match strategy {
        FitStrategy::ByEpoch => {
            let jobs = by_epoch_jobs(subspans, epochs, layout);
            debug!(jobs = jobs.len(), "running by-epoch jobs");
            let worker = ByEpochWorker::new(dataset, layout);
            let mut absorber =
                OrderedAbsorber::new(XtXAccumulator::new(layout.compact_width(), worker.outputs()));
            executor.map_unordered(
                jobs,
                |job| worker.run(job),
                |index, partial| absorber.accept(index, partial),
            )?;
            absorber.finish()
        }
        FitStrategy::Continuous => {
            let jobs = continuous_jobs(subspans, epochs, layout);
            debug!(jobs = jobs.len(), "running continuous jobs");
            let worker = ContinuousWorker::new(dataset, layout);
            let mut absorber =
                OrderedAbsorber::new(XtXAccumulator::new(layout.expanded_width(), channels));
            executor.map_unordered(
                jobs,
                |job| worker.run(job),
                |index, partial| absorber.accept(index, partial),
            )?;
            absorber.finish()
        }
    };

    let rows = accumulator.rows();
    let solution = accumulator.solve(rank_tolerance);
    Ok(Fit {
        strategy,
        solution,
        rows,
    })
}
