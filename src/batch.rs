//! Batch driver
//!
//! Runs the whole pipeline for a list of requests:
//! extraction, all-or-nothing propagation (only when some request asks for
//! it), accounting, strategy selection, layout, fitting and assembly.

use crate::accounting::Accountant;
use crate::all_or_nothing::propagate_all_or_nothing;
use crate::config::FitConfig;
use crate::dataset::Dataset;
use crate::formula::{LinearFormula, RegressorEvaluator};
use crate::layout::DesignLayout;
use crate::regression::executor::ParallelExecutor;
#[cfg(feature = "rayon")]
use crate::regression::executor::RayonExecutor;
#[cfg(not(feature = "rayon"))]
use crate::regression::executor::SerialExecutor;
use crate::regression::fit;
use crate::request::{check_unique_names, RerpRequest};
use crate::result::{assemble, RerpAnalysis, Stages};
use crate::spans::extract_spans;
use crate::strategy::StrategySelector;
use crate::subspan::{canonical_subspans, Subspan};
use crate::Result;
use tracing::{debug, info, warn};

/// Fit `requests` jointly with the additive formula evaluator and the
/// default executor (a rayon pool when the `rayon` feature is on).
///
/// # Errors
///
/// Returns the first configuration, dataset or worker error; see
/// [`multi_rerp_with`].
pub fn multi_rerp<D: Dataset + ?Sized>(
    dataset: &D,
    requests: &[RerpRequest],
    config: &FitConfig,
) -> Result<RerpAnalysis> {
    let executor = default_executor(config)?;
    multi_rerp_with(dataset, &LinearFormula, &executor, requests, config)
}

#[cfg(feature = "rayon")]
fn default_executor(config: &FitConfig) -> Result<RayonExecutor> {
    RayonExecutor::new(config.thread_limit())
}

#[cfg(not(feature = "rayon"))]
#[allow(clippy::unnecessary_wraps)]
const fn default_executor(_config: &FitConfig) -> Result<SerialExecutor> {
    Ok(SerialExecutor)
}

/// Fit `requests` jointly with explicit collaborators.
///
/// # Errors
///
/// - `Config` if the configuration is invalid
/// - `DuplicateRequestName` if two requests share a name
/// - `InvalidRequest`, `EmptyWindow`, `Formula` or `ArtifactTypeNotText`
///   from span extraction
/// - `StrategyInfeasible` if `by-epoch` was forced but is not possible
/// - `Worker` if any fitting job fails
pub fn multi_rerp_with<D, F, E>(
    dataset: &D,
    evaluator: &F,
    executor: &E,
    requests: &[RerpRequest],
    config: &FitConfig,
) -> Result<RerpAnalysis>
where
    D: Dataset + ?Sized,
    F: RegressorEvaluator + ?Sized,
    E: ParallelExecutor,
{
    config.validate()?;
    check_unique_names(requests)?;
    let overlap_correction = config.is_overlap_corrected();

    let mut extraction = extract_spans(
        dataset,
        evaluator,
        requests,
        config.artifact_selector(),
        config.artifact_field(),
    )?;

    let all_or_nothing: Vec<bool> = requests.iter().map(RerpRequest::all_or_nothing).collect();
    if all_or_nothing.iter().any(|&flag| flag) {
        propagate_all_or_nothing(
            &extraction.spans,
            &mut extraction.epochs,
            &all_or_nothing,
            overlap_correction,
        );
    }

    let mut accountant = Accountant::new(requests.len());
    let mut accepted: Vec<Subspan> = Vec::new();
    let mut total = 0_usize;
    for subspan in canonical_subspans(&extraction.spans, &extraction.epochs, overlap_correction) {
        total += 1;
        accountant.count(&subspan, &extraction.epochs);
        if subspan.is_clean() {
            accepted.push(subspan);
        }
    }
    let accounting = accountant.close(&extraction.epochs);
    debug!(subspans = total, accepted = accepted.len(), "subspans counted");

    let strategy = StrategySelector::select(config.strategy(), &accounting.global)?;
    info!(
        requested = %config.strategy(),
        %strategy,
        epochs = accounting.global.epochs_requested,
        "regression strategy selected"
    );

    let layout = DesignLayout::new(&extraction.plans);
    let fitted = fit(
        dataset,
        executor,
        &accepted,
        &extraction.epochs,
        &layout,
        strategy,
        config.tolerance(),
    )?;
    if !fitted.solution.dropped_columns.is_empty() {
        warn!(
            dropped = fitted.solution.dropped_columns.len(),
            "design columns not identifiable from the data; their betas are zero"
        );
    }

    let analysis = assemble(Stages {
        data_format: dataset.data_format(),
        plans: extraction.plans,
        layout: &layout,
        accounting,
        fit: fitted,
        overlap_correction,
    });
    info!(
        wanted_ticks = analysis.total_wanted_ticks(),
        good_ticks = analysis.total_good_ticks(),
        bad_ticks = analysis.total_bad_ticks(),
        mean_overlap = analysis.mean_overlap(),
        "batch fit finished"
    );
    Ok(analysis)
}
