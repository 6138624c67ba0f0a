//! Analysis results
//!
//! A finished batch is a [`RerpAnalysis`]: one [`Rerp`] per request plus the
//! batch-wide accounting. Both are assembled in one step from the outputs of
//! every pipeline stage, so a result is never observed half-built.

use crate::accounting::{Accounting, ArtifactInfo};
use crate::dataset::DataFormat;
use crate::formula::DesignInfo;
use crate::layout::DesignLayout;
use crate::regression::Fit;
use crate::request::RerpRequest;
use crate::spans::RerpPlan;
use crate::strategy::FitStrategy;
use crate::{Error, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Regression-based ERP of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rerp {
    request: RerpRequest,
    design_info: DesignInfo,
    data_format: DataFormat,
    start_tick: i64,
    stop_tick: i64,
    betas: Array3<f64>,
    artifact_info: ArtifactInfo,
}

impl Rerp {
    /// Request name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.request.name()
    }

    /// Request that produced this result.
    #[must_use]
    pub const fn request(&self) -> &RerpRequest {
        &self.request
    }

    /// Predictor column layout.
    #[must_use]
    pub const fn design_info(&self) -> &DesignInfo {
        &self.design_info
    }

    /// Predictor names, in beta order.
    #[must_use]
    pub fn predictor_names(&self) -> &[String] {
        self.design_info.column_names()
    }

    /// Channel names, in beta order.
    #[must_use]
    pub fn channel_names(&self) -> &[String] {
        self.data_format.channel_names()
    }

    /// First tick of the window, relative to event onset.
    #[must_use]
    pub const fn start_tick(&self) -> i64 {
        self.start_tick
    }

    /// One past the last tick, relative to event onset.
    #[must_use]
    pub const fn stop_tick(&self) -> i64 {
        self.stop_tick
    }

    /// Window length in ticks.
    #[must_use]
    pub const fn ticks(&self) -> i64 {
        self.stop_tick - self.start_tick
    }

    /// Latency of every lag, in ms relative to event onset.
    #[must_use]
    pub fn latencies_ms(&self) -> Vec<f64> {
        (self.start_tick..self.stop_tick)
            .map(|tick| self.data_format.ticks_to_ms(tick))
            .collect()
    }

    /// Coefficients shaped `predictor × lag × channel`.
    #[must_use]
    pub const fn betas(&self) -> &Array3<f64> {
        &self.betas
    }

    /// `lag × channel` waveform of one predictor.
    #[must_use]
    pub fn betas_for(&self, predictor: &str) -> Option<ArrayView2<'_, f64>> {
        let index = self.design_info.index_of(predictor)?;
        Some(self.betas.index_axis(Axis(0), index))
    }

    /// Predicted `lag × channel` response for one row of predictor values.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if `predictors` has the wrong length.
    pub fn predict(&self, predictors: &[f64]) -> Result<Array2<f64>> {
        let (width, lags, channels) = self.betas.dim();
        if predictors.len() != width {
            return Err(Error::shape(
                format!("{width} predictor values"),
                format!("{} values", predictors.len()),
            ));
        }
        let mut out = Array2::zeros((lags, channels));
        for (value, betas) in predictors.iter().zip(self.betas.outer_iter()) {
            out.scaled_add(*value, &betas);
        }
        Ok(out)
    }

    /// Accounting bucket of this request.
    #[must_use]
    pub const fn artifact_info(&self) -> &ArtifactInfo {
        &self.artifact_info
    }
}

/// Result of a batch of requests fit jointly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerpAnalysis {
    rerps: Vec<Rerp>,
    overlap_correction: bool,
    strategy: FitStrategy,
    total_wanted_ticks: i64,
    total_good_ticks: i64,
    total_bad_ticks: i64,
    total_overlap_ticks: i64,
    mean_overlap: f64,
    artifact_info: ArtifactInfo,
    dropped_columns: usize,
    regression_rows: usize,
}

impl RerpAnalysis {
    /// Per-request results, in request order.
    #[must_use]
    pub fn rerps(&self) -> &[Rerp] {
        &self.rerps
    }

    /// Result for the request called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rerp> {
        self.rerps.iter().find(|r| r.name() == name)
    }

    /// Whether overlapping epochs shared one copy of the data.
    #[must_use]
    pub const fn overlap_correction(&self) -> bool {
        self.overlap_correction
    }

    /// Strategy the fit actually used.
    #[must_use]
    pub const fn strategy(&self) -> FitStrategy {
        self.strategy
    }

    /// Ticks covered by at least one epoch.
    #[must_use]
    pub const fn total_wanted_ticks(&self) -> i64 {
        self.total_wanted_ticks
    }

    /// Wanted ticks that entered the fit.
    #[must_use]
    pub const fn total_good_ticks(&self) -> i64 {
        self.total_good_ticks
    }

    /// Wanted ticks rejected by artifacts.
    #[must_use]
    pub const fn total_bad_ticks(&self) -> i64 {
        self.total_bad_ticks
    }

    /// Good ticks claimed by more than one epoch.
    #[must_use]
    pub const fn total_overlap_ticks(&self) -> i64 {
        self.total_overlap_ticks
    }

    /// Mean number of epochs claiming each good tick (0 without good ticks).
    #[must_use]
    pub const fn mean_overlap(&self) -> f64 {
        self.mean_overlap
    }

    /// Batch-wide accounting bucket.
    #[must_use]
    pub const fn artifact_info(&self) -> &ArtifactInfo {
        &self.artifact_info
    }

    /// Design columns the data could not identify (their betas are zero).
    #[must_use]
    pub const fn dropped_columns(&self) -> usize {
        self.dropped_columns
    }

    /// Regression rows that entered the fit.
    #[must_use]
    pub const fn regression_rows(&self) -> usize {
        self.regression_rows
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Everything [`assemble`] needs, one field per pipeline stage.
pub struct Stages<'a> {
    /// Format of the dataset that was fit
    pub data_format: &'a DataFormat,
    /// Per-request extraction results
    pub plans: Vec<RerpPlan>,
    /// Column layout
    pub layout: &'a DesignLayout,
    /// Accounting buckets
    pub accounting: Accounting,
    /// Solved regression
    pub fit: Fit,
    /// Whether overlap correction was on
    pub overlap_correction: bool,
}

/// Cut the solved coefficients into per-request tensors and package them.
///
/// # Panics
///
/// Panics if the coefficient matrix does not match the layout, which would be
/// a bug in the fitting stage.
#[must_use]
pub fn assemble(stages: Stages<'_>) -> RerpAnalysis {
    let Stages {
        data_format,
        plans,
        layout,
        accounting,
        fit,
        overlap_correction,
    } = stages;
    let channels = data_format.num_channels();
    let coefficients = &fit.solution.coefficients;
    let expected = match fit.strategy {
        FitStrategy::ByEpoch => (layout.compact_width(), layout.max_ticks() * channels),
        FitStrategy::Continuous => (layout.expanded_width(), channels),
    };
    assert_eq!(coefficients.dim(), expected, "coefficient matrix does not match layout");

    let mut per_request = accounting.per_request.into_iter();
    let rerps = plans
        .into_iter()
        .map(|plan| {
            let index = plan.index;
            let offsets = layout.offsets(index);
            let predictors = layout.predictors(index);
            let ticks = layout.ticks(index);
            let betas = Array3::from_shape_fn((predictors, ticks, channels), |(p, t, c)| {
                match fit.strategy {
                    FitStrategy::ByEpoch => coefficients[[offsets.compact + p, t * channels + c]],
                    FitStrategy::Continuous => {
                        coefficients[[layout.expanded_column(index, p, t), c]]
                    }
                }
            });
            assert_eq!(betas.dim(), (plan.design_info.width(), ticks, channels));
            Rerp {
                request: plan.request,
                design_info: plan.design_info,
                data_format: data_format.clone(),
                start_tick: plan.start_tick,
                stop_tick: plan.stop_tick,
                betas,
                artifact_info: per_request.next().unwrap_or_default(),
            }
        })
        .collect();

    let global = accounting.global;
    #[allow(clippy::cast_precision_loss)]
    let mean_overlap = if global.ticks_accepted > 0 {
        global.event_ticks_accepted as f64 / global.ticks_accepted as f64
    } else {
        0.0
    };
    RerpAnalysis {
        rerps,
        overlap_correction,
        strategy: fit.strategy,
        total_wanted_ticks: global.ticks_requested,
        total_good_ticks: global.ticks_accepted,
        total_bad_ticks: global.ticks_requested - global.ticks_accepted,
        total_overlap_ticks: global.ticks_accepted - global.no_overlap_ticks_accepted,
        mean_overlap,
        dropped_columns: fit.solution.dropped_columns.len(),
        regression_rows: fit.rows,
        artifact_info: global,
    }
}
