//! End-to-end batch fits over in-memory recordings
//!
//! Covers:
//! 1. Overlap bookkeeping with and without overlap correction
//! 2. Recovery of known responses from overlapping epochs
//! 3. All-or-nothing rejection along an overlap chain
//! 4. Partial rejection, recording edges and missing predictors
//! 5. Recordings longer than 2^31 ticks served lazily

use ndarray::Array2;
use rerp::dataset::{
    DataFormat, Dataset, Event, EventQuery, FieldValue, MemoryDataset, RecordingId, RecordingInfo,
};
use rerp::regression::executor::SerialExecutor;
use rerp::{
    multi_rerp, multi_rerp_with, Error, FitConfig, FitStrategy, RegressionStrategy, RerpRequest,
};
use rerp::formula::LinearFormula;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn one_channel() -> MemoryDataset {
    MemoryDataset::new(DataFormat::new(1000.0, "uV", vec!["Cz".into()]).unwrap())
}

fn target() -> EventQuery {
    EventQuery::IsTrue("target".into())
}

/// Superimpose `response` (lag × 1) at every onset.
fn superimpose(ticks: usize, onsets: &[(usize, f64)], responses: &[Vec<f64>]) -> Array2<f64> {
    let mut data = Array2::zeros((ticks, 1));
    for &(onset, x) in onsets {
        for (lag, value) in responses[0].iter().enumerate() {
            data[[onset + lag, 0]] += value;
        }
        if let Some(slope) = responses.get(1) {
            for (lag, value) in slope.iter().enumerate() {
                data[[onset + lag, 0]] += x * value;
            }
        }
    }
    data
}

fn fit_serial(
    dataset: &MemoryDataset,
    requests: &[RerpRequest],
    config: &FitConfig,
) -> rerp::Result<rerp::RerpAnalysis> {
    multi_rerp_with(dataset, &LinearFormula, &SerialExecutor, requests, config)
}

#[test]
fn test_overlap_correction_splits_shared_ticks() {
    init_tracing();
    let truth: Vec<f64> = (0..10).map(|l| 2.0 + f64::from(l).sin()).collect();
    let mut dataset = one_channel();
    let rec = dataset
        .add_recording(superimpose(100, &[(20, 0.0), (25, 0.0)], &[truth.clone()]), Default::default())
        .unwrap();
    dataset.add_event(rec, 20, 21, [("target", true)]).unwrap();
    dataset.add_event(rec, 25, 26, [("target", true)]).unwrap();

    let request = RerpRequest::new(target(), 0.0, 9.0).unwrap();
    let analysis = fit_serial(&dataset, &[request], &FitConfig::default()).unwrap();

    // [20,25) {A}, [25,30) {A,B}, [30,35) {B}
    assert_eq!(analysis.strategy(), FitStrategy::Continuous);
    assert_eq!(analysis.total_wanted_ticks(), 15);
    assert_eq!(analysis.total_good_ticks(), 15);
    assert_eq!(analysis.total_bad_ticks(), 0);
    assert_eq!(analysis.total_overlap_ticks(), 5);
    assert!((analysis.mean_overlap() - 20.0 / 15.0).abs() < 1e-12);
    assert_eq!(analysis.artifact_info().event_ticks_requested, 20);
    assert_eq!(analysis.artifact_info().no_overlap_ticks_accepted, 10);
    assert_eq!(analysis.regression_rows(), 15);
    assert_eq!(analysis.dropped_columns(), 0);

    let betas = analysis.rerps()[0].betas();
    assert_eq!(betas.dim(), (1, 10, 1));
    for (lag, expected) in truth.iter().enumerate() {
        assert!(
            (betas[[0, lag, 0]] - expected).abs() < 1e-9,
            "lag {lag}: {} != {expected}",
            betas[[0, lag, 0]]
        );
    }
}

#[test]
fn test_without_overlap_correction_each_epoch_gets_a_copy() {
    init_tracing();
    let mut dataset = one_channel();
    let ramp = Array2::from_shape_fn((100, 1), |(t, _)| t as f64);
    let rec = dataset.add_recording(ramp, Default::default()).unwrap();
    dataset.add_event(rec, 20, 21, [("target", true)]).unwrap();
    dataset.add_event(rec, 25, 26, [("target", true)]).unwrap();

    let request = RerpRequest::new(target(), 0.0, 9.0).unwrap();
    let config = FitConfig::default().overlap_correction(false);
    let analysis = fit_serial(&dataset, &[request], &config).unwrap();

    assert!(!analysis.overlap_correction());
    assert_eq!(analysis.strategy(), FitStrategy::ByEpoch);
    assert_eq!(analysis.total_wanted_ticks(), 20);
    assert_eq!(analysis.total_overlap_ticks(), 0);
    assert!((analysis.mean_overlap() - 1.0).abs() < 1e-12);
    assert_eq!(analysis.artifact_info().epochs_fully_accepted, 2);

    // Plain average of the two windows.
    let betas = analysis.rerps()[0].betas();
    for lag in 0..10 {
        assert!((betas[[0, lag, 0]] - (22.5 + lag as f64)).abs() < 1e-9);
    }
}

#[test]
fn test_recovers_slope_and_intercept_from_overlapping_epochs() {
    init_tracing();
    let intercept: Vec<f64> = (0..20).map(|l| (f64::from(l) / 3.0).cos()).collect();
    let slope: Vec<f64> = (0..20).map(|l| 0.1 * f64::from(l) - 0.7).collect();
    let onsets: Vec<(usize, f64)> = (0..25_usize)
        .map(|k| (10 + 13 * k + (k * 7) % 5, ((k * 37) % 11) as f64 - 5.0))
        .collect();
    let data = superimpose(400, &onsets, &[intercept.clone(), slope.clone()]);

    let mut dataset = one_channel();
    let rec = dataset.add_recording(data, Default::default()).unwrap();
    for &(onset, x) in &onsets {
        let onset = onset as i64;
        dataset
            .add_event(
                rec,
                onset,
                onset + 1,
                [("target", FieldValue::from(true)), ("x", FieldValue::from(x))],
            )
            .unwrap();
    }

    let request = RerpRequest::builder(target(), 0.0, 19.0)
        .formula("~ 1 + x")
        .name("slope")
        .build()
        .unwrap();
    let analysis = fit_serial(&dataset, &[request], &FitConfig::default()).unwrap();
    assert_eq!(analysis.strategy(), FitStrategy::Continuous);
    assert!(analysis.total_overlap_ticks() > 0);

    let rerp = analysis.get("slope").unwrap();
    assert_eq!(rerp.predictor_names(), ["Intercept".to_string(), "x".to_string()]);
    let fitted_intercept = rerp.betas_for("Intercept").unwrap();
    let fitted_slope = rerp.betas_for("x").unwrap();
    for lag in 0..20 {
        assert!((fitted_intercept[[lag, 0]] - intercept[lag]).abs() < 1e-6);
        assert!((fitted_slope[[lag, 0]] - slope[lag]).abs() < 1e-6);
    }

    let prediction = rerp.predict(&[1.0, 2.0]).unwrap();
    assert_eq!(prediction.dim(), (20, 1));
    assert!((prediction[[4, 0]] - (intercept[4] + 2.0 * slope[4])).abs() < 1e-6);
}

#[test]
fn test_all_or_nothing_rejects_the_whole_overlap_chain() {
    init_tracing();
    let mut dataset = one_channel();
    let rec = dataset
        .add_recording(Array2::from_elem((1000, 1), 3.0), Default::default())
        .unwrap();
    for onset in [100, 180, 260, 340, 600] {
        dataset.add_event(rec, onset, onset + 1, [("target", true)]).unwrap();
    }
    dataset
        .add_event(rec, 110, 111, [("_ARTIFACT_TYPE", "blink")])
        .unwrap();

    let request = RerpRequest::builder(target(), 0.0, 99.0)
        .all_or_nothing(true)
        .build()
        .unwrap();
    let analysis = fit_serial(&dataset, &[request], &FitConfig::default()).unwrap();

    let info = analysis.artifact_info();
    assert_eq!(info.epochs_requested, 5);
    assert_eq!(info.epochs_fully_rejected, 4);
    assert_eq!(info.epochs_fully_accepted, 1);
    assert_eq!(info.epochs_partially_accepted, 0);
    assert_eq!(info.ticks_requested, 440);
    assert_eq!(info.ticks_accepted, 100);

    // The blink takes credit for its own tick; the chain covers the rest.
    let blink = info.artifacts["blink"];
    assert_eq!((blink.affected_ticks, blink.unique_ticks), (1, 1));
    let chain = info.artifacts["_ALL_OR_NOTHING"];
    assert_eq!((chain.affected_ticks, chain.unique_ticks), (339, 339));

    // Only the isolated epoch is left, so by-epoch fitting is possible.
    assert_eq!(analysis.strategy(), FitStrategy::ByEpoch);
    assert!((analysis.rerps()[0].betas()[[0, 0, 0]] - 3.0).abs() < 1e-12);
}

#[test]
fn test_partial_rejection_forces_continuous() {
    init_tracing();
    let mut dataset = one_channel();
    let rec = dataset
        .add_recording(Array2::from_elem((200, 1), 1.5), Default::default())
        .unwrap();
    dataset.add_event(rec, 20, 21, [("target", true)]).unwrap();
    dataset.add_event(rec, 80, 81, [("target", true)]).unwrap();
    dataset
        .add_event(rec, 25, 30, [("_ARTIFACT_TYPE", "muscle")])
        .unwrap();
    let request = RerpRequest::new(target(), 0.0, 19.0).unwrap();

    let analysis = fit_serial(&dataset, &[request.clone()], &FitConfig::default()).unwrap();
    assert_eq!(analysis.strategy(), FitStrategy::Continuous);
    assert_eq!(analysis.artifact_info().epochs_partially_accepted, 1);
    assert_eq!(analysis.total_bad_ticks(), 5);
    assert_eq!(analysis.artifact_info().artifacts["muscle"].unique_ticks, 5);
    let betas = analysis.rerps()[0].betas();
    assert!((betas[[0, 7, 0]] - 1.5).abs() < 1e-12);

    let forced = FitConfig::default().regression_strategy(RegressionStrategy::ByEpoch);
    let err = fit_serial(&dataset, &[request], &forced).unwrap_err();
    match err {
        Error::StrategyInfeasible { reasons } => {
            assert_eq!(reasons.len(), 1);
            assert!(reasons[0].contains("all_or_nothing"));
        }
        other => panic!("expected StrategyInfeasible, got {other:?}"),
    }
}

#[test]
fn test_recording_edges_and_missing_predictors_are_rejected() {
    init_tracing();
    let mut dataset = one_channel();
    let first = dataset
        .add_recording(Array2::from_elem((50, 1), 2.0), Default::default())
        .unwrap();
    let second = dataset
        .add_recording(Array2::from_elem((50, 1), 2.0), Default::default())
        .unwrap();
    // Runs past the end of the first recording.
    dataset
        .add_event(first, 45, 46, [("target", FieldValue::from(true)), ("x", FieldValue::from(1.0))])
        .unwrap();
    dataset
        .add_event(second, 5, 6, [("target", FieldValue::from(true)), ("x", FieldValue::from(1.0))])
        .unwrap();
    dataset
        .add_event(second, 20, 21, [("target", FieldValue::from(true)), ("x", FieldValue::from(3.0))])
        .unwrap();
    // No value for x: excluded from the regression but still accounted.
    dataset.add_event(second, 35, 36, [("target", true)]).unwrap();

    let request = RerpRequest::builder(target(), 0.0, 9.0)
        .formula("~ x")
        .build()
        .unwrap();
    let analysis = fit_serial(&dataset, &[request], &FitConfig::default()).unwrap();
    let info = analysis.artifact_info();
    assert_eq!(info.epochs_requested, 4);
    assert_eq!(info.epochs_fully_accepted, 2);
    assert_eq!(info.epochs_partially_accepted, 1);
    assert_eq!(info.epochs_fully_rejected, 1);
    assert_eq!(info.artifacts["_NO_RECORDING"].affected_ticks, 5);
    assert_eq!(info.artifacts["_MISSING_PREDICTOR"].affected_ticks, 10);

    let rerp = &analysis.rerps()[0];
    assert!((rerp.betas_for("Intercept").unwrap()[[0, 0]] - 2.0).abs() < 1e-9);
    assert!(rerp.betas_for("x").unwrap()[[0, 0]].abs() < 1e-9);
}

#[test]
fn test_requests_are_fit_jointly_with_their_own_buckets() {
    init_tracing();
    let standard: Vec<f64> = (0..10).map(|l| f64::from(l) * 0.5).collect();
    let deviant: Vec<f64> = (0..10).map(|l| 4.0 - f64::from(l) * 0.25).collect();
    let mut data = superimpose(300, &[(20, 0.0), (100, 0.0)], &[standard.clone()]);
    data += &superimpose(300, &[(26, 0.0), (180, 0.0)], &[deviant.clone()]);

    let mut dataset = one_channel();
    let rec = dataset.add_recording(data, Default::default()).unwrap();
    for onset in [20, 100] {
        dataset.add_event(rec, onset, onset + 1, [("kind", "standard")]).unwrap();
    }
    for onset in [26, 180] {
        dataset.add_event(rec, onset, onset + 1, [("kind", "deviant")]).unwrap();
    }

    let requests = [
        RerpRequest::builder(EventQuery::equals("kind", "standard"), 0.0, 9.0)
            .name("standard")
            .build()
            .unwrap(),
        RerpRequest::builder(EventQuery::equals("kind", "deviant"), 0.0, 9.0)
            .name("deviant")
            .build()
            .unwrap(),
    ];
    let analysis = multi_rerp(&dataset, &requests, &FitConfig::default().threads(2)).unwrap();
    assert_eq!(analysis.strategy(), FitStrategy::Continuous);

    for (name, truth) in [("standard", &standard), ("deviant", &deviant)] {
        let rerp = analysis.get(name).unwrap();
        assert_eq!(rerp.artifact_info().epochs_requested, 2);
        assert_eq!(rerp.artifact_info().ticks_requested, 20);
        for (lag, expected) in truth.iter().enumerate() {
            assert!((rerp.betas()[[0, lag, 0]] - expected).abs() < 1e-9, "{name} lag {lag}");
        }
    }
    assert_eq!(analysis.total_overlap_ticks(), 4);
}

#[test]
fn test_unknown_recording_event_is_rejected_by_the_store() {
    let mut dataset = one_channel();
    let err = dataset
        .add_event(RecordingId(3), 0, 1, [("target", true)])
        .unwrap_err();
    assert!(matches!(err, Error::Dataset(_)));
}

#[test]
fn test_analysis_exports_json() {
    let mut dataset = one_channel();
    let rec = dataset
        .add_recording(Array2::ones((100, 1)), Default::default())
        .unwrap();
    dataset.add_event(rec, 10, 11, [("target", true)]).unwrap();
    let request = RerpRequest::builder(target(), -2.0, 4.0).name("n1").build().unwrap();
    let analysis = fit_serial(&dataset, &[request], &FitConfig::default()).unwrap();

    let rerp = analysis.get("n1").unwrap();
    assert_eq!((rerp.start_tick(), rerp.stop_tick(), rerp.ticks()), (-2, 5, 7));
    assert_eq!(rerp.latencies_ms().first().copied(), Some(-2.0));

    let json: serde_json::Value = serde_json::from_str(&analysis.to_json().unwrap()).unwrap();
    assert!(json.get("rerps").is_some());
}

/// One flat channel of `level`, far too long to hold in memory.
struct LongFlatRecording {
    format: DataFormat,
    ticks: i64,
    level: f64,
    events: Vec<Event>,
}

impl Dataset for LongFlatRecording {
    fn data_format(&self) -> &DataFormat {
        &self.format
    }

    fn recordings(&self) -> Vec<RecordingInfo> {
        vec![RecordingInfo {
            id: RecordingId(0),
            ticks: self.ticks,
            metadata: BTreeMap::new(),
        }]
    }

    fn events(&self, query: &EventQuery) -> rerp::Result<Vec<Event>> {
        Ok(self.events.iter().filter(|e| query.matches(e)).cloned().collect())
    }

    fn sample_block(&self, _recording: RecordingId, ticks: Range<i64>) -> rerp::Result<Array2<f64>> {
        let rows = usize::try_from(ticks.end - ticks.start).unwrap();
        Ok(Array2::from_elem((rows, 1), self.level))
    }
}

#[test]
fn test_recording_longer_than_i32_ticks() {
    init_tracing();
    let dataset = LongFlatRecording {
        format: DataFormat::new(1000.0, "uV", vec!["Cz".into()]).unwrap(),
        ticks: 3_000_000_000,
        level: 2.0,
        events: vec![Event {
            recording: RecordingId(0),
            start_tick: 100,
            stop_tick: 101,
            fields: BTreeMap::from([("target".to_string(), FieldValue::from(true))]),
        }],
    };
    let request = RerpRequest::new(target(), 0.0, 9.0).unwrap();
    let analysis = multi_rerp_with(
        &dataset,
        &LinearFormula,
        &SerialExecutor,
        &[request],
        &FitConfig::default(),
    )
    .unwrap();

    assert_eq!(analysis.strategy(), FitStrategy::ByEpoch);
    assert_eq!(analysis.total_wanted_ticks(), 10);
    assert_eq!(analysis.total_bad_ticks(), 0);
    let betas = analysis.rerps()[0].betas();
    assert_eq!(betas.len(), 10);
    assert!(betas.iter().all(|b| (b - 2.0).abs() < 1e-12));
}
