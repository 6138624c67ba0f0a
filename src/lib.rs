//! # rerp: regression-based event-related responses
//!
//! Estimates rERPs from continuous multichannel recordings annotated with
//! events. Several analysis requests, each selecting events and a window
//! around them, are fit jointly against the same recordings. Overlap between
//! windows and artifact-contaminated regions are resolved automatically.
//!
//! ## Pipeline
//!
//! 1. **Span extraction**: requests, artifacts and recording bounds become
//!    tagged intervals ([`spans`])
//! 2. **Canonical subspans**: a sweep-line partition with constant live
//!    epochs and artifacts ([`subspan`])
//! 3. **All-or-nothing**: strict rejection spread along overlap chains
//!    ([`all_or_nothing`])
//! 4. **Accounting**: global and per-request tallies ([`accounting`])
//! 5. **Strategy selection**: by-epoch when possible, continuous otherwise
//!    ([`strategy`])
//! 6. **Layout, fitting, assembly**: sufficient statistics computed in
//!    parallel and solved once ([`layout`], [`regression`], [`result`])
//!
//! ## Example
//!
//! ```rust
//! use ndarray::Array2;
//! use rerp::dataset::{DataFormat, EventQuery, MemoryDataset};
//! use rerp::{multi_rerp, FitConfig, RerpRequest};
//!
//! # fn main() -> rerp::Result<()> {
//! let format = DataFormat::new(1000.0, "uV", vec!["Cz".into()])?;
//! let mut dataset = MemoryDataset::new(format);
//! let rec = dataset.add_recording(Array2::ones((200, 1)), Default::default())?;
//! for onset in [20, 80, 140] {
//!     dataset.add_event(rec, onset, onset + 1, [("target", true)])?;
//! }
//!
//! let request = RerpRequest::new(EventQuery::IsTrue("target".into()), 0.0, 9.0)?;
//! let analysis = multi_rerp(&dataset, &[request], &FitConfig::default())?;
//! let rerp = &analysis.rerps()[0];
//! assert_eq!(rerp.betas().dim(), (1, 10, 1));
//! assert!((rerp.betas()[[0, 0, 0]] - 1.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod accounting;
pub mod all_or_nothing;
pub mod batch;
pub mod config;
pub mod dataset;
pub mod error;
pub mod formula;
pub mod layout;
pub mod regression;
pub mod request;
pub mod result;
pub mod spans;
pub mod strategy;
pub mod subspan;

pub use accounting::{ArtifactInfo, ArtifactTally};
pub use batch::{multi_rerp, multi_rerp_with};
pub use config::FitConfig;
pub use error::{Error, Result};
pub use request::{RerpRequest, RerpRequestBuilder};
pub use result::{Rerp, RerpAnalysis};
pub use strategy::{FitStrategy, RegressionStrategy};
