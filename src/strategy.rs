//! Regression strategy selection
//!
//! Two ways to fit the same model:
//! - **by-epoch**: one regression row per epoch, one response column per
//!   (latency, channel). Fast, but only valid when no accepted data point is
//!   shared between epochs and every epoch is either entirely in or entirely
//!   out of the fit.
//! - **continuous**: one regression row per tick of accepted data, one design
//!   column per (predictor, latency). Always valid.
//!
//! Changing the strategy never changes the answer, only the cost of getting
//! it; `auto` picks by-epoch whenever that holds.

use crate::accounting::ArtifactInfo;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested strategy. Serialized by its kebab-case name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RegressionStrategy {
    /// By-epoch when feasible, continuous otherwise
    #[default]
    Auto,
    /// By-epoch, or fail
    ByEpoch,
    /// Always continuous
    Continuous,
}

impl FromStr for RegressionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Self::Auto),
            "by-epoch" => Ok(Self::ByEpoch),
            "continuous" => Ok(Self::Continuous),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

impl TryFrom<String> for RegressionStrategy {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl From<RegressionStrategy> for String {
    fn from(strategy: RegressionStrategy) -> Self {
        strategy.to_string()
    }
}

impl fmt::Display for RegressionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::ByEpoch => "by-epoch",
            Self::Continuous => "continuous",
        })
    }
}

/// Strategy actually used for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitStrategy {
    /// One row per epoch
    ByEpoch,
    /// One row per tick
    Continuous,
}

impl fmt::Display for FitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ByEpoch => "by-epoch",
            Self::Continuous => "continuous",
        })
    }
}

/// Conditions that rule out by-epoch fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Feasibility {
    /// Some accepted tick belongs to more than one epoch
    pub have_overlap: bool,
    /// Some epoch is partly accepted and partly rejected
    pub have_partial_epochs: bool,
}

impl Feasibility {
    /// Read the blocking conditions off the global accounting bucket.
    ///
    /// With overlap correction off, overlapping epochs have already been
    /// split into private copies, so any overlap seen here is real.
    #[must_use]
    pub const fn of(global: &ArtifactInfo) -> Self {
        Self {
            have_overlap: global.event_ticks_accepted > global.no_overlap_ticks_accepted,
            have_partial_epochs: global.epochs_partially_accepted > 0,
        }
    }

    /// True when neither condition holds.
    #[must_use]
    pub const fn by_epoch_possible(&self) -> bool {
        !(self.have_overlap || self.have_partial_epochs)
    }
}

/// Strategy selection over accounting results.
pub struct StrategySelector {
    _private: (),
}

impl StrategySelector {
    /// Resolve the requested strategy against the global bucket.
    ///
    /// # Errors
    ///
    /// Returns `StrategyInfeasible` if `by-epoch` was explicitly requested but
    /// the data has overlap or partially accepted epochs.
    pub fn select(requested: RegressionStrategy, global: &ArtifactInfo) -> Result<FitStrategy> {
        let feasibility = Feasibility::of(global);
        match requested {
            RegressionStrategy::Continuous => Ok(FitStrategy::Continuous),
            RegressionStrategy::Auto => Ok(if feasibility.by_epoch_possible() {
                FitStrategy::ByEpoch
            } else {
                FitStrategy::Continuous
            }),
            RegressionStrategy::ByEpoch => {
                if feasibility.by_epoch_possible() {
                    return Ok(FitStrategy::ByEpoch);
                }
                let mut reasons = Vec::new();
                if feasibility.have_partial_epochs {
                    reasons.push(
                        "at least one epoch is partially but not fully eliminated by an \
                         artifact (maybe you want all_or_nothing=true?)"
                            .to_string(),
                    );
                }
                if feasibility.have_overlap {
                    reasons.push(
                        "there is overlap and overlap correction was requested".to_string(),
                    );
                }
                Err(Error::StrategyInfeasible { reasons })
            }
        }
    }
}
