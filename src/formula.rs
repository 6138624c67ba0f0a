//! Regressor evaluation
//!
//! A formula turns each selected event into one numeric regressor row. The
//! formula only has a right-hand side: the left-hand side is implicitly "one
//! row per event", so a formula that spells one out is rejected.
//!
//! ## Supported `LinearFormula` syntax
//!
//! - `~ 1 + a + b` or `a + b`: intercept plus numeric/boolean fields
//! - `~ 0 + a` or `~ a - 1`: no intercept
//! - `~ 1`: intercept only (the classic ERP average)
//!
//! Events whose predictors are missing or null get no row and are excluded
//! from the fit.

use crate::dataset::{Event, FieldValue};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Column name used for the intercept term.
pub const INTERCEPT: &str = "Intercept";

/// Names of the regressor columns produced by a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignInfo {
    column_names: Vec<String>,
}

impl DesignInfo {
    /// Create from column names.
    #[must_use]
    pub const fn new(column_names: Vec<String>) -> Self {
        Self { column_names }
    }

    /// Column names in order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of predictor columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.column_names.len()
    }

    /// Index of a named column.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.column_names.iter().position(|c| c == name)
    }
}

/// Result of evaluating a formula over a list of events.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    /// Column layout
    pub info: DesignInfo,
    /// One entry per input event; `None` marks an excluded event
    pub rows: Vec<Option<Vec<f64>>>,
}

/// Regressor evaluation contract.
pub trait RegressorEvaluator {
    /// Evaluate `formula` over `events`, returning one row slot per event.
    ///
    /// # Errors
    ///
    /// Returns error if the formula has a left-hand side or cannot be
    /// evaluated against the events.
    fn evaluate(&self, formula: &str, events: &[Event]) -> Result<Design>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedFormula {
    intercept: bool,
    fields: Vec<String>,
}

/// Additive formula evaluator over event fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearFormula;

impl LinearFormula {
    /// Create the evaluator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn parse(formula: &str) -> Result<ParsedFormula> {
        let rhs = match formula.split_once('~') {
            Some((lhs, rhs)) => {
                if !lhs.trim().is_empty() {
                    return Err(Error::formula(formula, "formula cannot have a left-hand side"));
                }
                rhs
            }
            None => formula,
        };
        if rhs.contains('~') {
            return Err(Error::formula(formula, "more than one '~'"));
        }

        let mut intercept = true;
        let mut fields: Vec<String> = Vec::new();
        let mut seen_term = false;
        let mut negate = false;
        let mut token = String::new();

        let mut flush = |token: &mut String, negate: bool| -> Result<()> {
            let term = token.trim();
            if term.is_empty() {
                return Err(Error::formula(formula, "empty term"));
            }
            match (term, negate) {
                ("1", false) => intercept = true,
                ("0", false) | ("1", true) => intercept = false,
                (_, true) => {
                    return Err(Error::formula(
                        formula,
                        format!("only the intercept can be removed, not {term:?}"),
                    ))
                }
                (name, false) => {
                    if !is_identifier(name) {
                        return Err(Error::formula(formula, format!("unsupported term {name:?}")));
                    }
                    if !fields.iter().any(|f| f == name) {
                        fields.push(name.to_string());
                    }
                }
            }
            token.clear();
            Ok(())
        };

        for ch in rhs.chars() {
            match ch {
                '+' | '-' => {
                    if token.trim().is_empty() {
                        // Leading sign, e.g. "~ -1 + a"
                        if seen_term {
                            return Err(Error::formula(formula, "empty term"));
                        }
                    } else {
                        flush(&mut token, negate)?;
                    }
                    seen_term = true;
                    negate = ch == '-';
                }
                _ => token.push(ch),
            }
        }
        flush(&mut token, negate)?;

        Ok(ParsedFormula { intercept, fields })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

impl RegressorEvaluator for LinearFormula {
    fn evaluate(&self, formula: &str, events: &[Event]) -> Result<Design> {
        let parsed = Self::parse(formula)?;
        if !parsed.intercept && parsed.fields.is_empty() {
            return Err(Error::formula(formula, "formula has no columns"));
        }

        let mut column_names = Vec::with_capacity(parsed.fields.len() + 1);
        if parsed.intercept {
            column_names.push(INTERCEPT.to_string());
        }
        column_names.extend(parsed.fields.iter().cloned());

        let mut rows = Vec::with_capacity(events.len());
        'events: for event in events {
            let mut row = Vec::with_capacity(column_names.len());
            if parsed.intercept {
                row.push(1.0);
            }
            for field in &parsed.fields {
                match event.get(field) {
                    None | Some(FieldValue::Null) => {
                        rows.push(None);
                        continue 'events;
                    }
                    Some(value) => {
                        let x = value.as_regressor().ok_or_else(|| {
                            Error::formula(
                                formula,
                                format!("field {field:?} has non-numeric value {value}"),
                            )
                        })?;
                        row.push(x);
                    }
                }
            }
            rows.push(Some(row));
        }

        Ok(Design {
            info: DesignInfo::new(column_names),
            rows,
        })
    }
}
