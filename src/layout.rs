//! Design matrix column layout
//!
//! Each request owns a contiguous block of columns in two coordinate systems:
//! - **compact**: one column per predictor (by-epoch fitting)
//! - **expanded**: one column per (predictor, latency) pair (continuous
//!   fitting), predictor-major
//!
//! Offsets are prefix sums over the requests in batch order.

use crate::spans::RerpPlan;

/// Where one request's columns start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOffsets {
    /// Offset among predictor columns
    pub compact: usize,
    /// Offset among (predictor, latency) columns
    pub expanded: usize,
}

/// Column layout of a whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignLayout {
    offsets: Vec<ColumnOffsets>,
    shapes: Vec<(usize, usize)>,
    compact_width: usize,
    expanded_width: usize,
    max_ticks: usize,
}

impl DesignLayout {
    /// Lay out the requests of an extraction.
    #[must_use]
    pub fn new(plans: &[RerpPlan]) -> Self {
        Self::from_shapes(plans.iter().map(|plan| {
            (
                plan.design_info.width(),
                usize::try_from(plan.ticks()).unwrap_or(0),
            )
        }))
    }

    /// Lay out requests given as `(predictors, ticks)` pairs.
    pub fn from_shapes(shapes: impl IntoIterator<Item = (usize, usize)>) -> Self {
        let shapes: Vec<(usize, usize)> = shapes.into_iter().collect();
        let mut offsets = Vec::with_capacity(shapes.len());
        let mut compact = 0;
        let mut expanded = 0;
        let mut max_ticks = 0;
        for &(predictors, ticks) in &shapes {
            offsets.push(ColumnOffsets { compact, expanded });
            compact += predictors;
            expanded += predictors * ticks;
            max_ticks = max_ticks.max(ticks);
        }
        Self {
            offsets,
            shapes,
            compact_width: compact,
            expanded_width: expanded,
            max_ticks,
        }
    }

    /// Offsets of request `index`.
    #[must_use]
    pub fn offsets(&self, index: usize) -> ColumnOffsets {
        self.offsets[index]
    }

    /// Number of predictors of request `index`.
    #[must_use]
    pub fn predictors(&self, index: usize) -> usize {
        self.shapes[index].0
    }

    /// Window length of request `index`.
    #[must_use]
    pub fn ticks(&self, index: usize) -> usize {
        self.shapes[index].1
    }

    /// Number of requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Check if the layout has no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Total predictor columns.
    #[must_use]
    pub const fn compact_width(&self) -> usize {
        self.compact_width
    }

    /// Total (predictor, latency) columns.
    #[must_use]
    pub const fn expanded_width(&self) -> usize {
        self.expanded_width
    }

    /// Longest window in the batch.
    #[must_use]
    pub const fn max_ticks(&self) -> usize {
        self.max_ticks
    }

    /// Expanded column of `predictor` at `lag` ticks into request `index`'s window.
    #[must_use]
    pub fn expanded_column(&self, index: usize, predictor: usize, lag: usize) -> usize {
        self.offsets[index].expanded + predictor * self.shapes[index].1 + lag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_sums() {
        let layout = DesignLayout::from_shapes([(2, 10), (1, 5), (3, 20)]);
        assert_eq!(layout.len(), 3);
        assert_eq!(
            layout.offsets(0),
            ColumnOffsets {
                compact: 0,
                expanded: 0
            }
        );
        assert_eq!(
            layout.offsets(1),
            ColumnOffsets {
                compact: 2,
                expanded: 20
            }
        );
        assert_eq!(
            layout.offsets(2),
            ColumnOffsets {
                compact: 3,
                expanded: 25
            }
        );
        assert_eq!(layout.compact_width(), 6);
        assert_eq!(layout.expanded_width(), 85);
        assert_eq!(layout.max_ticks(), 20);
    }

    #[test]
    fn test_expanded_column_is_predictor_major() {
        let layout = DesignLayout::from_shapes([(2, 10), (3, 4)]);
        assert_eq!(layout.expanded_column(0, 0, 0), 0);
        assert_eq!(layout.expanded_column(0, 1, 3), 13);
        assert_eq!(layout.expanded_column(1, 0, 0), 20);
        assert_eq!(layout.expanded_column(1, 2, 3), 31);
    }

    #[test]
    fn test_empty_layout() {
        let layout = DesignLayout::from_shapes(std::iter::empty());
        assert!(layout.is_empty());
        assert_eq!(layout.compact_width(), 0);
        assert_eq!(layout.max_ticks(), 0);
    }
}
