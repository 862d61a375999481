//! Virtualization window calculator.
//!
//! Given scroll offsets, viewport size and item sizes, computes which row
//! and column indices must be materialized. The window always covers the
//! geometrically visible region; buffers extend it on both sides and are
//! truncated at the collection boundaries.

use serde::{Deserialize, Serialize};

use crate::column::ColumnLayout;
use crate::logging::targets;

/// Inclusive index range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRange {
    /// First index.
    pub first: usize,
    /// Last index.
    pub last: usize,
}

impl IndexRange {
    /// Create a range. `first` must not exceed `last`.
    pub fn new(first: usize, last: usize) -> Self {
        debug_assert!(first <= last);
        Self { first, last }
    }

    /// Number of indices covered.
    pub fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// Always `false`: empty windows are `None`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `index` is inside the range.
    pub fn contains(&self, index: usize) -> bool {
        (self.first..=self.last).contains(&index)
    }

    /// Whether `other` lies entirely inside this range.
    pub fn covers(&self, other: &IndexRange) -> bool {
        self.first <= other.first && other.last <= self.last
    }

    /// Widen by `buffer` on both sides, clamped to `[0, count - 1]`.
    pub fn buffered(&self, buffer: usize, count: usize) -> Self {
        Self {
            first: self.first.saturating_sub(buffer),
            last: self.last.saturating_add(buffer).min(count.saturating_sub(1)),
        }
    }
}

/// Item sizes along one axis.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSizes {
    /// Every item has the same size.
    Uniform {
        /// Item size in pixels.
        size: f64,
        /// Number of items.
        count: usize,
    },
    /// Individual sizes, stored as cumulative start offsets.
    Variable {
        /// `offsets[i]` is the start of item `i`; the last entry is the total.
        offsets: Vec<f64>,
    },
}

impl RowSizes {
    /// `count` items of `size` pixels.
    pub fn uniform(size: f64, count: usize) -> Self {
        Self::Uniform { size, count }
    }

    /// Items with individual sizes.
    pub fn variable(sizes: &[f64]) -> Self {
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        let mut acc = 0.0;
        offsets.push(acc);
        for size in sizes {
            acc += size.max(0.0);
            offsets.push(acc);
        }
        Self::Variable { offsets }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        match self {
            Self::Uniform { count, .. } => *count,
            Self::Variable { offsets } => offsets.len().saturating_sub(1),
        }
    }

    /// Returns `true` if there are no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start offset of item `index`.
    pub fn start(&self, index: usize) -> f64 {
        match self {
            Self::Uniform { size, .. } => index as f64 * size,
            Self::Variable { offsets } => offsets.get(index).copied().unwrap_or_else(|| self.total()),
        }
    }

    /// End offset of item `index`.
    pub fn end(&self, index: usize) -> f64 {
        self.start(index + 1)
    }

    /// Combined size of all items.
    pub fn total(&self) -> f64 {
        match self {
            Self::Uniform { size, count } => *count as f64 * size,
            Self::Variable { offsets } => offsets.last().copied().unwrap_or(0.0),
        }
    }

    /// Index of the item containing `offset`, clamped to the last item.
    pub fn index_at(&self, offset: f64) -> Option<usize> {
        let count = self.len();
        (count > 0).then(|| partition(count, |i| self.end(i) <= offset).min(count - 1))
    }
}

/// First index in `0..count` for which `pred` is false. `pred` must be
/// monotonic (true then false).
fn partition(count: usize, pred: impl Fn(usize) -> bool) -> usize {
    let (mut lo, mut hi) = (0, count);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Items intersecting `[offset, offset + extent)`, without buffers.
///
/// An empty extent still yields the item at `offset`.
pub fn visible_range(sizes: &RowSizes, offset: f64, extent: f64) -> Option<IndexRange> {
    let count = sizes.len();
    if count == 0 {
        return None;
    }
    let offset = offset.clamp(0.0, sizes.total().max(0.0));
    let first = partition(count, |i| sizes.end(i) <= offset).min(count - 1);
    let bottom = offset + extent.max(0.0);
    let last = partition(count, |i| sizes.start(i) < bottom)
        .saturating_sub(1)
        .max(first);
    Some(IndexRange::new(first, last))
}

/// The buffered render window along one axis.
pub fn render_window(sizes: &RowSizes, offset: f64, extent: f64, buffer: usize) -> Option<IndexRange> {
    visible_range(sizes, offset, extent).map(|range| range.buffered(buffer, sizes.len()))
}

/// Row and column windows to materialize.
///
/// Column indices refer to the visible column order. Pinned columns are
/// always rendered and are not part of `columns`, which covers only the
/// unpinned center columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    /// Rendered rows, as indices into the current page.
    pub rows: Option<IndexRange>,
    /// Rendered center columns.
    pub columns: Option<IndexRange>,
}

impl RenderContext {
    /// First rendered row index.
    pub fn first_row_index(&self) -> Option<usize> {
        self.rows.map(|r| r.first)
    }

    /// Last rendered row index.
    pub fn last_row_index(&self) -> Option<usize> {
        self.rows.map(|r| r.last)
    }

    /// First rendered center column index.
    pub fn first_column_index(&self) -> Option<usize> {
        self.columns.map(|r| r.first)
    }

    /// Last rendered center column index.
    pub fn last_column_index(&self) -> Option<usize> {
        self.columns.map(|r| r.last)
    }
}

/// Scroll position and viewport size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewportState {
    /// Vertical scroll offset.
    pub scroll_top: f64,
    /// Horizontal scroll offset.
    pub scroll_left: f64,
    /// Viewport width.
    pub width: f64,
    /// Viewport height.
    pub height: f64,
}

impl ViewportState {
    /// A viewport of the given size at the origin.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }
}

/// Center-column window for `layout`, as indices into the visible columns.
pub fn column_window(layout: &ColumnLayout, viewport: &ViewportState, buffer: usize) -> Option<IndexRange> {
    let center_end = layout.len() - layout.pinned_right;
    if layout.pinned_left >= center_end {
        return None;
    }
    let sizes = RowSizes::variable(&layout.widths[layout.pinned_left..center_end]);
    let extent = viewport.width - layout.pinned_left_width() - layout.pinned_right_width();
    render_window(&sizes, viewport.scroll_left, extent, buffer).map(|range| IndexRange {
        first: range.first + layout.pinned_left,
        last: range.last + layout.pinned_left,
    })
}

/// Inputs to one window computation.
#[derive(Debug, Clone, Copy)]
pub struct WindowRequest<'a> {
    /// Row sizes of the current page.
    pub rows: &'a RowSizes,
    /// Column layout.
    pub columns: &'a ColumnLayout,
    /// Scroll position and viewport size.
    pub viewport: &'a ViewportState,
    /// Extra rows on each side.
    pub row_buffer: usize,
    /// Extra columns on each side.
    pub column_buffer: usize,
}

/// Remembers the last window and skips recomputation for small scrolls.
#[derive(Debug, Clone, Default)]
pub struct VirtualScroller {
    threshold: f64,
    last_viewport: Option<ViewportState>,
    last_dimensions: Option<(usize, u64, usize, u64)>,
    last: RenderContext,
}

impl VirtualScroller {
    /// A scroller that reuses its window for scrolls under `threshold` pixels.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.max(0.0),
            ..Self::default()
        }
    }

    /// Change the reuse threshold.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold.max(0.0);
    }

    /// The last computed context.
    pub fn last(&self) -> RenderContext {
        self.last
    }

    /// Forget the last window so the next update recomputes.
    pub fn reset(&mut self) {
        self.last_viewport = None;
        self.last_dimensions = None;
    }

    /// Compute the render context, reusing the previous one when the scroll
    /// moved less than the threshold and the viewport is still covered.
    pub fn update(&mut self, request: &WindowRequest<'_>) -> RenderContext {
        let dimensions = (
            request.rows.len(),
            request.rows.total().to_bits(),
            request.columns.len(),
            request.columns.total_width.to_bits(),
        );
        if let Some(last_viewport) = self.last_viewport {
            if self.last_dimensions == Some(dimensions)
                && last_viewport.width == request.viewport.width
                && last_viewport.height == request.viewport.height
                && self.reusable(&last_viewport, request)
            {
                tracing::trace!(target: targets::VIRTUALIZATION, "scroll below threshold, reusing window");
                return self.last;
            }
        }

        let viewport = request.viewport;
        let context = RenderContext {
            rows: render_window(request.rows, viewport.scroll_top, viewport.height, request.row_buffer),
            columns: column_window(request.columns, viewport, request.column_buffer),
        };
        if context != self.last {
            tracing::debug!(
                target: targets::VIRTUALIZATION,
                rows = ?context.rows,
                columns = ?context.columns,
                "render window changed"
            );
        }
        self.last = context;
        self.last_viewport = Some(*viewport);
        self.last_dimensions = Some(dimensions);
        context
    }

    fn reusable(&self, last: &ViewportState, request: &WindowRequest<'_>) -> bool {
        let viewport = request.viewport;
        let small_scroll = (viewport.scroll_top - last.scroll_top).abs() < self.threshold
            && (viewport.scroll_left - last.scroll_left).abs() < self.threshold;
        if !small_scroll {
            return false;
        }
        let rows_covered = match (self.last.rows, visible_range(request.rows, viewport.scroll_top, viewport.height)) {
            (Some(window), Some(visible)) => window.covers(&visible),
            (None, None) => true,
            _ => false,
        };
        let columns_covered = match (self.last.columns, column_window(request.columns, viewport, 0)) {
            (Some(window), Some(visible)) => window.covers(&visible),
            (None, None) => true,
            _ => false,
        };
        rows_covered && columns_covered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnDef, ColumnType, ColumnsState, PinnedColumns};

    #[test]
    fn test_uniform_window() {
        let sizes = RowSizes::uniform(50.0, 100);
        assert_eq!(visible_range(&sizes, 0.0, 200.0), Some(IndexRange::new(0, 3)));
        assert_eq!(visible_range(&sizes, 75.0, 200.0), Some(IndexRange::new(1, 5)));
        assert_eq!(render_window(&sizes, 75.0, 200.0, 3), Some(IndexRange::new(0, 8)));
        assert_eq!(render_window(&sizes, 4900.0, 200.0, 3), Some(IndexRange::new(95, 99)));
        assert_eq!(visible_range(&RowSizes::uniform(50.0, 0), 0.0, 200.0), None);
    }

    #[test]
    fn test_variable_window() {
        let sizes = RowSizes::variable(&[10.0, 30.0, 20.0, 40.0]);
        assert_eq!(sizes.total(), 100.0);
        assert_eq!(sizes.index_at(35.0), Some(1));
        assert_eq!(sizes.index_at(40.0), Some(2));
        assert_eq!(sizes.index_at(500.0), Some(3));
        assert_eq!(visible_range(&sizes, 35.0, 30.0), Some(IndexRange::new(1, 3)));
    }

    #[test]
    fn test_window_covers_viewport() {
        let heights: Vec<f64> = (0..200u32).map(|i| 20.0 + f64::from(i % 7) * 5.0).collect();
        let sizes = RowSizes::variable(&heights);
        let viewport = 333.0;
        let mut offset = 0.0;
        while offset + viewport <= sizes.total() {
            let range = visible_range(&sizes, offset, viewport).unwrap();
            assert!(sizes.start(range.first) <= offset);
            assert!(sizes.end(range.last) >= offset + viewport);
            offset += 17.5;
        }
    }

    fn layout(pinned: PinnedColumns) -> ColumnLayout {
        let columns = ColumnsState::new(
            ["a", "b", "c", "d", "e", "f"]
                .into_iter()
                .map(|f| ColumnDef::new(f, ColumnType::String).with_width(100.0))
                .collect(),
        )
        .with_pinned(pinned);
        ColumnLayout::compute(&columns.visible(), 0.0)
    }

    #[test]
    fn test_column_window_skips_pinned() {
        let layout = layout(PinnedColumns {
            left: vec!["a".into()],
            right: vec!["f".into()],
        });
        let viewport = ViewportState {
            scroll_left: 150.0,
            width: 300.0,
            ..ViewportState::default()
        };
        // 100px of center space starting at center offset 150: columns "c" and "d".
        assert_eq!(column_window(&layout, &viewport, 0), Some(IndexRange::new(2, 3)));
        assert_eq!(column_window(&layout, &viewport, 1), Some(IndexRange::new(1, 4)));
    }

    #[test]
    fn test_scroller_reuses_window_for_small_scrolls() {
        let rows = RowSizes::uniform(50.0, 100);
        let columns = layout(PinnedColumns::default());
        let mut scroller = VirtualScroller::new(20.0);
        let mut viewport = ViewportState::new(600.0, 200.0);
        let first = scroller.update(&WindowRequest {
            rows: &rows,
            columns: &columns,
            viewport: &viewport,
            row_buffer: 3,
            column_buffer: 0,
        });
        assert_eq!(first.rows, Some(IndexRange::new(0, 6)));

        viewport.scroll_top = 10.0;
        let second = scroller.update(&WindowRequest {
            rows: &rows,
            columns: &columns,
            viewport: &viewport,
            row_buffer: 3,
            column_buffer: 0,
        });
        assert_eq!(second, first);

        viewport.scroll_top = 400.0;
        let third = scroller.update(&WindowRequest {
            rows: &rows,
            columns: &columns,
            viewport: &viewport,
            row_buffer: 3,
            column_buffer: 0,
        });
        assert_eq!(third.rows, Some(IndexRange::new(5, 14)));
    }
}
