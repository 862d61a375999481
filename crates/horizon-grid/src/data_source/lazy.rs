//! Scroll-driven lazy loading.

use std::time::{Duration, Instant};

use crate::config::{LazyLoadingConfig, LazyLoadingMode};
use crate::logging::targets;
use crate::state::GridState;
use crate::virtualization::IndexRange;

/// Decides when scrolling should fetch more rows.
///
/// Requests are throttled by `throttle_ms` and never repeat a range that is
/// still in flight. Time is passed in explicitly so callers control the
/// clock.
#[derive(Debug, Clone)]
pub struct LazyLoader {
    config: LazyLoadingConfig,
    last_request: Option<Instant>,
    in_flight: Vec<IndexRange>,
}

impl LazyLoader {
    /// Create a loader.
    pub fn new(config: LazyLoadingConfig) -> Self {
        Self {
            config,
            last_request: None,
            in_flight: Vec::new(),
        }
    }

    /// The loader settings.
    pub fn config(&self) -> &LazyLoadingConfig {
        &self.config
    }

    /// Ranges requested and not yet completed.
    pub fn in_flight(&self) -> &[IndexRange] {
        &self.in_flight
    }

    /// The range to request for `state` at time `now`, if any.
    ///
    /// A returned range is recorded as in flight until
    /// [`complete`](Self::complete) is called for it.
    pub fn next_request(&mut self, state: &GridState, now: Instant) -> Option<IndexRange> {
        if !self.config.enabled {
            return None;
        }
        let range = match self.config.mode {
            LazyLoadingMode::Infinite => self.infinite_range(state)?,
            LazyLoadingMode::Viewport => self.viewport_range(state)?,
        };

        if self
            .in_flight
            .iter()
            .any(|r| r.first <= range.last && range.first <= r.last)
        {
            tracing::trace!(target: targets::DATA_SOURCE, first = range.first, last = range.last, "range already in flight");
            return None;
        }
        let throttle = Duration::from_millis(self.config.throttle_ms);
        if let Some(last) = self.last_request
            && now.saturating_duration_since(last) < throttle
        {
            tracing::debug!(target: targets::DATA_SOURCE, first = range.first, last = range.last, "lazy request throttled");
            return None;
        }

        self.last_request = Some(now);
        self.in_flight.push(range);
        Some(range)
    }

    /// Mark a requested range as finished, whatever its outcome.
    pub fn complete(&mut self, range: IndexRange) {
        self.in_flight.retain(|r| *r != range);
    }

    /// Forget throttling and in-flight state, e.g. after the models changed.
    pub fn reset(&mut self) {
        self.last_request = None;
        self.in_flight.clear();
    }

    /// Next block once the rendered window nears the loaded end.
    fn infinite_range(&self, state: &GridState) -> Option<IndexRange> {
        let rows = &state.rows;
        let loaded = rows.len();
        if rows.has_next_page == Some(false) || rows.total_row_count.is_some_and(|total| loaded >= total) {
            return None;
        }
        let last_rendered = state.render_context.last_row_index().unwrap_or(0);
        if loaded > 0 && last_rendered + self.config.threshold_rows < loaded {
            return None;
        }
        let block = self.config.block_size.max(1);
        Some(IndexRange::new(loaded, loaded + block - 1))
    }

    /// Unloaded part of the rendered window, kept contiguous with the
    /// loaded rows. Needs a known total.
    fn viewport_range(&self, state: &GridState) -> Option<IndexRange> {
        let total = state.rows.total_row_count?;
        let loaded = state.rows.len();
        if loaded >= total {
            return None;
        }
        let window = state.render_context.rows?;
        if window.last < loaded {
            return None;
        }
        let block = self.config.block_size.max(1);
        let last = window.last.max(loaded + block - 1).min(total - 1);
        Some(IndexRange::new(loaded, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnsState;
    use crate::config::GridConfig;
    use crate::rows::{RowsState, default_row_id_getter};
    use crate::virtualization::RenderContext;
    use serde_json::json;
    use std::sync::Arc;

    fn config(mode: LazyLoadingMode) -> LazyLoadingConfig {
        LazyLoadingConfig {
            enabled: true,
            mode,
            throttle_ms: 100,
            threshold_rows: 5,
            block_size: 20,
        }
    }

    fn state(loaded: usize, total: Option<usize>, window: IndexRange) -> GridState {
        let rows = (0..loaded).map(|i| json!({ "id": i })).collect();
        let mut rows = RowsState::from_rows(rows, &default_row_id_getter()).unwrap();
        rows.total_row_count = total;
        let mut state = GridState::new(ColumnsState::default(), GridConfig::default());
        state.rows = Arc::new(rows);
        state.render_context = RenderContext {
            rows: Some(window),
            columns: None,
        };
        state
    }

    #[test]
    fn test_infinite_requests_next_block_near_end() {
        let mut loader = LazyLoader::new(config(LazyLoadingMode::Infinite));
        let now = Instant::now();

        let far = state(40, None, IndexRange::new(0, 10));
        assert_eq!(loader.next_request(&far, now), None);

        let near = state(40, None, IndexRange::new(25, 36));
        assert_eq!(loader.next_request(&near, now), Some(IndexRange::new(40, 59)));

        // In flight, then throttled.
        assert_eq!(loader.next_request(&near, now), None);
        loader.complete(IndexRange::new(40, 59));
        assert_eq!(loader.next_request(&near, now + Duration::from_millis(50)), None);
        assert!(loader.next_request(&near, now + Duration::from_millis(150)).is_some());
    }

    #[test]
    fn test_infinite_stops_at_total() {
        let mut loader = LazyLoader::new(config(LazyLoadingMode::Infinite));
        let done = state(40, Some(40), IndexRange::new(30, 39));
        assert_eq!(loader.next_request(&done, Instant::now()), None);
    }

    #[test]
    fn test_viewport_requests_missing_window() {
        let mut loader = LazyLoader::new(config(LazyLoadingMode::Viewport));
        let now = Instant::now();

        assert_eq!(loader.next_request(&state(20, None, IndexRange::new(30, 40)), now), None);
        let range = loader.next_request(&state(20, Some(50), IndexRange::new(30, 45)), now);
        assert_eq!(range, Some(IndexRange::new(20, 45)));
    }
}
