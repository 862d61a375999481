//! Grid configuration.
//!
//! [`GridConfig`] is a plain serde struct with defaults for every field, so a
//! host can load a partial TOML or JSON document and override the rest with
//! `with_*` builder calls.
//!
//! ```
//! use horizon_grid::{Density, GridConfig};
//!
//! let config = GridConfig::from_toml_str(r#"
//!     row_height = 40.0
//!     density = "compact"
//!     pagination = true
//! "#).unwrap();
//! assert_eq!(config.density, Density::Compact);
//! assert_eq!(config.effective_row_height(), 28.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Row density; scales the configured row height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Density {
    /// 0.7 × row height.
    Compact,
    /// 1.0 × row height.
    #[default]
    Standard,
    /// 1.3 × row height.
    Comfortable,
}

impl Density {
    /// The scale factor applied to row height.
    pub fn factor(self) -> f64 {
        match self {
            Self::Compact => 0.7,
            Self::Standard => 1.0,
            Self::Comfortable => 1.3,
        }
    }
}

/// Where a stage's work happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingMode {
    /// The engine processes rows itself.
    #[default]
    Client,
    /// The data source has already processed rows; the stage passes through.
    Server,
}

/// Where empty values sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NullsPosition {
    /// Before all values, regardless of direction.
    First,
    /// After all values, regardless of direction.
    #[default]
    Last,
}

/// Which descendants aggregation functions see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationRowsScope {
    /// Only rows passing the filter.
    #[default]
    Filtered,
    /// All rows, filtered or not.
    All,
}

/// Lazy loading strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LazyLoadingMode {
    /// Load the next block when scrolling near the loaded end.
    #[default]
    Infinite,
    /// Load whatever part of the rendered window is missing.
    Viewport,
}

/// Lazy loading settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyLoadingConfig {
    /// Whether lazy loading is active.
    pub enabled: bool,
    /// Loading strategy.
    pub mode: LazyLoadingMode,
    /// Minimum delay between two scroll-triggered requests.
    pub throttle_ms: u64,
    /// Distance from the loaded end (in rows) that triggers a request.
    pub threshold_rows: usize,
    /// Rows requested per block.
    pub block_size: usize,
}

impl Default for LazyLoadingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: LazyLoadingMode::Infinite,
            throttle_ms: 500,
            threshold_rows: 10,
            block_size: 100,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Base row height in pixels before density scaling.
    pub row_height: f64,
    /// Row density.
    pub density: Density,
    /// Extra rows rendered above and below the viewport.
    pub row_buffer: usize,
    /// Extra columns rendered left and right of the viewport.
    pub column_buffer: usize,
    /// Scroll distance below which the render window is reused.
    pub scroll_threshold_px: f64,
    /// Whether pagination is enabled.
    pub pagination: bool,
    /// Client or server pagination.
    pub pagination_mode: ProcessingMode,
    /// Client or server sorting.
    pub sorting_mode: ProcessingMode,
    /// Client or server filtering.
    pub filter_mode: ProcessingMode,
    /// Where empty values sort.
    pub nulls_position: NullsPosition,
    /// Which rows aggregations see.
    pub aggregation_rows_scope: AggregationRowsScope,
    /// Whether every group gets a footer row.
    pub group_footers: bool,
    /// Groups at this depth or shallower start expanded; `-1` expands all.
    pub default_group_expansion_depth: i32,
    /// Whether rows form a tree through a path or parent function.
    pub tree_data: bool,
    /// Tree data: filter only top-level rows and keep all their children.
    pub disable_child_filtering: bool,
    /// Lazy loading settings.
    pub lazy_loading: LazyLoadingConfig,
    /// Time to live for cached data source responses.
    pub cache_ttl_ms: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            row_height: 52.0,
            density: Density::Standard,
            row_buffer: 3,
            column_buffer: 3,
            scroll_threshold_px: 20.0,
            pagination: false,
            pagination_mode: ProcessingMode::Client,
            sorting_mode: ProcessingMode::Client,
            filter_mode: ProcessingMode::Client,
            nulls_position: NullsPosition::Last,
            aggregation_rows_scope: AggregationRowsScope::Filtered,
            group_footers: false,
            default_group_expansion_depth: 0,
            tree_data: false,
            disable_child_filtering: false,
            lazy_loading: LazyLoadingConfig::default(),
            cache_ttl_ms: 5 * 60 * 1000,
        }
    }
}

impl GridConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validated()
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|err| crate::GridError::InvalidConfig(err.to_string()))?;
        config.validated()
    }

    fn validated(self) -> Result<Self> {
        if !(self.row_height.is_finite() && self.row_height > 0.0) {
            return Err(crate::GridError::InvalidConfig(format!(
                "row_height must be positive, got {}",
                self.row_height
            )));
        }
        if self.scroll_threshold_px < 0.0 {
            return Err(crate::GridError::InvalidConfig(
                "scroll_threshold_px must not be negative".into(),
            ));
        }
        Ok(self)
    }

    /// Row height after density scaling.
    pub fn effective_row_height(&self) -> f64 {
        self.row_height * self.density.factor()
    }

    /// Set the base row height.
    pub fn with_row_height(mut self, height: f64) -> Self {
        self.row_height = height;
        self
    }

    /// Set the density.
    pub fn with_density(mut self, density: Density) -> Self {
        self.density = density;
        self
    }

    /// Set row and column buffers.
    pub fn with_buffers(mut self, rows: usize, columns: usize) -> Self {
        self.row_buffer = rows;
        self.column_buffer = columns;
        self
    }

    /// Set the scroll recomputation threshold.
    pub fn with_scroll_threshold(mut self, px: f64) -> Self {
        self.scroll_threshold_px = px;
        self
    }

    /// Enable or disable pagination.
    pub fn with_pagination(mut self, enabled: bool) -> Self {
        self.pagination = enabled;
        self
    }

    /// Set the pagination mode.
    pub fn with_pagination_mode(mut self, mode: ProcessingMode) -> Self {
        self.pagination_mode = mode;
        self
    }

    /// Set the sorting mode.
    pub fn with_sorting_mode(mut self, mode: ProcessingMode) -> Self {
        self.sorting_mode = mode;
        self
    }

    /// Set the filter mode.
    pub fn with_filter_mode(mut self, mode: ProcessingMode) -> Self {
        self.filter_mode = mode;
        self
    }

    /// Set where empty values sort.
    pub fn with_nulls_position(mut self, position: NullsPosition) -> Self {
        self.nulls_position = position;
        self
    }

    /// Set the aggregation scope.
    pub fn with_aggregation_rows_scope(mut self, scope: AggregationRowsScope) -> Self {
        self.aggregation_rows_scope = scope;
        self
    }

    /// Enable or disable group footers.
    pub fn with_group_footers(mut self, enabled: bool) -> Self {
        self.group_footers = enabled;
        self
    }

    /// Set the default expansion depth.
    pub fn with_default_group_expansion_depth(mut self, depth: i32) -> Self {
        self.default_group_expansion_depth = depth;
        self
    }

    /// Enable tree data.
    pub fn with_tree_data(mut self, enabled: bool) -> Self {
        self.tree_data = enabled;
        self
    }

    /// Tree data: filter only top-level rows.
    pub fn with_disable_child_filtering(mut self, disabled: bool) -> Self {
        self.disable_child_filtering = disabled;
        self
    }

    /// Set lazy loading.
    pub fn with_lazy_loading(mut self, lazy: LazyLoadingConfig) -> Self {
        self.lazy_loading = lazy;
        self
    }

    /// Set the cache time to live.
    pub fn with_cache_ttl_ms(mut self, ttl: u64) -> Self {
        self.cache_ttl_ms = ttl;
        self
    }
}
