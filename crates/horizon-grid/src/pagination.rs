//! Pagination slicer.
//!
//! Pages are counted in top-level entries. A page spans its top-level rows
//! plus every visible descendant, so with expanded groups a page can hold
//! more than `page_size` rows.

use serde::{Deserialize, Serialize};

use crate::logging::targets;
use crate::tree::RowTree;
use crate::value::RowId;

/// Current page and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationModel {
    /// Zero-based page index.
    pub page: usize,
    /// Top-level entries per page.
    pub page_size: usize,
}

impl Default for PaginationModel {
    fn default() -> Self {
        Self {
            page: 0,
            page_size: 100,
        }
    }
}

impl PaginationModel {
    /// Create a model.
    pub fn new(page: usize, page_size: usize) -> Self {
        Self { page, page_size }
    }

    /// Clamp into range for `row_count` top-level entries: the page size is
    /// at least one and the page lies in `[0, page_count - 1]`.
    pub fn clamped(self, row_count: usize) -> Self {
        let page_size = self.page_size.max(1);
        let last_page = page_count(row_count, page_size).saturating_sub(1);
        Self {
            page: self.page.min(last_page),
            page_size,
        }
    }
}

/// Number of pages for `row_count` entries; zero when there are no rows.
pub fn page_count(row_count: usize, page_size: usize) -> usize {
    row_count.div_ceil(page_size.max(1))
}

/// Derived pagination totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationMeta {
    /// Top-level entries (client) or the server's row count.
    pub row_count: usize,
    /// Number of pages.
    pub page_count: usize,
}

/// Inclusive index range into the flat visible row sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRange {
    /// First index on the page.
    pub first_row_index: usize,
    /// Last index on the page.
    pub last_row_index: usize,
}

impl PageRange {
    /// Number of rows in the range.
    pub fn len(&self) -> usize {
        self.last_row_index - self.first_row_index + 1
    }

    /// Always `false`: an empty page is represented by `None`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `index` falls inside the range.
    pub fn contains(&self, index: usize) -> bool {
        (self.first_row_index..=self.last_row_index).contains(&index)
    }

    /// The range covering all of `len` rows, `None` when empty.
    pub fn full(len: usize) -> Option<Self> {
        (len > 0).then(|| Self {
            first_row_index: 0,
            last_row_index: len - 1,
        })
    }

    /// The ids inside the range.
    pub fn slice<'a>(&self, visible: &'a [RowId]) -> &'a [RowId] {
        let end = (self.last_row_index + 1).min(visible.len());
        &visible[self.first_row_index.min(end)..end]
    }
}

/// Compute the range of `visible` (the expanded pre-order of `tree`) that
/// belongs to the page in `model`.
///
/// Returns `None` when the page lies past the last top-level entry.
pub fn page_range(tree: &RowTree, visible: &[RowId], model: PaginationModel) -> Option<PageRange> {
    let top_positions: Vec<usize> = visible
        .iter()
        .enumerate()
        .filter(|(_, id)| tree.get(id).is_some_and(|n| n.depth == 1))
        .map(|(i, _)| i)
        .collect();

    let page_size = model.page_size.max(1);
    let start = model.page.saturating_mul(page_size);
    if start >= top_positions.len() {
        tracing::debug!(
            target: targets::PAGINATION,
            page = model.page,
            top_level = top_positions.len(),
            "page past the last row"
        );
        return None;
    }
    let end = start.saturating_add(page_size);
    let last_row_index = match top_positions.get(end) {
        Some(next_page_start) => next_page_start - 1,
        None => visible.len() - 1,
    };
    Some(PageRange {
        first_row_index: top_positions[start],
        last_row_index,
    })
}
