//! Tracing targets and debug formatting shared by the grid crates.
//!
//! Nothing here installs a subscriber. Applications pick one and filter by
//! the targets below, e.g. `RUST_LOG=horizon_grid_core::store=trace`.

use std::fmt::Write as FmtWrite;
use std::time::{Duration, Instant};

/// `tracing` targets, one per subsystem.
pub mod targets {
    pub const SIGNAL: &str = "horizon_grid_core::signal";
    pub const STORE: &str = "horizon_grid_core::store";
    pub const MEMO: &str = "horizon_grid_core::memo";
    /// Stage timings from [`PerfSpan`](super::PerfSpan).
    pub const PERF: &str = "horizon_grid::perf";
}

/// Branch characters used by [`format_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    Ascii,
    /// Box-drawing characters.
    #[default]
    Unicode,
    /// A single dash per level, no vertical guides.
    Compact,
}

/// What [`format_tree`] prints for each node.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    pub style: TreeStyle,
    /// Append `[id]` to each line.
    pub show_ids: bool,
    /// Append `(kind)` to each line.
    pub show_kinds: bool,
    /// Nodes deeper than this are skipped. `None` prints everything.
    pub max_depth: Option<usize>,
    /// Spaces after each vertical guide.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_kinds: true,
            max_depth: None,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Labels only.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_kinds: false,
            ..Default::default()
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_style(mut self, style: TreeStyle) -> Self {
        self.style = style;
        self
    }
}

/// A single line of a formatted tree.
#[derive(Debug, Clone)]
pub struct TreeLine {
    /// Main label.
    pub label: String,
    /// Identifier, printed in brackets when `show_ids` is set.
    pub id: String,
    /// Kind, printed in parentheses when `show_kinds` is set.
    pub kind: &'static str,
}

/// Format a tree described by a children function into a string.
///
/// `describe` maps a node to its printed line and `children` lists its
/// ordered children. Traversal is iterative and visits each node at most once,
/// so malformed input with cycles cannot loop.
pub fn format_tree<N, D, C>(
    roots: &[N],
    options: &TreeFormatOptions,
    describe: D,
    children: C,
) -> String
where
    N: Clone + PartialEq,
    D: Fn(&N) -> TreeLine,
    C: Fn(&N) -> Vec<N>,
{
    let mut output = String::new();
    let mut visited: Vec<N> = Vec::new();
    let mut stack: Vec<(N, usize, bool)> = roots
        .iter()
        .enumerate()
        .rev()
        .map(|(i, n)| (n.clone(), 0, i + 1 == roots.len()))
        .collect();

    while let Some((node, depth, is_last)) = stack.pop() {
        if visited.contains(&node) {
            continue;
        }
        visited.push(node.clone());
        if options.max_depth.is_some_and(|max| depth > max) {
            continue;
        }

        let line = describe(&node);
        output.push_str(&build_prefix(options, depth, is_last));
        output.push_str(if line.label.is_empty() {
            "(unnamed)"
        } else {
            &line.label
        });
        if options.show_ids {
            let _ = write!(output, " [{}]", line.id);
        }
        if options.show_kinds {
            let _ = write!(output, " ({})", line.kind);
        }
        output.push('\n');

        let kids = children(&node);
        let count = kids.len();
        for (i, child) in kids.into_iter().enumerate().rev() {
            stack.push((child, depth + 1, i + 1 == count));
        }
    }

    output
}

fn build_prefix(options: &TreeFormatOptions, depth: usize, is_last: bool) -> String {
    if depth == 0 {
        return String::new();
    }

    let (branch, corner, last) = match options.style {
        TreeStyle::Ascii => ("|", "+--", "`--"),
        TreeStyle::Unicode => (
            "\u{2502}",
            "\u{251c}\u{2500}\u{2500}",
            "\u{2514}\u{2500}\u{2500}",
        ),
        TreeStyle::Compact => ("", "-", "-"),
    };

    let mut prefix = String::new();
    for _ in 0..(depth - 1) {
        prefix.push_str(branch);
        for _ in 0..options.indent_size {
            prefix.push(' ');
        }
    }
    prefix.push_str(if is_last { last } else { corner });
    prefix.push(' ');
    prefix
}

/// Times a pipeline stage.
///
/// Enters an `info` span on [`targets::PERF`] for its lifetime and logs the
/// elapsed time at `debug` when dropped.
#[derive(Debug)]
pub struct PerfSpan {
    operation: &'static str,
    started: Instant,
    _span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation);
        Self {
            operation,
            started: Instant::now(),
            _span: span.entered(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        tracing::debug!(
            target: targets::PERF,
            operation = self.operation,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "stage finished"
        );
    }
}
