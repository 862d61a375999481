//! Core systems for Horizon Grid.
//!
//! This crate provides the reactive foundation the grid engine is built on:
//!
//! - **Signal/Slot System**: Type-safe publish/subscribe for typed events
//! - **State Store**: A single-writer container of immutable snapshots with
//!   selector subscriptions, batching and commit hooks
//! - **Memo**: Derived values that declare their upstream dependencies and
//!   recompute only when one of them changes by reference
//! - **Logging**: Tracing targets and helpers shared by every subsystem
//!
//! # Signal Example
//!
//! ```
//! use horizon_grid_core::Signal;
//!
//! let page_changed = Signal::<usize>::new();
//! let conn_id = page_changed.connect(|page| {
//!     println!("Page changed to: {}", page);
//! });
//!
//! page_changed.emit(2);
//! page_changed.disconnect(conn_id);
//! ```
//!
//! # Store Example
//!
//! ```
//! use horizon_grid_core::Store;
//!
//! #[derive(Clone, Default)]
//! struct Counter {
//!     value: i32,
//! }
//!
//! let store = Store::new(Counter::default());
//! store.subscribe(|state: &Counter| state.value, |value| {
//!     println!("value is now {value}");
//! });
//!
//! store.batch(|| {
//!     store.set_state(|prev| Counter { value: prev.value + 1 });
//!     store.set_state(|prev| Counter { value: prev.value + 1 });
//! });
//! assert_eq!(store.get_state().value, 2);
//! ```

mod error;
pub mod logging;
pub mod memo;
pub mod signal;
pub mod store;

pub use error::{CoreError, Result, SignalError, StoreError};
pub use logging::{PerfSpan, TreeFormatOptions, TreeStyle};
pub use memo::{DepKey, Memo};
pub use signal::{ConnectionGuard, ConnectionId, Signal};
pub use store::{CommitHook, Store, SubscriptionId};
