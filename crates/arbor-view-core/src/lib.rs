//! Core systems for Arbor View.
//!
//! This crate provides the foundational components of the Arbor View tree
//! synchronization engine:
//!
//! - **Signal/Slot System**: Type-safe change notification for the
//!   presentation collaborator
//! - **Event Queue**: The single shared, lock-protected channel through
//!   which background work posts change events to the forest-owning context
//! - **Logging**: `tracing` targets for per-subsystem filtering
//!
//! # Signal/Slot Example
//!
//! ```
//! use arbor_view_core::Signal;
//!
//! let selection_changed = Signal::<usize>::new();
//!
//! let conn_id = selection_changed.connect(|row| {
//!     println!("Selected row: {}", row);
//! });
//!
//! selection_changed.emit(3);
//!
//! selection_changed.disconnect(conn_id);
//! ```
//!
//! # Event Queue Example
//!
//! ```
//! use arbor_view_core::EventQueue;
//!
//! let queue = EventQueue::new();
//!
//! // Posted from any thread...
//! queue.post("value updated").unwrap();
//!
//! // ...drained on the owning context, strictly in submission order.
//! for event in queue.drain() {
//!     println!("{event}");
//! }
//! ```

mod error;
mod event_queue;
pub mod logging;
pub mod signal;

pub use error::{CoreError, QueueError, Result};
pub use event_queue::EventQueue;
pub use signal::{ConnectionId, Signal};
