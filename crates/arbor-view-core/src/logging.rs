//! Logging facilities for Arbor View.
//!
//! Arbor View uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Lookup misses and skipped events are logged at `debug`; inconsistent
//! indices and unrecognized object kinds at `warn`. The engine never logs
//! above `warn` for data-reachable inconsistencies.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core systems target.
    pub const CORE: &str = "arbor_view_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "arbor_view_core::signal";
    /// Event queue target.
    pub const QUEUE: &str = "arbor_view_core::queue";
    /// Tree builder target.
    pub const BUILDER: &str = "arbor_view::builder";
    /// Lazy loader target.
    pub const LAZY: &str = "arbor_view::lazy";
    /// Change-event processor target.
    pub const EVENTS: &str = "arbor_view::events";
    /// Visual forest target.
    pub const FOREST: &str = "arbor_view::forest";
}
