//! The derived visual tree and its synchronization machinery.

pub mod builder;
pub mod engine;
pub mod events;
pub mod expand;
mod lazy;
pub mod node;
pub mod signals;
