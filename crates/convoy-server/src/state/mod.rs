//! Shared application state.

pub mod sink;
pub mod store;

pub use sink::{BroadcastSink, StreamMessage};
pub use store::AppState;
