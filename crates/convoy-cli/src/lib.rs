//! Convoy CLI - operator tooling for the convoy command API.
//!
//! The `convoy` binary wraps [`CommandClient`], a blocking HTTP client for
//! the server's REST endpoints.

pub mod client;

pub use client::{parse_enum, CommandClient};
