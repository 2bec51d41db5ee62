//! Shared library surface for the convoy server and its tests.

pub mod api;
pub mod config;
pub mod loops;
pub mod seed;
pub mod state;
