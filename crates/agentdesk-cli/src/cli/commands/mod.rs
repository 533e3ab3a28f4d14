//! CLI command handlers.

pub mod config;
pub mod flush;
pub mod queue;
pub mod send;
pub mod threads;
