//! Core agentdesk library: multi-agent chat stream engine, transcript reducer,
//! and the durable outbound message pipeline.

pub mod agent;
pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod outbound;
pub mod stream;
pub mod transcript;
