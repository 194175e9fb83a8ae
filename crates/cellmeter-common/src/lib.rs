//! Shared types for the Cellmeter edge agent.
//!
//! Data models, configuration, and ID generation used by the agent daemon.

pub mod config;
pub mod ids;
pub mod models;
