//! Smoke and conformance checks for OpenAI-compatible inference servers.

pub mod client;
pub mod config;
pub mod models;
pub mod probes;
pub mod readiness;
pub mod report;
pub mod runner;
pub mod signal;
pub mod stream;
