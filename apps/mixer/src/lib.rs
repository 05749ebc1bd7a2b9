//! # mixer
//!
//! The async side of the knowledge-graph mixer: orchestrator, HTTP API,
//! CLI and configuration. All merge and storage logic lives in
//! `mixer-core`.

pub mod api;
pub mod cli;
pub mod config;
pub mod golden;
pub mod orchestrator;

pub use config::MixerConfig;
pub use orchestrator::{Merged, MixerOptions, Orchestrator, Stores};
