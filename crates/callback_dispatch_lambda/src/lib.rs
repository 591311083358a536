//! AWS-oriented adapters and handlers for task-completion callbacks.
//!
//! This crate owns runtime integration details (Lambda handlers, the workflow
//! coordinator seam, environment configuration and telemetry) on top of the
//! event contract in `callback_dispatch_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod telemetry;
