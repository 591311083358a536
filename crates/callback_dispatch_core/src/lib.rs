//! Shared callback dispatch domain primitives.
//!
//! This crate owns event classification, envelope decoding, token extraction
//! and the completion report contract. It intentionally excludes AWS SDK and
//! Lambda runtime concerns.

pub mod contract;
pub mod envelope;
