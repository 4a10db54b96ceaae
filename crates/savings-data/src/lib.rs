//! Data ingestion layer for the savings dashboard.
//!
//! Reads CSV uploads and the remote JSON endpoint, aggregates and validates
//! them, and produces canonical [`savings_core::models::AppData`] snapshots.

pub mod aggregator;
pub mod client;
pub mod import;
pub mod normalizer;
pub mod reader;

pub use savings_core as core;
