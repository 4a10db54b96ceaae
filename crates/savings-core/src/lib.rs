//! Shared data model, error taxonomy and settings for the savings dashboard.

pub mod error;
pub mod models;
pub mod schema;
pub mod settings;
pub mod time_utils;
