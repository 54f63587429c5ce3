//! Read-only data sources.

pub mod node;
