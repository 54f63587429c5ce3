//! Managed resources.

pub mod node;
