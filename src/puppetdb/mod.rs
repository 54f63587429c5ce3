//! PuppetDB access: wire types, TLS setup and the HTTP client.

pub mod client;
pub mod model;
pub mod tls;

pub use client::{node_path, NodeLookup, PuppetDbClient, COMMAND_PATH};
pub use model::{CommandEnvelope, NodeRecord, QueryOutcome};
