// Toolflow — Workflow client for external agent tool servers
// License: Apache-2.0

pub mod config;
pub mod credentials;
pub mod executor;
pub mod logger;
pub mod mcp;
pub mod provider;
pub mod runlog;
pub mod tool;
pub mod workflow;

pub use executor::{WorkflowExecutor, WorkflowOutcome};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
