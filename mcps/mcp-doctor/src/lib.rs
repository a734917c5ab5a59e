//! mcp-doctor Library
//!
//! Diagnostic repair engine for locally installed MCP servers.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use mcp_doctor::{DoctorConfig, RepairEngine};
//!
//! let settings = DoctorConfig::load()?;
//! let engine = RepairEngine::from_settings(&settings).build();
//! let servers = engine.load_servers().await;
//! let report = engine.fix_all_issues(&servers, errors).await;
//! ```
//!
//! - Turns classified errors into a repair plan, one fix per server and error kind
//! - Applies automatic fixes unattended; everything else waits for confirmation
//! - Repairs JSON syntax in client configs after taking a backup
//! - Serves the same operations as MCP tools over stdio

pub mod advisor;
pub mod backup;
pub mod config_store;
pub mod error;
pub mod events;
pub mod executor;
pub mod handlers;
pub mod locks;
pub mod notify;
pub mod orchestrator;
pub mod params;
pub mod planner;
pub mod probe;
pub mod server;
pub mod settings;
pub mod strategies;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use error::{DoctorError, DoctorResult};
pub use orchestrator::{ConfirmationReport, FixAllReport, RepairEngine};
pub use server::McpDoctorServer;
pub use settings::DoctorConfig;
pub use types::{
    Change, ChangeKind, ClientTarget, ClientType, ErrorKind, ErrorRecord, Fix, FixFailure, FixId,
    FixResult, McpServer, RepairPlan, ServerRegistry,
};

// Re-export parameter types for direct API usage
pub use params::*;
