//! # Tether
//!
//! Keeps an out-of-process template worker in sync with an IDE workspace.
//!
//! The host watches the workspace, debounces change notifications into two
//! dirty flags and, on a fixed tick, broadcasts the project list and freshly
//! compiled project metadata. The worker reads those messages off a single
//! loopback connection, rebuilds its per-project state and regenerates and
//! recompiles every template document.
//!
//! ## Key Features
//!
//! - **Debounced**: any burst of changes between two ticks costs one broadcast
//! - **Self-healing**: every (re)connect starts with a full resync
//! - **Forward-compatible**: unknown message kinds are surfaced, never fatal
//! - **Isolated failures**: one bad document or project never stops the rest
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether::config::HostConfig;
//! use tether::host::{ChangeKind, Host, ManifestWorkspace};
//! use std::path::Path;
//!
//! let workspace = ManifestWorkspace::load(Path::new("tether.toml"), Vec::new())?;
//! let host = Host::start(Arc::new(workspace), &HostConfig::default())?;
//! println!("workers connect to port {}", host.port());
//!
//! host.synchronizer().on_change(ChangeKind::DocumentChanged);
//! # Ok::<(), tether::TetherError>(())
//! ```

pub mod codegen;
pub mod config;
pub mod error;
pub mod host;
pub mod protocol;
pub mod watcher;
pub mod worker;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use error::{Result, TetherError};
pub use protocol::{decode_message, encode, Message};
