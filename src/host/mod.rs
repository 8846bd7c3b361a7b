//! Host: the IDE side of the connection.
//!
//! ## Architecture
//!
//! ```text
//! workspace change ──▶ Synchronizer (dirty flags)
//!                           │ every tick
//!                           ▼
//!                      Listener::broadcast ──tcp──▶ workers
//!
//! new connection ──▶ version + full project list, then broadcasts
//! ```

pub mod listener;
pub mod manifest;
pub mod synchronizer;
pub mod workspace;

use std::sync::Arc;
use tracing::info;

use crate::config::HostConfig;
use crate::error::Result;

pub use listener::{Broadcast, Client, Listener};
pub use manifest::ManifestWorkspace;
pub use synchronizer::{DirtyFlags, MetadataBatch, Synchronizer, TickOutcome, Timer};
pub use workspace::{greeting, solution_message, ChangeKind, EmittedMetadata, Workspace};

/// A running listener plus its synchronizer and tick timer.
pub struct Host {
    listener: Arc<Listener>,
    synchronizer: Arc<Synchronizer>,
    timer: Option<Timer>,
}

impl Host {
    /// Bind, start accepting, and start ticking.
    pub fn start(workspace: Arc<dyn Workspace>, config: &HostConfig) -> Result<Self> {
        let listener = Listener::bind(config.port)?;

        let synchronizer = Arc::new(Synchronizer::new(
            Arc::clone(&workspace),
            Arc::clone(&listener) as Arc<dyn Broadcast>,
        ));

        let version = config.protocol_version;
        listener.start(move || greeting(workspace.as_ref(), version))?;

        let timer = synchronizer.start(config.tick_interval())?;
        info!(port = listener.port(), tick_ms = config.tick_interval_ms, "host started");

        Ok(Self { listener, synchronizer, timer: Some(timer) })
    }

    pub fn port(&self) -> u16 {
        self.listener.port()
    }

    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    /// Entry point for workspace change notifications.
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    /// Stop ticking, then stop accepting and disconnect every worker.
    pub fn stop(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        self.listener.stop();
    }
}
