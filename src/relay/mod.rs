//! Restream engine
//!
//! [`Relay`] ties the registry to the outside world:
//!
//! - [`Relay::reload`] reconciles the registry with the definition source
//! - [`Relay::publish`] binds an inbound origin to its restream and starts
//!   the session's tasks
//! - [`Relay::stop`] asks a live restream's control loop to shut down
//!
//! Per streaming restream there is one ingestion task, one control loop and
//! one lifecycle task per endpoint. All of them run under the session's
//! cancellation scope:
//!
//! ```text
//!   session.cancel
//!     ├── ingest        origin ──► BitrateFilter ──► FanoutQueue
//!     ├── control loop  Stop | OriginClosed ──► teardown
//!     └── endpoint link (child token, one per endpoint)
//!           connect ──► header ──► forward until queue closed / write error
//! ```

mod control;
mod endpoint;
mod ingest;
mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use crate::definitions::DefinitionSource;
use crate::notify::{NoopNotifier, Notifier};
use crate::registry::{ControlSignal, RegistryError, RestreamRegistry, RestreamSnapshot};
use crate::stats::bitrate::SAMPLE_INTERVAL;
use crate::transport::Connector;

/// The restream engine
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct Relay {
    registry: Arc<RestreamRegistry>,
    connector: Arc<dyn Connector>,
    notifier: Arc<dyn Notifier>,
    definitions: Arc<dyn DefinitionSource>,
    bitrate_interval: Duration,
}

impl Relay {
    /// Create a relay with an empty registry and no webhook
    pub fn new(definitions: Arc<dyn DefinitionSource>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry: Arc::new(RestreamRegistry::new()),
            connector,
            notifier: Arc::new(NoopNotifier),
            definitions,
            bitrate_interval: SAMPLE_INTERVAL,
        }
    }

    /// Announce stream start/stop through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sampling window for the inbound bitrate estimate
    pub fn with_bitrate_interval(mut self, interval: Duration) -> Self {
        self.bitrate_interval = interval;
        self
    }

    /// Get a reference to the restream registry
    pub fn registry(&self) -> &Arc<RestreamRegistry> {
        &self.registry
    }

    /// Snapshot of every restream
    pub async fn list(&self) -> Vec<RestreamSnapshot> {
        self.registry.list().await
    }

    /// Send `Stop` to a streaming restream
    ///
    /// Returns the restream's display name.
    pub async fn stop(&self, id: &str) -> Result<String, RegistryError> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| RegistryError::RestreamNotFound(id.to_string()))?;

        // Held through delivery so the session cannot be cleared in between
        let restream = handle.read().await;
        let live = restream
            .session()
            .is_some_and(|session| !session.cancel.is_cancelled());
        if !live {
            return Err(RegistryError::NotLive(id.to_string()));
        }

        if restream.control().deliver(ControlSignal::Stop).await {
            tracing::info!(restream = %id, "Stop command sent");
            Ok(restream.name.clone())
        } else {
            Err(RegistryError::NotLive(id.to_string()))
        }
    }

    /// Stop every streaming restream
    pub async fn stop_all(&self) {
        for snapshot in self.registry.list().await {
            if snapshot.streaming {
                if let Err(e) = self.stop(&snapshot.id).await {
                    tracing::debug!(restream = %snapshot.id, error = %e, "Skipping stop");
                }
            }
        }
    }
}
