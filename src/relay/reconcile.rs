//! Configuration reconciliation
//!
//! Brings the registry in line with the definition source while restreams
//! keep running. The whole pass happens inside the registry's exclusive
//! section so a publish can never observe a half-applied configuration.

use std::collections::HashSet;
use std::sync::Arc;

use crate::definitions::RestreamDefinition;
use crate::error::Result;
use crate::registry::{Endpoint, RegistryWriter, Restream};

use super::Relay;

impl Relay {
    /// Reload restream definitions and apply them
    ///
    /// Returns the number of registered restreams. Fails only when the
    /// definition source as a whole is unavailable; single bad documents are
    /// skipped.
    pub async fn reload(&self) -> Result<usize> {
        tracing::info!("Reloading restream configs");

        let report = match self.definitions.load().await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load restream configs");
                return Err(e.into());
            }
        };

        let loaded = report.definitions.len();
        let mut restreams = self.registry.exclusive().await;
        for definition in report.definitions {
            self.apply(&mut restreams, definition).await;
        }

        tracing::info!(
            loaded,
            skipped = report.errors.len(),
            total = restreams.len(),
            "Loaded restream configs"
        );
        Ok(restreams.len())
    }

    async fn apply(&self, restreams: &mut RegistryWriter<'_>, definition: RestreamDefinition) {
        let Some(handle) = restreams.get(&definition.id) else {
            tracing::info!(restream = %definition.id, name = %definition.name, "New restream");

            let mut restream = Restream::new(definition.id.clone(), definition.name);
            for (endpoint_id, endpoint) in definition.endpoints {
                restream
                    .endpoints
                    .insert(endpoint_id, Endpoint::new(endpoint.name, endpoint.url));
            }
            if let Err(e) = restreams.upsert(restream).await {
                tracing::warn!(restream = %definition.id, error = %e, "Failed to register restream");
            }
            return;
        };

        let keep: HashSet<String> = definition.endpoints.keys().cloned().collect();
        match restreams.remove_endpoints_not_in(&definition.id, &keep).await {
            Ok(removed) => {
                for (endpoint_id, endpoint) in removed {
                    tracing::info!(
                        restream = %definition.id,
                        endpoint = %endpoint_id,
                        url = %endpoint.url,
                        "Removed endpoint"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(restream = %definition.id, error = %e, "Failed to remove endpoints")
            }
        }

        let mut restream = handle.write().await;
        if restream.name != definition.name {
            tracing::info!(restream = %definition.id, name = %definition.name, "Restream renamed");
            restream.name = definition.name;
        }

        let session = restream.session().cloned();
        for (endpoint_id, config) in &definition.endpoints {
            if let Some(endpoint) = restream.endpoints.get_mut(endpoint_id) {
                if endpoint.update(&config.name, &config.url) {
                    tracing::info!(
                        restream = %definition.id,
                        endpoint = %endpoint_id,
                        url = %config.url,
                        "Updated endpoint"
                    );
                }
                continue;
            }

            tracing::info!(
                restream = %definition.id,
                endpoint = %endpoint_id,
                url = %config.url,
                "Adding endpoint"
            );
            let mut endpoint = Endpoint::new(config.name.clone(), config.url.clone());
            // Joins a live stream at the queue's current position
            if let Some(session) = &session {
                let link = endpoint.attach(&session.cancel);
                self.spawn_push(Arc::clone(&handle), endpoint_id.clone(), link, session.clone());
            }
            restream.endpoints.insert(endpoint_id.clone(), endpoint);
        }

        restream.control().notify_reload();
    }
}
