//! Origin ingestion
//!
//! Binds an accepted origin to its restream, starts the session's tasks and
//! pumps packets from the origin into the fan-out queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::notify::{spawn_notify, Notifier, PublishEvent};
use crate::registry::{
    ControlChannel, ControlSignal, EventLevel, RegistryError, RestreamHandle, Session,
};
use crate::stats::BitrateFilter;
use crate::transport::{stream_id_from_path, Origin, PacketSource};

use super::control::run_control_loop;
use super::Relay;

enum IngestEnd {
    /// The origin stopped sending
    OriginClosed,
    /// The session was torn down around us
    Cancelled,
}

impl Relay {
    /// Bind an inbound origin to the restream its path names
    ///
    /// Rejects unknown identifiers and restreams that already have an
    /// origin; the origin is closed in both cases. On success the returned
    /// task finishes once ingestion has ended.
    pub async fn publish(&self, origin: Origin) -> Result<JoinHandle<()>> {
        let Origin {
            path,
            header,
            mut source,
        } = origin;

        let id = stream_id_from_path(&path).map(str::to_string);
        let handle = match id {
            Some(ref id) => self.registry.get(id).await,
            None => None,
        };
        let (Some(id), Some(handle)) = (id, handle) else {
            tracing::warn!(path = %path, "Rejecting publish for unknown restream");
            source.close().await;
            return Err(RegistryError::RestreamNotFound(path).into());
        };

        let mut restream = handle.write().await;
        let session = match restream.start_session(header) {
            Ok(session) => session,
            Err(e) => {
                drop(restream);
                tracing::warn!(restream = %id, "Rejecting second origin");
                source.close().await;
                return Err(e.into());
            }
        };

        // Taken while the restream is locked: no signal can be sent for this
        // session before the loop owns the receiver
        let control = restream.control().clone();
        let receiver = control.acquire().await;

        let ingest = tokio::spawn(ingest(
            Arc::clone(&self.notifier),
            Arc::clone(&handle),
            id.clone(),
            source,
            session.clone(),
            control,
            self.bitrate_interval,
        ));
        tokio::spawn(run_control_loop(Arc::clone(&handle), receiver, session.clone()));

        let mut links = Vec::with_capacity(restream.endpoints.len());
        for (endpoint_id, endpoint) in restream.endpoints.iter_mut() {
            links.push((endpoint_id.clone(), endpoint.attach(&session.cancel)));
        }
        for (endpoint_id, link) in links {
            self.spawn_push(Arc::clone(&handle), endpoint_id, link, session.clone());
        }

        restream.add_event(
            EventLevel::Success,
            "Restream started; inbound data is being received.",
        );
        tracing::info!(restream = %id, endpoints = restream.endpoints.len(), "Restream started");
        drop(restream);

        spawn_notify(Arc::clone(&self.notifier), id, PublishEvent::Publish);
        Ok(ingest)
    }
}

async fn ingest(
    notifier: Arc<dyn Notifier>,
    handle: RestreamHandle,
    id: String,
    mut source: Box<dyn PacketSource>,
    session: Session,
    control: ControlChannel,
    bitrate_interval: Duration,
) {
    let mut filter = BitrateFilter::with_interval(bitrate_interval);
    let mut pending_rx = 0usize;

    let end = loop {
        let read = tokio::select! {
            _ = session.cancel.cancelled() => break IngestEnd::Cancelled,
            read = source.read_packet() => read,
        };

        let tag = match read {
            Ok(Some(tag)) => tag,
            Ok(None) => break IngestEnd::OriginClosed,
            Err(e) => {
                tracing::warn!(restream = %id, error = %e, "Origin read failed");
                break IngestEnd::OriginClosed;
            }
        };

        pending_rx += tag.size();
        let sample = filter.observe(&tag);
        if session.queue.push(tag).is_err() {
            break IngestEnd::Cancelled;
        }

        if let Some(kbps) = sample {
            let mut restream = handle.write().await;
            restream.stats.add_rx(pending_rx);
            // A finished session keeps its bitrate at zero
            if !session.cancel.is_cancelled() {
                restream.stats.bitrate = kbps;
            }
            pending_rx = 0;
            tracing::debug!(restream = %id, bitrate = kbps, "Inbound bitrate");
        }
    };

    source.close().await;
    handle.write().await.stats.add_rx(pending_rx);

    if let IngestEnd::OriginClosed = end {
        tracing::info!(restream = %id, "Origin stopped publishing");
        if !control.deliver(ControlSignal::OriginClosed).await {
            // Nothing drained the channel; end the session directly
            session.cancel.cancel();
        }
    }

    spawn_notify(notifier, id, PublishEvent::PublishDone);
}
