//! Endpoint lifecycle
//!
//! One task per endpoint per session: connect, announce the header, then
//! forward packets from the fan-out queue until the queue closes, the link
//! is cancelled or a write fails. Every outcome is recorded on the restream
//! as an event and on the endpoint's status fields.

use crate::error::Error;
use crate::registry::entry::EndpointLink;
use crate::registry::{EventLevel, QueueReader, RestreamHandle, Session};
use crate::transport::PacketSink;

use super::Relay;

/// Packets forwarded between transmit counter updates
const TX_FLUSH_PACKETS: u64 = 64;

impl Relay {
    /// Start the lifecycle task for an attached endpoint
    pub(crate) fn spawn_push(
        &self,
        handle: RestreamHandle,
        endpoint_id: String,
        link: EndpointLink,
        session: Session,
    ) {
        let relay = self.clone();
        tokio::spawn(async move {
            relay.push(handle, endpoint_id, link, session).await;
        });
    }

    async fn push(
        &self,
        handle: RestreamHandle,
        endpoint_id: String,
        link: EndpointLink,
        session: Session,
    ) {
        let (restream_id, name, url) = {
            let restream = handle.read().await;
            match restream.endpoints.get(&endpoint_id) {
                Some(endpoint) if endpoint.is_linked(link.id) => {
                    (restream.id.clone(), endpoint.name.clone(), endpoint.url.clone())
                }
                // Superseded or removed before we got going
                _ => return,
            }
        };

        tracing::info!(restream = %restream_id, endpoint = %endpoint_id, url = %url, "Connecting endpoint");

        let connected = tokio::select! {
            _ = link.cancel.cancelled() => {
                release(&handle, &endpoint_id, &link).await;
                return;
            }
            result = self.connector.connect(&url) => result,
        };

        let mut sink = match connected {
            Ok(sink) => sink,
            Err(e) => {
                tracing::warn!(
                    restream = %restream_id,
                    endpoint = %endpoint_id,
                    url = %url,
                    error = %e,
                    "Endpoint did not connect"
                );
                let mut restream = handle.write().await;
                if let Some(endpoint) = restream.endpoints.get_mut(&endpoint_id) {
                    if endpoint.is_linked(link.id) {
                        endpoint.connected = false;
                        endpoint.error = Some(e.to_string());
                        endpoint.detach(link.id);
                    }
                }
                restream.add_event(
                    EventLevel::Danger,
                    format!("Endpoint '{}' did not connect: {}.", name, e),
                );
                return;
            }
        };

        // Join before the header goes out so no packet falls in between
        let reader = session.queue.subscribe();

        {
            let mut restream = handle.write().await;
            let linked = match restream.endpoints.get_mut(&endpoint_id) {
                Some(endpoint) if endpoint.is_linked(link.id) => {
                    endpoint.connected = true;
                    endpoint.error = None;
                    true
                }
                _ => false,
            };
            if !linked {
                drop(restream);
                sink.close().await;
                return;
            }
            restream.add_event(EventLevel::Success, format!("Endpoint '{}' connected.", name));
        }

        tracing::info!(restream = %restream_id, endpoint = %endpoint_id, "Endpoint connected");

        let header_result = sink.write_header(&session.header).await;
        tokio::spawn(forward(handle, endpoint_id, name, link, reader, sink, header_result));
    }
}

/// Copy packets from the queue to one destination until something ends it
async fn forward(
    handle: RestreamHandle,
    endpoint_id: String,
    name: String,
    link: EndpointLink,
    mut reader: QueueReader,
    mut sink: Box<dyn PacketSink>,
    header_result: Result<(), Error>,
) {
    let mut pending_tx = 0usize;
    let mut since_flush = 0u64;

    let failure = match header_result {
        Err(e) => Some(e),
        Ok(()) => loop {
            let tag = tokio::select! {
                biased;
                _ = link.cancel.cancelled() => break None,
                received = reader.recv() => match received {
                    Ok(tag) => tag,
                    Err(_) => break None,
                },
            };

            let written = tokio::select! {
                biased;
                _ = link.cancel.cancelled() => break None,
                written = sink.write_packet(&tag) => written,
            };
            if let Err(e) = written {
                break Some(e);
            }

            pending_tx += tag.size();
            since_flush += 1;
            if since_flush >= TX_FLUSH_PACKETS {
                add_tx(&handle, &endpoint_id, &link, pending_tx).await;
                pending_tx = 0;
                since_flush = 0;
            }
        },
    };

    if failure.is_none() {
        if let Err(e) = sink.write_trailer().await {
            tracing::debug!(endpoint = %endpoint_id, error = %e, "Trailer not delivered");
        }
    }
    sink.close().await;

    let mut restream = handle.write().await;
    let restream_id = restream.id.clone();
    if let Some(endpoint) = restream.endpoints.get_mut(&endpoint_id) {
        if endpoint.is_linked(link.id) {
            endpoint.stats.add_tx(pending_tx);
            endpoint.connected = false;
            if let Some(e) = &failure {
                endpoint.error = Some(e.to_string());
            }
            endpoint.detach(link.id);
        }
    }

    if let Some(e) = &failure {
        tracing::warn!(restream = %restream_id, endpoint = %endpoint_id, error = %e, "Endpoint connection error");
        restream.add_event(
            EventLevel::Danger,
            format!("Endpoint '{}' experienced a connection error: {}.", name, e),
        );
    }
    tracing::info!(restream = %restream_id, endpoint = %endpoint_id, "Endpoint disconnected");
    restream.add_event(EventLevel::Warning, format!("Endpoint '{}' disconnected.", name));
}

async fn add_tx(handle: &RestreamHandle, endpoint_id: &str, link: &EndpointLink, bytes: usize) {
    let mut restream = handle.write().await;
    if let Some(endpoint) = restream.endpoints.get_mut(endpoint_id) {
        if endpoint.is_linked(link.id) {
            endpoint.stats.add_tx(bytes);
        }
    }
}

/// Give up ownership without having connected
async fn release(handle: &RestreamHandle, endpoint_id: &str, link: &EndpointLink) {
    let mut restream = handle.write().await;
    if let Some(endpoint) = restream.endpoints.get_mut(endpoint_id) {
        endpoint.detach(link.id);
    }
}
