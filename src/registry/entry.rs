//! Restream and endpoint state
//!
//! This module defines the per-restream state stored in the registry.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::stats::ConnStats;
use crate::transport::StreamHeader;

use super::error::RegistryError;
use super::event::{Event, EventLevel};
use super::queue::FanoutQueue;

/// Pending control signals a restream can hold
const CONTROL_CHANNEL_CAPACITY: usize = 1;

/// How long a terminal signal waits for a busy control loop
const CONTROL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Command delivered to a restream's control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Administrative stop
    Stop,
    /// Configuration changed; advisory wake-up
    Reload,
    /// Origin stopped sending on its own
    OriginClosed,
}

/// Single-consumer control queue owned by a restream
///
/// Lives as long as the restream does. Each control loop takes exclusive
/// ownership of the receiving end for the duration of one streaming session.
#[derive(Debug, Clone)]
pub struct ControlChannel {
    tx: mpsc::Sender<ControlSignal>,
    rx: Arc<Mutex<mpsc::Receiver<ControlSignal>>>,
}

impl ControlChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Best-effort reload notification
    ///
    /// Never waits: if a signal is already pending the reload is dropped.
    pub fn notify_reload(&self) -> bool {
        self.tx.try_send(ControlSignal::Reload).is_ok()
    }

    /// Deliver a terminal signal (`Stop` or `OriginClosed`)
    ///
    /// Waits briefly behind a pending reload; returns false if nothing drained
    /// the channel in time.
    pub async fn deliver(&self, signal: ControlSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                match self.tx.send_timeout(signal, CONTROL_SEND_TIMEOUT).await {
                    Ok(()) => true,
                    Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Closed(_)) => false,
                }
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Take the receiving end for one control loop
    ///
    /// Signals left over from a previous session are discarded.
    pub(crate) async fn acquire(&self) -> ControlReceiver {
        let mut rx = Arc::clone(&self.rx).lock_owned().await;
        while let Ok(stale) = rx.try_recv() {
            tracing::debug!(signal = ?stale, "Discarding stale control signal");
        }
        ControlReceiver { rx }
    }
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end held by a running control loop
pub(crate) struct ControlReceiver {
    rx: OwnedMutexGuard<mpsc::Receiver<ControlSignal>>,
}

impl ControlReceiver {
    pub(crate) async fn recv(&mut self) -> Option<ControlSignal> {
        self.rx.recv().await
    }
}

/// Per-publish state; present exactly while a restream is streaming
#[derive(Debug, Clone)]
pub struct Session {
    /// Fan-out queue fed by the origin
    pub queue: FanoutQueue,
    /// Codec descriptor announced by the origin
    pub header: StreamHeader,
    /// Cancellation scope for every task of this session
    pub cancel: CancellationToken,
}

/// One configured outbound destination
#[derive(Debug)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    /// An outbound transport is open
    pub connected: bool,
    /// Last connection error
    pub error: Option<String>,
    pub stats: ConnStats,
    link: Option<EndpointLink>,
}

/// Handle to the lifecycle task currently owning an endpoint's connection
#[derive(Debug, Clone)]
pub(crate) struct EndpointLink {
    pub(crate) id: u64,
    pub(crate) cancel: CancellationToken,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            connected: false,
            error: None,
            stats: ConnStats::default(),
            link: None,
        }
    }

    /// Apply configuration fields; connection state is left alone
    ///
    /// Returns whether anything changed. A new URL takes effect on the next
    /// connection attempt.
    pub fn update(&mut self, name: &str, url: &str) -> bool {
        let changed = self.name != name || self.url != url;
        if changed {
            self.name = name.to_string();
            self.url = url.to_string();
        }
        changed
    }

    /// Whether a lifecycle task currently owns this endpoint
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Hand the endpoint to a new lifecycle task scoped under `parent`
    pub(crate) fn attach(&mut self, parent: &CancellationToken) -> EndpointLink {
        if let Some(old) = self.link.take() {
            old.cancel.cancel();
        }
        let link = EndpointLink {
            id: NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed),
            cancel: parent.child_token(),
        };
        self.link = Some(link.clone());
        link
    }

    /// Whether `link_id` is still the owning lifecycle task
    pub(crate) fn is_linked(&self, link_id: u64) -> bool {
        self.link.as_ref().map(|l| l.id) == Some(link_id)
    }

    /// Release ownership if `link_id` still holds it
    pub(crate) fn detach(&mut self, link_id: u64) {
        if self.is_linked(link_id) {
            self.link = None;
        }
    }

    /// Close any open outbound connection
    pub(crate) fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
        }
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            name: self.name.clone(),
            url: self.url.clone(),
            connected: self.connected,
            connect_err: self.error.clone(),
            stats: self.stats,
        }
    }
}

/// One logical channel: an inbound feed fanned out to configured endpoints
#[derive(Debug)]
pub struct Restream {
    pub id: String,
    pub name: String,
    pub endpoints: BTreeMap<String, Endpoint>,
    pub events: Vec<Event>,
    pub stats: ConnStats,
    control: ControlChannel,
    session: Option<Session>,
}

impl Restream {
    /// Create a registered, non-streaming restream
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoints: BTreeMap::new(),
            events: Vec::new(),
            stats: ConnStats::default(),
            control: ControlChannel::new(),
            session: None,
        }
    }

    /// Add an endpoint, builder style
    pub fn with_endpoint(mut self, id: impl Into<String>, endpoint: Endpoint) -> Self {
        self.endpoints.insert(id.into(), endpoint);
        self
    }

    /// An origin is connected
    pub fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    /// Bind an origin: create the fan-out queue and session scope
    pub(crate) fn start_session(&mut self, header: StreamHeader) -> Result<Session, RegistryError> {
        if self.session.is_some() {
            return Err(RegistryError::AlreadyStreaming(self.id.clone()));
        }

        let session = Session {
            queue: FanoutQueue::new(),
            header,
            cancel: CancellationToken::new(),
        };
        self.session = Some(session.clone());
        self.stats = ConnStats::default();
        for endpoint in self.endpoints.values_mut() {
            endpoint.stats = ConnStats::default();
        }
        Ok(session)
    }

    /// Tear down the current session, returning it for closing
    ///
    /// Byte totals stay readable until the next session; the bitrate drops to zero.
    pub(crate) fn finish_session(&mut self) -> Option<Session> {
        self.stats.bitrate = 0.0;
        self.session.take()
    }

    /// Append an event to the log
    pub fn add_event(&mut self, level: EventLevel, message: impl Into<String>) {
        let event = Event::new(level, message);
        tracing::debug!(
            restream = %self.id,
            level = %event.level,
            message = %event.message,
            "Restream event"
        );
        self.events.push(event);
    }

    /// Drop endpoints whose identifiers are not in `keep`
    ///
    /// Open connections of removed endpoints are closed first.
    pub fn remove_endpoints_not_in(&mut self, keep: &HashSet<String>) -> Vec<(String, Endpoint)> {
        let stale: Vec<String> = self
            .endpoints
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();

        stale
            .into_iter()
            .filter_map(|id| {
                let mut endpoint = self.endpoints.remove(&id)?;
                endpoint.disconnect();
                Some((id, endpoint))
            })
            .collect()
    }

    pub fn snapshot(&self) -> RestreamSnapshot {
        RestreamSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            endpoints: self
                .endpoints
                .iter()
                .map(|(id, e)| (id.clone(), e.snapshot()))
                .collect(),
            streaming: self.is_streaming(),
            stats: self.stats,
            events: self.events.clone(),
        }
    }
}

/// Point-in-time copy of an endpoint for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub url: String,
    pub connected: bool,
    #[serde(rename = "connectErr", skip_serializing_if = "Option::is_none")]
    pub connect_err: Option<String>,
    pub stats: ConnStats,
}

/// Point-in-time copy of a restream for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestreamSnapshot {
    pub id: String,
    pub name: String,
    pub endpoints: BTreeMap<String, EndpointSnapshot>,
    pub streaming: bool,
    pub stats: ConnStats,
    pub events: Vec<Event>,
}
