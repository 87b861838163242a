//! Channel-backed transport
//!
//! Lets a relay run without sockets: an origin is fed through an mpsc
//! channel and every outbound connection reports what it was sent as a
//! stream of [`SinkEvent`]s. Destinations can be told to refuse connections
//! or to fail writes, which is how endpoint failures are exercised in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::media::FlvTag;

use super::{Connector, Origin, PacketSink, PacketSource, StreamHeader};

/// Create an in-memory origin for `path`
///
/// Packets sent on the returned [`OriginFeed`] are read by the relay in
/// order. Dropping the feed ends the publish.
pub fn origin(path: &str, header: StreamHeader) -> (OriginFeed, Origin) {
    let (tx, rx) = mpsc::channel(1024);
    let closed = Arc::new(AtomicBool::new(false));

    let feed = OriginFeed {
        tx,
        closed: Arc::clone(&closed),
    };
    let source = MemorySource { rx, closed };

    (feed, Origin::new(path, header, Box::new(source)))
}

/// Publisher side of an in-memory origin
pub struct OriginFeed {
    tx: mpsc::Sender<FlvTag>,
    closed: Arc<AtomicBool>,
}

impl OriginFeed {
    /// Send a packet; fails once the relay closed the origin
    pub async fn send(&self, tag: FlvTag) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        self.tx.send(tag).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Whether the relay closed this origin
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct MemorySource {
    rx: mpsc::Receiver<FlvTag>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PacketSource for MemorySource {
    async fn read_packet(&mut self) -> Result<Option<FlvTag>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
    }
}

/// What an in-memory destination observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Header(StreamHeader),
    Packet(FlvTag),
    Trailer,
    Closed,
}

struct Destination {
    refuse: Option<String>,
    fail_writes: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<SinkEvent>,
}

/// Receiving end of a registered destination
pub struct DestinationHandle {
    /// Everything the relay sent, across all connections to this URL
    pub events: mpsc::UnboundedReceiver<SinkEvent>,
    fail_writes: Arc<AtomicBool>,
}

impl DestinationHandle {
    /// Make every subsequent write to this destination fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::Release);
    }
}

/// Connector that resolves URLs to registered in-memory destinations
///
/// Unregistered URLs are refused.
#[derive(Default)]
pub struct MemoryConnector {
    destinations: Mutex<HashMap<String, Destination>>,
    attempts: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a destination that accepts connections
    pub async fn destination(&self, url: &str) -> DestinationHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));

        self.destinations.lock().await.insert(
            url.to_string(),
            Destination {
                refuse: None,
                fail_writes: Arc::clone(&fail_writes),
                events: tx,
            },
        );

        DestinationHandle {
            events: rx,
            fail_writes,
        }
    }

    /// Register a destination that refuses connections with `reason`
    pub async fn refuse(&self, url: &str, reason: &str) {
        let (tx, _) = mpsc::unbounded_channel();
        self.destinations.lock().await.insert(
            url.to_string(),
            Destination {
                refuse: Some(reason.to_string()),
                fail_writes: Arc::new(AtomicBool::new(false)),
                events: tx,
            },
        );
    }

    /// URLs of every connection attempt so far, in order
    pub async fn attempts(&self) -> Vec<String> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PacketSink>> {
        self.attempts.lock().await.push(url.to_string());

        let destinations = self.destinations.lock().await;
        let dest = destinations
            .get(url)
            .ok_or_else(|| Error::transport("connection refused"))?;

        if let Some(ref reason) = dest.refuse {
            return Err(Error::transport(reason.clone()));
        }

        Ok(Box::new(MemorySink {
            events: dest.events.clone(),
            fail_writes: Arc::clone(&dest.fail_writes),
            closed: false,
        }))
    }
}

struct MemorySink {
    events: mpsc::UnboundedSender<SinkEvent>,
    fail_writes: Arc<AtomicBool>,
    closed: bool,
}

impl MemorySink {
    fn emit(&self, event: SinkEvent) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(Error::transport("broken pipe"));
        }
        self.events.send(event).map_err(|_| Error::ConnectionClosed)
    }
}

#[async_trait]
impl PacketSink for MemorySink {
    async fn write_header(&mut self, header: &StreamHeader) -> Result<()> {
        self.emit(SinkEvent::Header(header.clone()))
    }

    async fn write_packet(&mut self, tag: &FlvTag) -> Result<()> {
        self.emit(SinkEvent::Packet(tag.clone()))
    }

    async fn write_trailer(&mut self) -> Result<()> {
        self.emit(SinkEvent::Trailer)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.events.send(SinkEvent::Closed);
        }
    }
}
