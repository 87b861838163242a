//! Fan-out queue
//!
//! One producer (the origin's ingestion task), many consumers (endpoint
//! forwarders). Built on `tokio::sync::broadcast`, so each reader owns its
//! own cursor and starts at the producer's current write position: a reader
//! never sees packets pushed before it subscribed.
//!
//! A slow reader never blocks the producer or its siblings. If it falls more
//! than `capacity` packets behind it skips ahead and the skipped count is
//! logged.
//!
//! Closing is explicit and happens once, from the restream's control loop.
//! After [`FanoutQueue::close`] every reader drains what it already has
//! buffered and then gets [`QueueClosed`].

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::media::FlvTag;

/// Default backlog in packets
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// The queue was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("fan-out queue closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Broadcast buffer shared by a restream's ingestion and endpoint tasks
#[derive(Debug, Clone)]
pub struct FanoutQueue {
    tx: broadcast::Sender<FlvTag>,
    closed: CancellationToken,
}

impl FanoutQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: CancellationToken::new(),
        }
    }

    /// Publish a packet to every current reader
    ///
    /// Returns how many readers it was delivered to.
    pub fn push(&self, tag: FlvTag) -> Result<usize, QueueClosed> {
        if self.is_closed() {
            return Err(QueueClosed);
        }
        // No readers is not an error: nobody has joined yet
        Ok(self.tx.send(tag).unwrap_or(0))
    }

    /// Join at the latest position
    pub fn subscribe(&self) -> QueueReader {
        QueueReader {
            rx: self.tx.subscribe(),
            closed: self.closed.clone(),
            skipped: 0,
        }
    }

    /// Close the queue, terminating every reader
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Number of live readers
    pub fn reader_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FanoutQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// One consumer's cursor into a [`FanoutQueue`]
#[derive(Debug)]
pub struct QueueReader {
    rx: broadcast::Receiver<FlvTag>,
    closed: CancellationToken,
    skipped: u64,
}

impl QueueReader {
    /// Wait for the next packet in producer order
    pub async fn recv(&mut self) -> Result<FlvTag, QueueClosed> {
        loop {
            let result = tokio::select! {
                biased;
                result = self.rx.recv() => result,
                _ = self.closed.cancelled() => return Err(QueueClosed),
            };

            match result {
                Ok(tag) => return Ok(tag),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.skipped += n;
                    tracing::warn!(
                        skipped = n,
                        total_skipped = self.skipped,
                        "Queue reader fell behind, skipping ahead"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return Err(QueueClosed),
            }
        }
    }

    /// Packets this reader skipped because it fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn tag(ts: u32) -> FlvTag {
        FlvTag::video(ts, Bytes::from_static(&[0x27, 0x01]))
    }

    #[tokio::test]
    async fn test_late_reader_joins_at_latest() {
        let queue = FanoutQueue::new();
        let mut early = queue.subscribe();

        queue.push(tag(0)).unwrap();
        queue.push(tag(33)).unwrap();

        let mut late = queue.subscribe();
        queue.push(tag(66)).unwrap();

        assert_eq!(early.recv().await.unwrap().timestamp, 0);
        assert_eq!(early.recv().await.unwrap().timestamp, 33);
        assert_eq!(early.recv().await.unwrap().timestamp, 66);

        // Nothing from before the join, nothing missing after it
        assert_eq!(late.recv().await.unwrap().timestamp, 66);
    }

    #[tokio::test]
    async fn test_push_without_readers() {
        let queue = FanoutQueue::new();
        assert_eq!(queue.push(tag(0)), Ok(0));
        assert_eq!(queue.reader_count(), 0);
    }

    #[tokio::test]
    async fn test_close_terminates_readers() {
        let queue = FanoutQueue::new();
        let mut a = queue.subscribe();
        let mut b = queue.subscribe();

        queue.push(tag(0)).unwrap();
        queue.close();

        // Buffered data drains first
        assert_eq!(a.recv().await.unwrap().timestamp, 0);
        assert_eq!(a.recv().await, Err(QueueClosed));
        assert_eq!(b.recv().await.unwrap().timestamp, 0);
        assert_eq!(b.recv().await, Err(QueueClosed));

        assert_eq!(queue.push(tag(33)), Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_reader() {
        let queue = FanoutQueue::new();
        let mut reader = queue.subscribe();

        let waiter = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;
        queue.close();

        assert_eq!(waiter.await.unwrap(), Err(QueueClosed));
    }

    #[tokio::test]
    async fn test_slow_reader_skips_without_blocking_producer() {
        let queue = FanoutQueue::with_capacity(4);
        let mut slow = queue.subscribe();
        let mut fast = queue.subscribe();

        for ts in 0..10 {
            queue.push(tag(ts)).unwrap();
            assert_eq!(fast.recv().await.unwrap().timestamp, ts);
        }

        // Slow reader lost the oldest packets but keeps producer order
        let first = slow.recv().await.unwrap().timestamp;
        assert_eq!(first, 6);
        assert_eq!(slow.skipped(), 6);
        assert_eq!(slow.recv().await.unwrap().timestamp, 7);
    }
}
