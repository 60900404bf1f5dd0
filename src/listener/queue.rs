use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::warn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Hand-off between the blocking reader and the processor.
///
/// Unbounded unless a capacity is given: when replay is slower than the input
/// arrives, the queue grows with it. With a capacity, records arriving at a
/// full queue are dropped and counted.
pub fn ingestion_queue<T>(capacity: Option<usize>) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = unbounded_channel();
    let stats = QueueStats {
        shared: Arc::new(Shared {
            depth: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            capacity,
        }),
    };
    (
        QueueSender {
            tx,
            stats: stats.clone(),
        },
        QueueReceiver { rx, stats },
    )
}

#[derive(Debug)]
struct Shared {
    depth: AtomicUsize,
    dropped: AtomicU64,
    warned: AtomicBool,
    capacity: Option<usize>,
}

/// Read-only view of the queue counters.
#[derive(Debug, Clone)]
pub struct QueueStats {
    shared: Arc<Shared>,
}

impl QueueStats {
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub enum Push {
    Queued,
    Dropped,
    Closed,
}

#[derive(Debug)]
pub struct QueueSender<T> {
    tx: UnboundedSender<T>,
    stats: QueueStats,
}

impl<T> QueueSender<T> {
    pub fn push(&self, item: T) -> Push {
        let shared = &self.stats.shared;
        if let Some(capacity) = shared.capacity {
            if shared.depth.load(Ordering::Acquire) >= capacity {
                shared.dropped.fetch_add(1, Ordering::AcqRel);
                if !shared.warned.swap(true, Ordering::AcqRel) {
                    warn!("Ingestion queue full ({} records), dropping input", capacity);
                }
                return Push::Dropped;
            }
        }
        shared.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(item).is_err() {
            shared.depth.fetch_sub(1, Ordering::AcqRel);
            return Push::Closed;
        }
        Push::Queued
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }
}

#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: UnboundedReceiver<T>,
    stats: QueueStats,
}

impl<T> QueueReceiver<T> {
    /// `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.stats.shared.depth.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    pub fn try_recv(&mut self) -> Option<T> {
        let item = self.rx.try_recv().ok()?;
        self.stats.shared.depth.fetch_sub(1, Ordering::AcqRel);
        Some(item)
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_and_depth() {
        let (tx, mut rx) = ingestion_queue(None);
        for i in 0..5 {
            assert!(matches!(tx.push(i), Push::Queued));
        }
        assert_eq!(rx.stats().depth(), 5);
        drop(tx);

        let mut seen = Vec::new();
        while let Some(i) = rx.recv().await {
            seen.push(i);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(rx.stats().depth(), 0);
    }

    #[tokio::test]
    async fn test_capacity_drops_newest() {
        let (tx, mut rx) = ingestion_queue(Some(2));
        assert!(matches!(tx.push("a"), Push::Queued));
        assert!(matches!(tx.push("b"), Push::Queued));
        assert!(matches!(tx.push("c"), Push::Dropped));
        assert_eq!(tx.stats().dropped(), 1);

        assert_eq!(rx.recv().await, Some("a"));
        assert!(matches!(tx.push("d"), Push::Queued));
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, Some("d"));
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (tx, rx) = ingestion_queue::<u8>(None);
        let stats = rx.stats();
        drop(rx);
        assert!(matches!(tx.push(1), Push::Closed));
        assert_eq!(stats.depth(), 0);
    }
}
