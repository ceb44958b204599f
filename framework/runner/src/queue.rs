//! Bounded hand-off between the point producers and the batch dispatcher.
//!
//! Producers wait when the queue is full. That throttles reading of the log to the rate at which
//! the sink accepts writes, and keeps memory bounded while the sink is unavailable.

use gatling_influx_instruments::MetricPoint;
use tokio::sync::mpsc;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
#[error("dispatch queue is closed")]
pub struct QueueClosedError(pub MetricPoint);

/// Create a first-in-first-out queue that holds at most `capacity` points.
pub fn dispatch_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (QueueSender { sender }, QueueReceiver { receiver })
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    sender: mpsc::Sender<MetricPoint>,
}

impl QueueSender {
    /// Add a point to the back of the queue, waiting for space if the queue is full.
    ///
    /// Fails, handing the point back, once the receiving side has closed the queue.
    pub async fn push(&self, point: MetricPoint) -> Result<(), QueueClosedError> {
        self.sender
            .send(point)
            .await
            .map_err(|e| QueueClosedError(e.0))
    }

    /// Number of points that can be pushed right now without waiting.
    pub fn available(&self) -> usize {
        self.sender.capacity()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    receiver: mpsc::Receiver<MetricPoint>,
}

impl QueueReceiver {
    /// Take the point at the front of the queue, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and empty, or every sender is gone.
    pub async fn pop(&mut self) -> Option<MetricPoint> {
        self.receiver.recv().await
    }

    /// Take the point at the front of the queue if there is one.
    pub fn try_pop(&mut self) -> Option<MetricPoint> {
        self.receiver.try_recv().ok()
    }

    /// Refuse new points. Points already queued can still be taken.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn point(timestamp: u64) -> MetricPoint {
        MetricPoint::new("test", timestamp)
    }

    #[tokio::test]
    async fn keeps_push_order() {
        let (sender, mut receiver) = dispatch_queue(10);
        for ts in 1..=5 {
            sender.push(point(ts)).await.unwrap();
        }

        let mut seen = Vec::new();
        while let Some(p) = receiver.try_pop() {
            seen.push(p.timestamp());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn push_waits_while_full() {
        let (sender, mut receiver) = dispatch_queue(2);
        sender.push(point(1)).await.unwrap();
        sender.push(point(2)).await.unwrap();
        assert_eq!(sender.available(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), sender.push(point(3))).await;
        assert!(blocked.is_err(), "push should wait for space");

        let pusher = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.push(point(3)).await })
        };
        assert_eq!(receiver.pop().await.unwrap().timestamp(), 1);
        tokio::time::timeout(Duration::from_secs(1), pusher)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(receiver.pop().await.unwrap().timestamp(), 2);
        assert_eq!(receiver.pop().await.unwrap().timestamp(), 3);
    }

    #[tokio::test]
    async fn close_rejects_new_points_but_keeps_queued_ones() {
        let (sender, mut receiver) = dispatch_queue(4);
        sender.push(point(1)).await.unwrap();
        receiver.close();

        let err = sender.push(point(2)).await.unwrap_err();
        assert_eq!(err.0.timestamp(), 2);

        assert_eq!(receiver.try_pop().unwrap().timestamp(), 1);
        assert!(receiver.pop().await.is_none());
    }

    #[tokio::test]
    async fn pop_ends_when_senders_are_gone() {
        let (sender, mut receiver) = dispatch_queue(4);
        sender.push(point(1)).await.unwrap();
        drop(sender);

        assert_eq!(receiver.pop().await.unwrap().timestamp(), 1);
        assert!(receiver.pop().await.is_none());
    }
}
