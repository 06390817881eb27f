//! Generic multi-subscriber fan-out with per-subscriber drop-on-overflow.
//!
//! Publish never blocks: a full subscriber buffer just drops that message for
//! that one subscriber (and logs it), matching the "staleness is preferable
//! to blocking producers" backpressure policy for the metrics/notification
//! broadcast streams.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<T>,
}

pub struct EventHub<T: Clone + Send + 'static> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl<T: Clone + Send + 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventHub<T> {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: std::sync::atomic::AtomicU64::new(0) }
    }

    /// Returns a subscriber id (for `unsubscribe`) and the receiving half.
    pub fn subscribe(&self, buf_size: usize) -> (u64, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(buf_size.max(1));
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.subscribers.lock().unwrap().push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Non-blocking publish. A subscriber whose buffer is full is skipped,
    /// not removed -- it may catch up on the next publish.
    pub fn publish(&self, event: T) {
        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(event.clone()) {
                tracing::debug!(subscriber_id = sub.id, "event hub dropped message for slow subscriber");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

/// Caps how often `publish` actually forwards, used for the 100ms-throttled
/// metrics broadcast. Calls faster than `min_interval` are dropped, not
/// queued.
pub struct ThrottledHub<T: Clone + Send + 'static> {
    hub: EventHub<T>,
    min_interval: std::time::Duration,
    last_publish: Mutex<Option<std::time::Instant>>,
}

impl<T: Clone + Send + 'static> ThrottledHub<T> {
    pub fn new(min_interval: std::time::Duration) -> Self {
        Self { hub: EventHub::new(), min_interval, last_publish: Mutex::new(None) }
    }

    pub fn subscribe(&self, buf_size: usize) -> (u64, mpsc::Receiver<T>) {
        self.hub.subscribe(buf_size)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.hub.unsubscribe(id);
    }

    pub fn publish(&self, event: T) {
        let mut last = self.last_publish.lock().unwrap();
        let now = std::time::Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.min_interval {
                return;
            }
        }
        *last = Some(now);
        drop(last);
        self.hub.publish(event);
    }
}

/// Ticks every 200ms calling a snapshot function and publishing the result,
/// until the given token is cancelled.
pub struct MetricsEmitter;

impl MetricsEmitter {
    pub fn spawn<T, F>(hub: std::sync::Arc<ThrottledHub<T>>, cancel: CancellationToken, snapshot: F) -> tokio::task::JoinHandle<()>
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(200));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                hub.publish(snapshot());
            }
        })
    }
}
