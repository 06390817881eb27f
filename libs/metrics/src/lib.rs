//! Thread-safe counters, sliding-window latency statistics, and resource-state
//! snapshots for a running simulation.
//!
//! All monotone counters are plain atomics; the per-group active-client map,
//! the three sliding-event windows, and the latest resource state each sit
//! behind their own reader/writer lock so a `snapshot()` call never contends
//! with more of the hot path than it has to.

use std::{
    collections::{HashMap, VecDeque},
    sync::RwLock,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::Serialize;

/// Sliding windows retain events from at most this far in the past.
const WINDOW: Duration = Duration::from_secs(1);
/// Hard cap on a window's length so an idle registry doesn't grow unbounded
/// under a runaway producer.
const WINDOW_CAP: usize = 100_000;
/// Bound on the server's queue-time window (§4.4), much shorter since it is
/// only ever as large as the worker pool's concurrency.
const QUEUE_TIME_WINDOW_CAP: usize = 100;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p80: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceState {
    pub active_requests: u64,
    pub current_memory_mb: f64,
    pub cpu_util: f64,
    pub mem_util: f64,
    pub threads_util: f64,
    pub queue_util: f64,
    pub avg_queue_time_ms: f64,
    pub max_queue_time_ms: f64,
}

impl Default for ResourceState {
    fn default() -> Self {
        Self {
            active_requests: 0,
            current_memory_mb: 0.0,
            cpu_util: 0.0,
            mem_util: 0.0,
            threads_util: 0.0,
            queue_util: 0.0,
            avg_queue_time_ms: 0.0,
            max_queue_time_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub client_sent_req: u64,
    pub client_success_resp: u64,
    pub client_error_resp: u64,
    pub client_blocked_req: u64,
    pub client_retried_req: u64,
    pub client_network_failed_req: u64,
    pub server_received_req: u64,
    pub server_success_resp: u64,
    pub server_error_resp: u64,
    pub response_time_ms: WindowStats,
    pub request_latency_ms: WindowStats,
    pub response_latency_ms: WindowStats,
    pub active_clients: HashMap<String, u64>,
    pub resource: ResourceState,
}

struct EventWindow {
    events: VecDeque<(Instant, Duration)>,
    cap: usize,
}

impl EventWindow {
    fn new(cap: usize) -> Self {
        Self { events: VecDeque::new(), cap }
    }

    fn push(&mut self, d: Duration) {
        if self.events.len() >= self.cap {
            self.events.pop_front();
        }
        self.events.push_back((Instant::now(), d));
    }

    /// Prunes events older than `WINDOW` and recomputes stats in one pass,
    /// all under the single write-lock the caller already holds.
    fn recompute(&mut self, now: Instant) -> WindowStats {
        while let Some((ts, _)) = self.events.front() {
            if now.saturating_duration_since(*ts) > WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }

        if self.events.is_empty() {
            return WindowStats::default();
        }

        let mut values: Vec<f64> = self.events.iter().map(|(_, d)| d.as_secs_f64() * 1000.0).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let n = values.len();
        let percentile = |p: f64| values[((n as f64 * p).floor() as usize).min(n - 1)];

        WindowStats {
            min: values[0],
            max: values[n - 1],
            avg: values.iter().sum::<f64>() / n as f64,
            p50: percentile(0.50),
            p80: percentile(0.80),
            p95: percentile(0.95),
        }
    }
}

pub struct Metrics {
    sent: AtomicU64,
    success: AtomicU64,
    error: AtomicU64,
    blocked: AtomicU64,
    retried: AtomicU64,
    network_failed: AtomicU64,
    server_received: AtomicU64,
    server_success: AtomicU64,
    server_error: AtomicU64,

    active_clients: RwLock<HashMap<String, u64>>,
    response_times: RwLock<EventWindow>,
    request_latencies: RwLock<EventWindow>,
    response_latencies: RwLock<EventWindow>,
    queue_times: RwLock<EventWindow>,
    resource: RwLock<ResourceState>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            success: AtomicU64::new(0),
            error: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            network_failed: AtomicU64::new(0),
            server_received: AtomicU64::new(0),
            server_success: AtomicU64::new(0),
            server_error: AtomicU64::new(0),
            active_clients: RwLock::new(HashMap::new()),
            response_times: RwLock::new(EventWindow::new(WINDOW_CAP)),
            request_latencies: RwLock::new(EventWindow::new(WINDOW_CAP)),
            response_latencies: RwLock::new(EventWindow::new(WINDOW_CAP)),
            queue_times: RwLock::new(EventWindow::new(QUEUE_TIME_WINDOW_CAP)),
            resource: RwLock::new(ResourceState::default()),
        }
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_network_failed(&self) {
        self.network_failed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_server_received(&self) {
        self.server_received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_server_success(&self) {
        self.server_success.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_server_error(&self) {
        self.server_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, d: Duration) {
        self.response_times.write().unwrap().push(d);
    }
    pub fn record_request_latency(&self, d: Duration) {
        self.request_latencies.write().unwrap().push(d);
    }
    pub fn record_response_latency(&self, d: Duration) {
        self.response_latencies.write().unwrap().push(d);
    }
    pub fn record_queue_time(&self, d: Duration) {
        self.queue_times.write().unwrap().push(d);
    }

    pub fn set_group_active(&self, group_id: &str, count: u64) {
        self.active_clients.write().unwrap().insert(group_id.to_string(), count);
    }

    pub fn incr_group_active(&self, group_id: &str) {
        *self.active_clients.write().unwrap().entry(group_id.to_string()).or_insert(0) += 1;
    }

    pub fn decr_group_active(&self, group_id: &str) {
        if let Some(count) = self.active_clients.write().unwrap().get_mut(group_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn push_resource_state(&self, state: ResourceState) {
        *self.resource.write().unwrap() = state;
    }

    /// The average/max of the queue-time window, per §4.4's "mean and max
    /// recomputed" requirement on every worker dequeue.
    pub fn queue_time_stats(&self) -> (f64, f64) {
        let stats = self.queue_times.write().unwrap().recompute(Instant::now());
        (stats.avg, stats.max)
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        Snapshot {
            client_sent_req: self.sent.load(Ordering::Relaxed),
            client_success_resp: self.success.load(Ordering::Relaxed),
            client_error_resp: self.error.load(Ordering::Relaxed),
            client_blocked_req: self.blocked.load(Ordering::Relaxed),
            client_retried_req: self.retried.load(Ordering::Relaxed),
            client_network_failed_req: self.network_failed.load(Ordering::Relaxed),
            server_received_req: self.server_received.load(Ordering::Relaxed),
            server_success_resp: self.server_success.load(Ordering::Relaxed),
            server_error_resp: self.server_error.load(Ordering::Relaxed),
            response_time_ms: self.response_times.write().unwrap().recompute(now),
            request_latency_ms: self.request_latencies.write().unwrap().recompute(now),
            response_latency_ms: self.response_latencies.write().unwrap().recompute(now),
            active_clients: self.active_clients.read().unwrap().clone(),
            resource: *self.resource.read().unwrap(),
        }
    }

    /// Resets every counter and window. Used when a simulation is torn down
    /// and a fresh one created in its place; never called mid-run.
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.success.store(0, Ordering::Relaxed);
        self.error.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
        self.retried.store(0, Ordering::Relaxed);
        self.network_failed.store(0, Ordering::Relaxed);
        self.server_received.store(0, Ordering::Relaxed);
        self.server_success.store(0, Ordering::Relaxed);
        self.server_error.store(0, Ordering::Relaxed);
        self.active_clients.write().unwrap().clear();
        *self.response_times.write().unwrap() = EventWindow::new(WINDOW_CAP);
        *self.request_latencies.write().unwrap() = EventWindow::new(WINDOW_CAP);
        *self.response_latencies.write().unwrap() = EventWindow::new(WINDOW_CAP);
        *self.queue_times.write().unwrap() = EventWindow::new(QUEUE_TIME_WINDOW_CAP);
        *self.resource.write().unwrap() = ResourceState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_requests_balance_sent_and_success() {
        let m = Metrics::new();
        for _ in 0..50 {
            m.record_sent();
            m.record_success();
        }
        let snap = m.snapshot();
        assert_eq!(snap.client_sent_req, 50);
        assert_eq!(snap.client_success_resp, 50);
        assert_eq!(snap.client_retried_req, 0);
    }

    #[test]
    fn idle_window_prunes_to_empty_after_one_second() {
        let m = Metrics::new();
        m.record_response_time(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(1100));
        let snap = m.snapshot();
        assert_eq!(snap.response_time_ms.min, 0.0);
        assert_eq!(snap.response_time_ms.max, 0.0);
    }

    #[test]
    fn percentiles_are_ordered() {
        let m = Metrics::new();
        for ms in [1, 5, 10, 20, 50, 100, 500, 1000] {
            m.record_response_time(Duration::from_millis(ms));
        }
        let snap = m.snapshot();
        let w = snap.response_time_ms;
        assert!(w.min <= w.p50);
        assert!(w.p50 <= w.p80);
        assert!(w.p80 <= w.p95);
        assert!(w.p95 <= w.max);
    }

    #[test]
    fn group_active_counts_are_independent() {
        let m = Metrics::new();
        m.incr_group_active("a");
        m.incr_group_active("a");
        m.incr_group_active("b");
        let snap = m.snapshot();
        assert_eq!(snap.active_clients.get("a"), Some(&2));
        assert_eq!(snap.active_clients.get("b"), Some(&1));
        m.decr_group_active("a");
        assert_eq!(m.snapshot().active_clients.get("a"), Some(&1));
    }

    #[test]
    fn reset_clears_everything() {
        let m = Metrics::new();
        m.record_sent();
        m.record_response_time(Duration::from_millis(5));
        m.incr_group_active("a");
        m.reset();
        let snap = m.snapshot();
        assert_eq!(snap.client_sent_req, 0);
        assert_eq!(snap.response_time_ms.max, 0.0);
        assert!(snap.active_clients.is_empty());
    }
}
