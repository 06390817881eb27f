//! Request processing with two modes: direct (evaluate-then-respond) and
//! managed (bounded queue, worker pool, simulated CPU/memory/queue dynamics).
//!
//! Mirrors the teacher's channel-owned-storage `Queue` for the managed-mode
//! request queue, generalized from a single-consumer task to a worker pool
//! draining one shared `Arc<tokio::sync::Mutex<mpsc::Receiver<_>>>> -- the
//! multi-consumer idiom a bounded mpsc channel doesn't give you for free.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use sim_metrics::{Metrics, ResourceState as MetricsResourceState};
use sim_script::{Request, Response};
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::behavior::{ServerBehavior, ServerCurves};
use crate::errors::SimError;
use crate::sampling::{chance, now_ms, sample_range_ms};

/// Memory a server holds even with zero active requests.
const BASELINE_MEMORY_MB: f64 = 50.0;
const RESOURCE_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerLifecycle {
    Created,
    Running,
    Stopping,
    Stopped,
}

struct BehaviorState {
    behavior: ServerBehavior,
    curves: ServerCurves,
}

/// Mutable resource dynamics, distinct from [`sim_metrics::ResourceState`]
/// (the immutable snapshot pushed out for metrics consumers). Only the
/// resource-manager tick and the worker that is actively processing touch
/// this; everyone else reads it.
struct LiveResource {
    active_requests: u64,
    current_memory_mb: f64,
    cpu_util: f64,
    mem_util: f64,
    threads_util: f64,
    queue_util: f64,
    avg_queue_time_ms: f64,
    max_queue_time_ms: f64,
    last_gc: Instant,
    gc_pause_duration_ms: f64,
}

impl LiveResource {
    fn new() -> Self {
        Self {
            active_requests: 0,
            current_memory_mb: BASELINE_MEMORY_MB,
            cpu_util: 0.0,
            mem_util: 0.0,
            threads_util: 0.0,
            queue_util: 0.0,
            avg_queue_time_ms: 0.0,
            max_queue_time_ms: 0.0,
            last_gc: Instant::now(),
            gc_pause_duration_ms: 0.0,
        }
    }

    fn snapshot(&self) -> MetricsResourceState {
        MetricsResourceState {
            active_requests: self.active_requests,
            current_memory_mb: self.current_memory_mb,
            cpu_util: self.cpu_util,
            mem_util: self.mem_util,
            threads_util: self.threads_util,
            queue_util: self.queue_util,
            avg_queue_time_ms: self.avg_queue_time_ms,
            max_queue_time_ms: self.max_queue_time_ms,
        }
    }
}

struct QueueItem {
    req: Request,
    enqueued_at: Instant,
    reply: oneshot::Sender<Result<Response, SimError>>,
}

struct QueueHandle {
    tx: mpsc::Sender<QueueItem>,
    cap: usize,
    workers: Vec<JoinHandle<()>>,
    resource_manager: JoinHandle<()>,
}

struct Inner {
    state: RwLock<BehaviorState>,
    behavior_start: RwLock<Option<Instant>>,
    metrics: Arc<Metrics>,
    lifecycle: RwLock<ServerLifecycle>,
    cancel: CancellationToken,
    managed_mode: AtomicBool,
    resource: RwLock<LiveResource>,
    queue_len: AtomicUsize,
    queue: AsyncMutex<Option<QueueHandle>>,
}

/// A logical server instance. Cheap to clone: every clone shares the same
/// underlying state via `Arc`. A simulation creates a fresh `Server` on each
/// `Start` and lets the old one drop on `Stop`, so resource state never
/// survives a restart while the `ServerBehavior` it was built from can.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new(behavior: ServerBehavior, metrics: Arc<Metrics>) -> Self {
        let curves = behavior.build_curves();
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(BehaviorState { behavior, curves }),
                behavior_start: RwLock::new(None),
                metrics,
                lifecycle: RwLock::new(ServerLifecycle::Created),
                cancel: CancellationToken::new(),
                managed_mode: AtomicBool::new(false),
                resource: RwLock::new(LiveResource::new()),
                queue_len: AtomicUsize::new(0),
                queue: AsyncMutex::new(None),
            }),
        }
    }

    pub fn lifecycle(&self) -> ServerLifecycle {
        *self.inner.lifecycle.read().unwrap()
    }

    pub fn behavior(&self) -> ServerBehavior {
        self.inner.state.read().unwrap().behavior.clone()
    }

    /// Replaces the behavior and resets `behaviorStart` so curves replay
    /// from `t=0` on the next request.
    pub fn set_behavior(&self, behavior: ServerBehavior) {
        let curves = behavior.build_curves();
        *self.inner.state.write().unwrap() = BehaviorState { behavior, curves };
        *self.inner.behavior_start.write().unwrap() = None;
    }

    pub fn resource_snapshot(&self) -> MetricsResourceState {
        self.inner.resource.read().unwrap().snapshot()
    }

    pub async fn start(&self) {
        *self.inner.lifecycle.write().unwrap() = ServerLifecycle::Running;

        let (managed, settings) = {
            let guard = self.inner.state.read().unwrap();
            (guard.behavior.resource_management_enabled, guard.behavior.resource_settings.clone())
        };
        self.inner.managed_mode.store(managed, Ordering::Relaxed);
        if !managed {
            return;
        }

        let cap = settings.max_queue_size.max(1);
        let (tx, rx) = mpsc::channel(cap);
        let rx = Arc::new(AsyncMutex::new(rx));

        let n_workers = settings.max_concurrent_requests.max(1);
        let mut workers = Vec::with_capacity(n_workers);
        for _ in 0..n_workers {
            let inner = Arc::clone(&self.inner);
            let rx = Arc::clone(&rx);
            workers.push(tokio::spawn(run_worker(inner, rx)));
        }
        let resource_manager = tokio::spawn(run_resource_manager(Arc::clone(&self.inner), cap));

        *self.inner.queue.lock().await = Some(QueueHandle { tx, cap, workers, resource_manager });
    }

    pub async fn stop(&self) {
        *self.inner.lifecycle.write().unwrap() = ServerLifecycle::Stopping;
        self.inner.cancel.cancel();
        if let Some(queue) = self.inner.queue.lock().await.take() {
            for worker in queue.workers {
                let _ = worker.await;
            }
            let _ = queue.resource_manager.await;
        }
        *self.inner.lifecycle.write().unwrap() = ServerLifecycle::Stopped;
    }

    pub async fn handle_request(&self, req: Request) -> Result<Response, SimError> {
        self.inner.metrics.record_server_received();
        if self.inner.managed_mode.load(Ordering::Relaxed) {
            process_managed(&self.inner, req).await
        } else {
            process_direct(&self.inner, req).await
        }
    }
}

/// Reads `behaviorStart`, lazily setting it to `now` on first access after a
/// behavior swap (or the server's first request ever).
fn elapsed_ms(inner: &Inner) -> f64 {
    let start = {
        let existing = *inner.behavior_start.read().unwrap();
        match existing {
            Some(t) => t,
            None => *inner.behavior_start.write().unwrap().get_or_insert_with(Instant::now),
        }
    };
    start.elapsed().as_secs_f64() * 1000.0
}

async fn process_direct(inner: &Inner, req: Request) -> Result<Response, SimError> {
    let elapsed = elapsed_ms(inner);
    let curves = { inner.state.read().unwrap().curves.clone() };
    let work_ms = sample_range_ms(curves.rt_min.eval(elapsed), curves.rt_max.eval(elapsed));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(work_ms.round().max(0.0) as u64)) => {}
        _ = inner.cancel.cancelled() => return Err(SimError::Cancelled),
    }

    let error_rate = curves.error_rate.eval(elapsed);
    if chance(error_rate) {
        inner.metrics.record_server_error();
        tracing::debug!(request_id = %req.id, "server synthesized error");
        Ok(Response::failure(&req.id, "Server Error", now_ms()))
    } else {
        inner.metrics.record_server_success();
        Ok(Response::success(&req.id, now_ms()))
    }
}

async fn process_managed(inner: &Inner, req: Request) -> Result<Response, SimError> {
    let mem_util = inner.resource.read().unwrap().mem_util;
    if mem_util > 0.98 {
        return Err(SimError::ServerOutOfMemory { mem_util });
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let item = QueueItem { req, enqueued_at: Instant::now(), reply: reply_tx };

    {
        let guard = inner.queue.lock().await;
        let Some(queue) = guard.as_ref() else { return Err(SimError::Cancelled) };
        match queue.tx.try_send(item) {
            Ok(()) => {
                inner.queue_len.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                return Err(SimError::ServerQueueFull { depth: queue.cap, cap: queue.cap });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(SimError::Cancelled),
        }
    }

    tokio::select! {
        res = reply_rx => res.unwrap_or(Err(SimError::Cancelled)),
        _ = inner.cancel.cancelled() => Err(SimError::Cancelled),
    }
}

async fn run_worker(inner: Arc<Inner>, queue_rx: Arc<AsyncMutex<mpsc::Receiver<QueueItem>>>) {
    loop {
        let item = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                biased;
                _ = inner.cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else { break };
        inner.queue_len.fetch_sub(1, Ordering::Relaxed);

        let wait = item.enqueued_at.elapsed();
        inner.metrics.record_queue_time(wait);
        let (avg, max) = inner.metrics.queue_time_stats();
        {
            let mut r = inner.resource.write().unwrap();
            r.avg_queue_time_ms = avg;
            r.max_queue_time_ms = max;
            r.active_requests += 1;
        }

        let resp = process_managed_work(&inner, &item.req).await;

        {
            let mut r = inner.resource.write().unwrap();
            r.active_requests = r.active_requests.saturating_sub(1);
        }

        let _ = item.reply.send(resp);
    }
    drain_queue(&queue_rx, &inner.queue_len).await;
}

async fn drain_queue(queue_rx: &Arc<AsyncMutex<mpsc::Receiver<QueueItem>>>, queue_len: &AtomicUsize) {
    let mut rx = queue_rx.lock().await;
    while let Ok(item) = rx.try_recv() {
        queue_len.fetch_sub(1, Ordering::Relaxed);
        let _ = item.reply.send(Err(SimError::Cancelled));
    }
}

async fn process_managed_work(inner: &Inner, req: &Request) -> Result<Response, SimError> {
    let elapsed = elapsed_ms(inner);
    let curves = { inner.state.read().unwrap().curves.clone() };
    let (multiplier, additional_error) = {
        let r = inner.resource.read().unwrap();
        response_time_multiplier(&r)
    };

    let mut work_ms = sample_range_ms(curves.rt_min.eval(elapsed), curves.rt_max.eval(elapsed)) * multiplier;
    let gc_active = {
        let r = inner.resource.read().unwrap();
        r.gc_pause_duration_ms > 0.0 && r.last_gc.elapsed() < Duration::from_millis(r.gc_pause_duration_ms as u64)
    };
    if gc_active {
        work_ms += inner.resource.read().unwrap().gc_pause_duration_ms;
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(work_ms.round().max(0.0) as u64)) => {}
        _ = inner.cancel.cancelled() => return Err(SimError::Cancelled),
    }

    let error_rate = (curves.error_rate.eval(elapsed) + additional_error).min(1.0);
    if chance(error_rate) {
        inner.metrics.record_server_error();
        tracing::debug!(request_id = %req.id, "server synthesized error under load");
        Ok(Response::failure(&req.id, "Server Error", now_ms()))
    } else {
        inner.metrics.record_server_success();
        Ok(Response::success(&req.id, now_ms()))
    }
}

/// `(multiplier, additionalErrorRate)` derived from current resource
/// pressure, applied on top of the curve-sampled response time / error rate.
fn response_time_multiplier(r: &LiveResource) -> (f64, f64) {
    let mut m = 1.0;
    if r.cpu_util > 0.7 {
        m *= 1.0 + r.cpu_util.powi(3) * 2.0;
    }
    if r.mem_util > 0.8 {
        m *= 1.0 + ((r.mem_util - 0.8) / 0.2) * 3.0;
    }
    if r.threads_util > 0.7 {
        m *= 1.0 + r.threads_util.powi(2);
    }
    let additional = (r.cpu_util - 0.9).max(0.0) * 0.5 + (r.mem_util - 0.9).max(0.0) * 0.3;
    (m, additional)
}

async fn run_resource_manager(inner: Arc<Inner>, queue_cap: usize) {
    let mut ticker = tokio::time::interval(RESOURCE_TICK);
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let settings = inner.state.read().unwrap().behavior.resource_settings.clone();
        let mut r = inner.resource.write().unwrap();

        r.threads_util = r.active_requests as f64 / settings.max_concurrent_requests.max(1) as f64;
        let load_factor = r.threads_util;

        let cpu_target = (load_factor.powf(1.5) * 0.95).min(1.0);
        r.cpu_util += 0.3 * (cpu_target - r.cpu_util);

        let target_memory = BASELINE_MEMORY_MB + r.active_requests as f64 * settings.memory_per_request_mb;
        if r.current_memory_mb < target_memory {
            r.current_memory_mb += (target_memory - r.current_memory_mb) / 2.0;
        } else if load_factor <= 0.1 {
            r.current_memory_mb -= r.current_memory_mb / 20.0;
        }
        if load_factor > 0.1 {
            r.current_memory_mb += settings.memory_leak_rate_mb_per_sec * 0.1 * load_factor;
        }

        r.gc_pause_duration_ms = settings.gc_pause_duration_ms;
        if settings.gc_pause_interval_sec > 0.0 && r.last_gc.elapsed().as_secs_f64() >= settings.gc_pause_interval_sec {
            r.current_memory_mb = 1.1 * target_memory;
            r.last_gc = Instant::now();
        }

        r.current_memory_mb = r.current_memory_mb.clamp(0.0, settings.max_memory_mb.max(1.0));
        r.mem_util = r.current_memory_mb / settings.max_memory_mb.max(1.0);
        r.queue_util = inner.queue_len.load(Ordering::Relaxed) as f64 / queue_cap.max(1) as f64;

        inner.metrics.push_resource_state(r.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::ResourceSettings;
    use sim_curve::BehaviorPoint;
    use std::time::Duration as StdDuration;

    fn flat_behavior(managed: bool) -> ServerBehavior {
        ServerBehavior {
            to: 60.0,
            rt_from: 0.0,
            rt_to: 5.0,
            errors: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            rt_min: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            rt_max: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            resource_management_enabled: managed,
            resource_settings: ResourceSettings::default(),
        }
    }

    #[tokio::test]
    async fn direct_mode_round_trips_a_request() {
        let metrics = Arc::new(Metrics::new());
        let server = Server::new(flat_behavior(false), metrics);
        server.start().await;
        let resp = server.handle_request(Request::new("r-c1", "c1", now_ms())).await.unwrap();
        assert!(resp.ok);
        server.stop().await;
    }

    #[tokio::test]
    async fn managed_mode_third_concurrent_request_hits_queue_full() {
        let metrics = Arc::new(Metrics::new());
        let mut behavior = flat_behavior(true);
        behavior.rt_min = vec![BehaviorPoint::curve(0.0, 1000.0), BehaviorPoint::curve(1.0, 1000.0)];
        behavior.rt_max = vec![BehaviorPoint::curve(0.0, 1000.0), BehaviorPoint::curve(1.0, 1000.0)];
        behavior.resource_settings.max_concurrent_requests = 1;
        behavior.resource_settings.max_queue_size = 1;
        let server = Server::new(behavior, metrics);
        server.start().await;

        let s1 = server.clone();
        let s2 = server.clone();
        tokio::spawn(async move { s1.handle_request(Request::new("r-c1", "c1", now_ms())).await });
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        tokio::spawn(async move { s2.handle_request(Request::new("r-c2", "c2", now_ms())).await });
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        let third = server.handle_request(Request::new("r-c3", "c3", now_ms())).await;
        assert!(matches!(third, Err(SimError::ServerQueueFull { .. })));
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_drains_outstanding_queue_entries_with_cancelled() {
        let metrics = Arc::new(Metrics::new());
        let mut behavior = flat_behavior(true);
        behavior.rt_min = vec![BehaviorPoint::curve(0.0, 200.0), BehaviorPoint::curve(1.0, 200.0)];
        behavior.rt_max = vec![BehaviorPoint::curve(0.0, 200.0), BehaviorPoint::curve(1.0, 200.0)];
        behavior.resource_settings.max_concurrent_requests = 1;
        behavior.resource_settings.max_queue_size = 4;
        let server = Server::new(behavior, metrics);
        server.start().await;

        let s1 = server.clone();
        let handle = tokio::spawn(async move { s1.handle_request(Request::new("r-c1", "c1", now_ms())).await });
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let s2 = server.clone();
        let queued = tokio::spawn(async move { s2.handle_request(Request::new("r-c2", "c2", now_ms())).await });
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        server.stop().await;
        let _ = handle.await;
        let result = queued.await.unwrap();
        assert!(matches!(result, Err(SimError::Cancelled)));
    }
}
