//! Application state: the single active [`Simulation`], the two broadcast
//! hubs, and a fast sync path to the running simulation's metrics so the
//! periodic emitter never has to touch the simulation's async mutex.

use std::sync::{Arc, RwLock};

use sim_core::{EventHub, MetricsEmitter, Simulation, ThrottledHub};
use sim_metrics::Metrics;
use tokio_util::sync::CancellationToken;

use crate::notify::NotificationEvent;

pub struct AppState {
    pub sim: tokio::sync::Mutex<Simulation>,
    current_metrics: Arc<RwLock<Arc<Metrics>>>,
    pub notify_hub: Arc<EventHub<NotificationEvent>>,
    pub metrics_hub: Arc<ThrottledHub<serde_json::Value>>,
    _emitter_cancel: CancellationToken,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        let sim = Simulation::new(uuid::Uuid::new_v4().to_string());
        let current_metrics = Arc::new(RwLock::new(sim.metrics()));
        let notify_hub = Arc::new(EventHub::new());
        let metrics_hub = Arc::new(ThrottledHub::new(std::time::Duration::from_millis(100)));
        let emitter_cancel = CancellationToken::new();

        let metrics_for_emitter = Arc::clone(&current_metrics);
        MetricsEmitter::spawn(Arc::clone(&metrics_hub), emitter_cancel.clone(), move || {
            let metrics = metrics_for_emitter.read().unwrap().clone();
            serde_json::to_value(metrics.snapshot()).unwrap_or(serde_json::Value::Null)
        });

        Arc::new(Self {
            sim: tokio::sync::Mutex::new(sim),
            current_metrics,
            notify_hub,
            metrics_hub,
            _emitter_cancel: emitter_cancel,
        })
    }

    /// Called whenever the active simulation is replaced by `Reset`, so the
    /// metrics emitter (which never locks `sim`) keeps snapshotting the right
    /// registry.
    pub fn retarget_metrics(&self, metrics: Arc<Metrics>) {
        *self.current_metrics.write().unwrap() = metrics;
    }
}
