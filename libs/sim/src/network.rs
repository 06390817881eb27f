//! Bidirectional latency and packet-loss injection between a client and the
//! server. Holds a non-owning [`Server`] handle -- the network never starts
//! or stops the server, it only forwards to it.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use sim_metrics::Metrics;
use sim_script::{Request, Response};
use tokio_util::sync::CancellationToken;

use crate::behavior::{NetworkBehavior, NetworkCurves};
use crate::errors::SimError;
use crate::sampling::{chance, sample_range_ms_floor};
use crate::server::Server;

/// Forward/return one-way latency is never sampled below this floor.
const MIN_LATENCY_MS: f64 = 1.0;

struct BehaviorState {
    behavior: NetworkBehavior,
    curves: NetworkCurves,
}

struct Inner {
    state: RwLock<BehaviorState>,
    behavior_start: RwLock<Option<Instant>>,
    metrics: Arc<Metrics>,
    server: Server,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct Network {
    inner: Arc<Inner>,
}

impl Network {
    pub fn new(behavior: NetworkBehavior, metrics: Arc<Metrics>, server: Server, cancel: CancellationToken) -> Self {
        let curves = behavior.build_curves();
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(BehaviorState { behavior, curves }),
                behavior_start: RwLock::new(None),
                metrics,
                server,
                cancel,
            }),
        }
    }

    pub fn behavior(&self) -> NetworkBehavior {
        self.inner.state.read().unwrap().behavior.clone()
    }

    /// Replaces the behavior; `behaviorStart` resets on the next `send`.
    pub fn set_behavior(&self, behavior: NetworkBehavior) {
        let curves = behavior.build_curves();
        *self.inner.state.write().unwrap() = BehaviorState { behavior, curves };
        *self.inner.behavior_start.write().unwrap() = None;
    }

    fn elapsed_ms(&self) -> f64 {
        let start = {
            let existing = *self.inner.behavior_start.read().unwrap();
            match existing {
                Some(t) => t,
                None => *self.inner.behavior_start.write().unwrap().get_or_insert_with(Instant::now),
            }
        };
        start.elapsed().as_secs_f64() * 1000.0
    }

    pub async fn send(&self, req: Request) -> Result<Response, SimError> {
        let request_id = req.id.clone();
        let elapsed = self.elapsed_ms();
        let curves = { self.inner.state.read().unwrap().curves.clone() };

        let forward_ms = sample_range_ms_floor(curves.lat_min.eval(elapsed), curves.lat_max.eval(elapsed), MIN_LATENCY_MS);
        self.sleep_or_cancel(forward_ms).await?;
        self.inner.metrics.record_request_latency(std::time::Duration::from_secs_f64(forward_ms / 1000.0));

        if chance(curves.drop_rate.eval(elapsed)) {
            return Err(SimError::NetworkPacketLost { request_id });
        }

        let resp = self.inner.server.handle_request(req).await?;

        let return_ms = sample_range_ms_floor(curves.lat_min.eval(elapsed), curves.lat_max.eval(elapsed), MIN_LATENCY_MS);
        self.sleep_or_cancel(return_ms).await?;
        self.inner.metrics.record_response_latency(std::time::Duration::from_secs_f64(return_ms / 1000.0));

        if chance(curves.drop_rate.eval(elapsed)) {
            return Err(SimError::NetworkPacketLost { request_id });
        }

        Ok(resp)
    }

    async fn sleep_or_cancel(&self, ms: f64) -> Result<(), SimError> {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(ms.round().max(0.0) as u64)) => Ok(()),
            _ = self.inner.cancel.cancelled() => Err(SimError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::ServerBehavior;
    use crate::sampling::now_ms;
    use sim_curve::BehaviorPoint;

    fn instant_server() -> Server {
        let mut behavior = ServerBehavior::default();
        behavior.rt_min = vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)];
        behavior.rt_max = vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)];
        behavior.errors = vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)];
        Server::new(behavior, Arc::new(Metrics::new()))
    }

    fn flat_network(drop_rate: f64) -> NetworkBehavior {
        NetworkBehavior {
            to: 60.0,
            lat_from: 1.0,
            lat_to: 1.0,
            drop_rate: vec![BehaviorPoint::curve(0.0, drop_rate), BehaviorPoint::curve(1.0, drop_rate)],
            lat_min: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            lat_max: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
        }
    }

    #[tokio::test]
    async fn no_drop_delivers_the_response() {
        let server = instant_server();
        server.start().await;
        let metrics = Arc::new(Metrics::new());
        let net = Network::new(flat_network(0.0), metrics, server.clone(), CancellationToken::new());
        let resp = net.send(Request::new("r1", "c1", now_ms())).await.unwrap();
        assert!(resp.ok);
        server.stop().await;
    }

    #[tokio::test]
    async fn full_drop_rate_always_loses_the_packet() {
        let server = instant_server();
        server.start().await;
        let metrics = Arc::new(Metrics::new());
        let net = Network::new(flat_network(1.0), metrics, server.clone(), CancellationToken::new());
        let result = net.send(Request::new("r1", "c1", now_ms())).await;
        assert!(matches!(result, Err(SimError::NetworkPacketLost { .. })));
        server.stop().await;
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_send() {
        let server = instant_server();
        server.start().await;
        let metrics = Arc::new(Metrics::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let net = Network::new(flat_network(0.0), metrics, server.clone(), cancel);
        let result = net.send(Request::new("r1", "c1", now_ms())).await;
        assert!(matches!(result, Err(SimError::Cancelled)));
        server.stop().await;
    }
}
