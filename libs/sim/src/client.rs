//! Periodic request issuance with jitter, and the per-request retry loop
//! driven by a client's [`BehaviorInterpreter`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sim_metrics::Metrics;
use sim_script::{BehaviorInterpreter, Request, Response};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::SimError;
use crate::network::Network;
use crate::sampling::{jitter, now_ms};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfigGroup {
    pub id: String,
    pub count: usize,
    pub request_rate_ms: u64,
    pub ramp_up_ms: u64,
    pub delay_ms: u64,
    pub behavior_script: Option<String>,
}

impl ClientConfigGroup {
    pub fn new(id: impl Into<String>, count: usize, request_rate_ms: u64) -> Self {
        Self {
            id: id.into(),
            count,
            request_rate_ms,
            ramp_up_ms: 0,
            delay_ms: 0,
            behavior_script: None,
        }
    }
}

/// A single running client within a group. `stop` cancels its per-client
/// scope and waits for the main loop (and every outstanding request subtask
/// it tracks) to finish.
pub struct Client {
    pub id: String,
    pub group_id: String,
    cancel: CancellationToken,
    main_handle: JoinHandle<()>,
}

impl Client {
    pub fn spawn(
        id: String,
        group_id: String,
        network: Network,
        metrics: Arc<Metrics>,
        interpreter: Arc<dyn BehaviorInterpreter>,
        rate_ms: u64,
        parent_cancel: &CancellationToken,
    ) -> Self {
        let cancel = parent_cancel.child_token();
        metrics.incr_group_active(&group_id);
        let ctx = Arc::new(RequestCtx { client_id: id.clone(), network, metrics: metrics.clone(), interpreter, cancel: cancel.clone() });
        let group_for_exit = group_id.clone();
        let main_handle = tokio::spawn(async move {
            run_main_loop(ctx, rate_ms).await;
            metrics.decr_group_active(&group_for_exit);
        });
        Self { id, group_id, cancel, main_handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.main_handle.await;
    }
}

struct RequestCtx {
    client_id: String,
    network: Network,
    metrics: Arc<Metrics>,
    interpreter: Arc<dyn BehaviorInterpreter>,
    cancel: CancellationToken,
}

async fn run_main_loop(ctx: Arc<RequestCtx>, rate_ms: u64) {
    let mut inflight: JoinSet<()> = JoinSet::new();
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let sub_ctx = Arc::clone(&ctx);
        inflight.spawn(async move {
            run_request(sub_ctx).await;
        });

        let interval_ms = (rate_ms as f64 + jitter(rate_ms as f64, 0.2)).max(0.0);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(interval_ms as u64)) => {}
            _ = ctx.cancel.cancelled() => break,
        }
    }

    ctx.interpreter.shutdown().await;
    while inflight.join_next().await.is_some() {}
}

async fn run_request(ctx: Arc<RequestCtx>) {
    let mut is_retry = false;
    loop {
        let (timeout_ms, mut req) = match evaluate_request(&ctx).await {
            EvalOutcome::Blocked => {
                ctx.metrics.record_blocked();
                return;
            }
            EvalOutcome::Cancelled => return,
            EvalOutcome::Proceed { timeout_ms, req } => (timeout_ms, req),
        };

        ctx.metrics.record_sent();
        if is_retry {
            ctx.metrics.record_retried();
        }

        let outcome = send_with_timeout(&ctx, req.clone(), timeout_ms).await;

        let retry_decision = match outcome {
            SendOutcome::Completed(Ok(resp)) if resp.ok => {
                ctx.interpreter.on_response(&mut req, &resp).await;
                ctx.metrics.record_success();
                return;
            }
            SendOutcome::Completed(Ok(resp)) => {
                ctx.interpreter.on_error(&mut req, &resp).await;
                ctx.metrics.record_error();
                ctx.interpreter.on_retry(&mut req, Some(&resp), None).await
            }
            SendOutcome::Completed(Err(SimError::Cancelled)) | SendOutcome::Cancelled => return,
            SendOutcome::Completed(Err(err)) => {
                let msg = err.to_string();
                ctx.interpreter.on_fail(&mut req, &msg).await;
                ctx.metrics.record_network_failed();
                ctx.interpreter.on_retry(&mut req, None, Some(&msg)).await
            }
            SendOutcome::TimedOut => {
                let err = SimError::ClientTimeout { request_id: req.id.clone(), timeout_ms: timeout_ms.unwrap_or(0) };
                let msg = err.to_string();
                ctx.interpreter.on_fail(&mut req, &msg).await;
                ctx.metrics.record_network_failed();
                ctx.interpreter.on_retry(&mut req, None, Some(&msg)).await
            }
        };

        if !retry_decision.allow {
            return;
        }
        if retry_decision.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(retry_decision.delay_ms)) => {}
                _ = ctx.cancel.cancelled() => return,
            }
        }
        is_retry = true;
    }
}

enum EvalOutcome {
    Blocked,
    Cancelled,
    Proceed { timeout_ms: Option<u64>, req: Request },
}

/// Step 1 of the per-request loop: `timeout` is captured fresh on every
/// entry here, including retries, never carried over from a prior attempt.
async fn evaluate_request(ctx: &RequestCtx) -> EvalOutcome {
    let mut req = Request::new(Uuid::new_v4().to_string(), ctx.client_id.clone(), now_ms());
    loop {
        let decision = ctx.interpreter.on_request(&mut req).await;
        if !decision.allow {
            return EvalOutcome::Blocked;
        }
        if decision.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(decision.delay_ms)) => {}
                _ = ctx.cancel.cancelled() => return EvalOutcome::Cancelled,
            }
            continue;
        }
        return EvalOutcome::Proceed { timeout_ms: decision.timeout_ms, req };
    }
}

enum SendOutcome {
    Completed(Result<Response, SimError>),
    TimedOut,
    Cancelled,
}

async fn send_with_timeout(ctx: &RequestCtx, req: Request, timeout_ms: Option<u64>) -> SendOutcome {
    let send_fut = ctx.network.send(req);
    match timeout_ms {
        Some(t) => {
            tokio::select! {
                res = send_fut => SendOutcome::Completed(res),
                _ = tokio::time::sleep(Duration::from_millis(t)) => SendOutcome::TimedOut,
                _ = ctx.cancel.cancelled() => SendOutcome::Cancelled,
            }
        }
        None => {
            tokio::select! {
                res = send_fut => SendOutcome::Completed(res),
                _ = ctx.cancel.cancelled() => SendOutcome::Cancelled,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{NetworkBehavior, ServerBehavior};
    use crate::server::Server;
    use sim_curve::BehaviorPoint;
    use sim_script::NoopInterpreter;

    fn instant_network(metrics: Arc<Metrics>) -> Network {
        let mut server_behavior = ServerBehavior::default();
        server_behavior.rt_min = vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)];
        server_behavior.rt_max = vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)];
        server_behavior.errors = vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)];
        let server = Server::new(server_behavior, metrics.clone());
        let net_behavior = NetworkBehavior {
            to: 60.0,
            lat_from: 1.0,
            lat_to: 1.0,
            drop_rate: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            lat_min: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            lat_max: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
        };
        Network::new(net_behavior, metrics, server, CancellationToken::new())
    }

    #[tokio::test]
    async fn noop_client_sends_and_succeeds_every_cycle() {
        let metrics = Arc::new(Metrics::new());
        let network = instant_network(metrics.clone());
        let parent = CancellationToken::new();
        let client = Client::spawn(
            "c1".into(),
            "g1".into(),
            network,
            metrics.clone(),
            Arc::new(NoopInterpreter),
            20,
            &parent,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        client.stop().await;

        let snap = metrics.snapshot();
        assert!(snap.client_sent_req >= 3, "expected several cycles, got {}", snap.client_sent_req);
        assert_eq!(snap.client_sent_req, snap.client_success_resp);
        assert_eq!(snap.client_retried_req, 0);
    }

    #[tokio::test]
    async fn stop_returns_promptly_with_requests_inflight() {
        let metrics = Arc::new(Metrics::new());
        let network = instant_network(metrics.clone());
        let parent = CancellationToken::new();
        let client = Client::spawn("c1".into(), "g1".into(), network, metrics, Arc::new(NoopInterpreter), 10, &parent);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let start = std::time::Instant::now();
        client.stop().await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
