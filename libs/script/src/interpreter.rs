//! Sandboxed behavior script executor.
//!
//! One executor task (a dedicated OS thread, since the embedded Rhai engine
//! is not `Send`) owns a single client's interpreter state. The client talks
//! to it exclusively through a bounded work-item channel and a one-shot reply
//! per request, which makes every hook evaluation logically single-threaded
//! without any script-level locking. Grounded on the teacher's
//! channel-owned-storage pattern: the state lives inside the task that reads
//! the channel, never behind a shared lock.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rhai::{AST, Dynamic, Engine, Scope};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::convert::{
    apply_meta_back, dynamic_to_hook_decision, dynamic_to_retry_decision, request_to_shared_dynamic,
    response_to_dynamic,
};
use crate::hooks::{BehaviorInterpreter, HookDecision, RetryDecision};
use crate::request::{Request, Response};

const WORK_QUEUE_CAPACITY: usize = 10_000;
/// Bounds a single hook evaluation so a runaway script (infinite loop) cannot
/// wedge the executor thread forever.
const MAX_OPERATIONS: u64 = 2_000_000;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("behavior script failed to compile: {0}")]
    Compile(String),
}

enum HookCall {
    OnRequest(Request),
    OnResponse(Request, Response),
    OnError(Request, Response),
    OnFail(Request, String),
    OnRetry(Request, Option<Response>, Option<String>),
}

enum WorkReply {
    Decision(Request, HookDecision),
    None(Request),
    Retry(Request, RetryDecision),
}

impl WorkReply {
    fn default_for(call: &HookCall) -> (Self, Request) {
        match call {
            HookCall::OnRequest(req) => {
                let req = req.clone();
                (WorkReply::Decision(req.clone(), HookDecision::default()), req)
            }
            HookCall::OnResponse(req, _) | HookCall::OnError(req, _) => {
                let req = req.clone();
                (WorkReply::None(req.clone()), req)
            }
            HookCall::OnFail(req, _) => {
                let req = req.clone();
                (WorkReply::None(req.clone()), req)
            }
            HookCall::OnRetry(req, _, _) => {
                let req = req.clone();
                (WorkReply::Retry(req.clone(), RetryDecision::default()), req)
            }
        }
    }
}

struct WorkItem {
    call: HookCall,
    reply: oneshot::Sender<WorkReply>,
}

/// Rhai-backed implementation of the five-hook contract.
pub struct ScriptInterpreter {
    tx: std::sync::RwLock<Option<mpsc::Sender<WorkItem>>>,
    handle: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ScriptInterpreter {
    /// Compiles `source` and spawns its dedicated executor thread.
    /// `identity` seeds the per-executor PRNG so rapidly-created interpreters
    /// do not share a random sequence.
    pub fn new(source: &str, identity: &str) -> Result<Self, ScriptError> {
        // Validate syntax up front so construction fails fast and visibly,
        // before any client ever enqueues work against a broken script.
        let probe = Engine::new();
        probe.compile(source).map_err(|e| ScriptError::Compile(e.to_string()))?;

        let (tx, rx) = mpsc::channel(WORK_QUEUE_CAPACITY);
        let source = source.to_string();
        let seed = seed_from_identity(identity);

        let handle = std::thread::Builder::new()
            .name(format!("behavior-executor-{identity}"))
            .spawn(move || run_executor(source, seed, rx))
            .expect("spawning behavior executor thread");

        Ok(Self { tx: std::sync::RwLock::new(Some(tx)), handle: std::sync::Mutex::new(Some(handle)) })
    }

    async fn dispatch(&self, call: HookCall) -> WorkReply {
        let sender = self.tx.read().unwrap().clone();
        let Some(sender) = sender else {
            let (reply, _) = WorkReply::default_for(&call);
            return reply;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if sender.send(WorkItem { call, reply: reply_tx }).await.is_err() {
            // Executor thread is gone; caller still needs a decision.
            return WorkReply::None(Request::new("", "", 0));
        }
        reply_rx.await.unwrap_or_else(|_| WorkReply::None(Request::new("", "", 0)))
    }
}

#[async_trait]
impl BehaviorInterpreter for ScriptInterpreter {
    async fn on_request(&self, req: &mut Request) -> HookDecision {
        match self.dispatch(HookCall::OnRequest(req.clone())).await {
            WorkReply::Decision(updated, decision) => {
                *req = updated;
                decision
            }
            _ => HookDecision::default(),
        }
    }

    async fn on_response(&self, req: &mut Request, resp: &Response) {
        if let WorkReply::None(updated) = self.dispatch(HookCall::OnResponse(req.clone(), resp.clone())).await {
            *req = updated;
        }
    }

    async fn on_error(&self, req: &mut Request, resp: &Response) {
        if let WorkReply::None(updated) = self.dispatch(HookCall::OnError(req.clone(), resp.clone())).await {
            *req = updated;
        }
    }

    async fn on_fail(&self, req: &mut Request, err: &str) {
        if let WorkReply::None(updated) = self.dispatch(HookCall::OnFail(req.clone(), err.to_string())).await {
            *req = updated;
        }
    }

    async fn on_retry(&self, req: &mut Request, resp: Option<&Response>, err: Option<&str>) -> RetryDecision {
        let call = HookCall::OnRetry(req.clone(), resp.cloned(), err.map(str::to_string));
        match self.dispatch(call).await {
            WorkReply::Retry(updated, decision) => {
                *req = updated;
                decision
            }
            _ => RetryDecision::default(),
        }
    }

    async fn shutdown(&self) {
        self.tx.write().unwrap().take();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            // The executor thread drains any already-queued work with
            // default replies before joining; this just waits for that.
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
    }
}

fn seed_from_identity(identity: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    identity.hash(&mut hasher);
    let jitter = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    hasher.finish() ^ jitter
}

fn run_executor(source: String, seed: u64, mut rx: mpsc::Receiver<WorkItem>) {
    let state = Arc::new(std::sync::Mutex::new(Dynamic::UNIT));
    let rng = Arc::new(std::sync::Mutex::new(StdRng::seed_from_u64(seed)));

    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.on_print(|s| tracing::debug!(script_output = %s, "behavior script print"));

    {
        let state = Arc::clone(&state);
        engine.register_fn("get_state", move || -> Dynamic { state.lock().unwrap().clone() });
    }
    {
        let rng = Arc::clone(&rng);
        engine.register_fn("random", move || -> f64 { rng.lock().unwrap().random::<f64>() });
    }
    engine.register_fn("now", || -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
    });
    engine.register_fn("pow", |base: f64, exp: f64| base.powf(exp));
    engine.register_fn("round", round_half_to_even);

    let ast = match engine.compile(&source) {
        Ok(ast) => ast,
        Err(e) => {
            tracing::error!(error = %e, "behavior script failed to compile on executor thread");
            return;
        }
    };
    let mut scope = Scope::new();

    if let Ok(initial) = engine.call_fn::<Dynamic>(&mut scope, &ast, "set_state", ()) {
        *state.lock().unwrap() = initial;
    }

    loop {
        let Some(item) = rx.blocking_recv() else { break };
        let reply = evaluate(&engine, &mut scope, &ast, item.call);
        let _ = item.reply.send(reply);
    }
}

fn evaluate(engine: &Engine, scope: &mut Scope, ast: &AST, call: HookCall) -> WorkReply {
    match call {
        HookCall::OnRequest(mut req) => {
            let shared = request_to_shared_dynamic(&req);
            let result = call_hook(engine, scope, ast, "on_request", (shared.clone(),));
            apply_meta_back(&shared, &mut req);
            WorkReply::Decision(req, dynamic_to_hook_decision(result))
        }
        HookCall::OnResponse(mut req, resp) => {
            let shared = request_to_shared_dynamic(&req);
            call_hook(engine, scope, ast, "on_response", (shared.clone(), response_to_dynamic(&resp)));
            apply_meta_back(&shared, &mut req);
            WorkReply::None(req)
        }
        HookCall::OnError(mut req, resp) => {
            let shared = request_to_shared_dynamic(&req);
            call_hook(engine, scope, ast, "on_error", (shared.clone(), response_to_dynamic(&resp)));
            apply_meta_back(&shared, &mut req);
            WorkReply::None(req)
        }
        HookCall::OnFail(mut req, err) => {
            let shared = request_to_shared_dynamic(&req);
            call_hook(engine, scope, ast, "on_fail", (shared.clone(), err));
            apply_meta_back(&shared, &mut req);
            WorkReply::None(req)
        }
        HookCall::OnRetry(mut req, resp, err) => {
            let shared = request_to_shared_dynamic(&req);
            let resp_dyn = resp.as_ref().map(response_to_dynamic).unwrap_or(Dynamic::UNIT);
            let err_dyn = err.map(Dynamic::from).unwrap_or(Dynamic::UNIT);
            let result = call_hook(engine, scope, ast, "on_retry", (shared.clone(), resp_dyn, err_dyn));
            apply_meta_back(&shared, &mut req);
            WorkReply::Retry(req, dynamic_to_retry_decision(result))
        }
    }
}

fn call_hook(
    engine: &Engine,
    scope: &mut Scope,
    ast: &AST,
    name: &str,
    args: impl rhai::FuncArgs,
) -> Option<Dynamic> {
    match engine.call_fn::<Dynamic>(scope, ast, name, args) {
        Ok(v) => Some(v),
        Err(e) => {
            if matches!(*e, rhai::EvalAltResult::ErrorFunctionNotFound(..)) {
                None
            } else {
                tracing::warn!(hook = name, error = %e, "behavior script hook raised; using default decision");
                None
            }
        }
    }
}

fn round_half_to_even(x: f64) -> f64 {
    let floor = x.floor();
    let diff = x - floor;
    if diff < 0.5 {
        floor
    } else if diff > 0.5 {
        floor + 1.0
    } else if (floor as i64).rem_euclid(2) == 0 {
        floor
    } else {
        floor + 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banker_rounding_matches_round_half_to_even() {
        assert_eq!(round_half_to_even(0.5), 0.0);
        assert_eq!(round_half_to_even(1.5), 2.0);
        assert_eq!(round_half_to_even(2.5), 2.0);
        assert_eq!(round_half_to_even(-0.5), 0.0);
        assert_eq!(round_half_to_even(-1.5), -2.0);
        assert_eq!(round_half_to_even(0.4), 0.0);
        assert_eq!(round_half_to_even(0.6), 1.0);
    }

    #[tokio::test]
    async fn blocking_on_request_blocks_all_requests() {
        let interp = ScriptInterpreter::new(
            "fn on_request(req) { return #{allow: false}; }",
            "test-client-1",
        )
        .unwrap();
        let mut req = Request::new("r1", "c1", 0);
        let decision = interp.on_request(&mut req).await;
        assert!(!decision.allow);
        interp.shutdown().await;
    }

    #[tokio::test]
    async fn state_persists_across_hooks_and_is_per_client() {
        let script = r#"
            fn set_state() { return #{count: 0}; }
            fn on_request(req) {
                let s = get_state();
                s.count += 1;
                req.meta.seen = s.count;
                return #{allow: true};
            }
        "#;
        let a = ScriptInterpreter::new(script, "client-a").unwrap();
        let b = ScriptInterpreter::new(script, "client-b").unwrap();

        let mut req_a1 = Request::new("r1", "a", 0);
        a.on_request(&mut req_a1).await;
        let mut req_a2 = Request::new("r2", "a", 0);
        a.on_request(&mut req_a2).await;
        let mut req_b1 = Request::new("r1", "b", 0);
        b.on_request(&mut req_b1).await;

        assert_eq!(req_a1.meta.get("seen").unwrap().as_i64(), Some(1));
        assert_eq!(req_a2.meta.get("seen").unwrap().as_i64(), Some(2));
        assert_eq!(req_b1.meta.get("seen").unwrap().as_i64(), Some(1));

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn script_exception_is_non_fatal() {
        let script = r#"
            fn on_request(req) {
                if req.id == "bad" {
                    throw "boom";
                }
                return #{allow: true};
            }
        "#;
        let interp = ScriptInterpreter::new(script, "client-c").unwrap();

        let mut bad = Request::new("bad", "c", 0);
        let decision = interp.on_request(&mut bad).await;
        assert!(decision.allow); // default on error

        let mut good = Request::new("good", "c", 0);
        let decision = interp.on_request(&mut good).await;
        assert!(decision.allow);

        interp.shutdown().await;
    }
}
