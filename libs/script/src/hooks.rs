use async_trait::async_trait;

use crate::request::{Request, Response};

/// Decision returned from `on_request`. The default (used whenever a script
/// errors or omits the hook) allows the request through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct HookDecision {
    pub allow: bool,
    pub delay_ms: u64,
    pub timeout_ms: Option<u64>,
}

impl Default for HookDecision {
    fn default() -> Self {
        Self { allow: true, delay_ms: 0, timeout_ms: None }
    }
}

/// Decision returned from `on_retry`. The default never retries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RetryDecision {
    pub allow: bool,
    pub delay_ms: u64,
}

/// The five-hook contract every client-side request policy implements.
///
/// Implementations (the sandboxed script executor, or [`crate::noop::NoopInterpreter`])
/// must serialize their own internal state: the trait does not require `&mut
/// self` so that a single `Arc<dyn BehaviorInterpreter>` can be shared freely,
/// but a real implementation still only evaluates one hook at a time.
#[async_trait]
pub trait BehaviorInterpreter: Send + Sync {
    async fn on_request(&self, req: &mut Request) -> HookDecision;
    async fn on_response(&self, req: &mut Request, resp: &Response);
    async fn on_error(&self, req: &mut Request, resp: &Response);
    async fn on_fail(&self, req: &mut Request, err: &str);
    async fn on_retry(&self, req: &mut Request, resp: Option<&Response>, err: Option<&str>) -> RetryDecision;

    /// Stops the executor. Any work item already enqueued completes with
    /// default values rather than being silently dropped.
    async fn shutdown(&self);
}
