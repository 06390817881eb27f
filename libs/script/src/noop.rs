use async_trait::async_trait;

use crate::hooks::{BehaviorInterpreter, HookDecision, RetryDecision};
use crate::request::{Request, Response};

/// Interpreter used when a client group has no behavior script: allows every
/// request, never delays, never retries.
#[derive(Debug, Default)]
pub struct NoopInterpreter;

#[async_trait]
impl BehaviorInterpreter for NoopInterpreter {
    async fn on_request(&self, _req: &mut Request) -> HookDecision {
        HookDecision::default()
    }

    async fn on_response(&self, _req: &mut Request, _resp: &Response) {}

    async fn on_error(&self, _req: &mut Request, _resp: &Response) {}

    async fn on_fail(&self, _req: &mut Request, _err: &str) {}

    async fn on_retry(&self, _req: &mut Request, _resp: Option<&Response>, _err: Option<&str>) -> RetryDecision {
        RetryDecision::default()
    }

    async fn shutdown(&self) {}
}
