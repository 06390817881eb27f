use thiserror::Error;

/// Typed errors surfaced at the core boundary (see the error taxonomy).
/// Every variant carries enough context for `tracing` to log it with
/// structured fields at the point it gets downgraded into a metrics
/// increment.
#[derive(Debug, Error, Clone)]
pub enum SimError {
    #[error("server out of memory (mem_util={mem_util:.3})")]
    ServerOutOfMemory { mem_util: f64 },

    #[error("server queue full (depth={depth}, cap={cap})")]
    ServerQueueFull { depth: usize, cap: usize },

    #[error("network packet lost for request {request_id}")]
    NetworkPacketLost { request_id: String },

    #[error("cancelled")]
    Cancelled,

    #[error("client timeout for request {request_id} after {timeout_ms}ms")]
    ClientTimeout { request_id: String, timeout_ms: u64 },
}
