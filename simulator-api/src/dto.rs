//! Wire-format request/response bodies for the REST surface. `ClientConfigGroup`,
//! `ServerBehavior`, and `NetworkBehavior` already carry the `serde` derives
//! the wire format needs, so only the API's own response envelopes live here.

use serde::{Deserialize, Serialize};
use sim_core::SimulationStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatusResponse {
    pub id: String,
    pub status: &'static str,
    pub started_at: Option<i64>,
}

pub fn status_label(status: SimulationStatus) -> &'static str {
    match status {
        SimulationStatus::None => "NONE",
        SimulationStatus::Running => "RUNNING",
        SimulationStatus::Stopped => "STOPPED",
    }
}

#[derive(Debug, Deserialize)]
pub struct StartQuery {
    pub limit: Option<u64>,
}
