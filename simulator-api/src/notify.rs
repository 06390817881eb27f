//! Lifecycle events broadcast on `/api/ws/notifications`.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    SimulationReset { id: String },
    SimulationStarted { started_at: i64 },
    SimulationStopped,
    ClientConfigAdded { id: String },
    ClientConfigUpdated { id: String },
    ClientConfigDeleted { id: String },
    ClientConfigsCleared,
    ServerBehaviorUpdated,
    NetworkBehaviorUpdated,
    Joined,
    Left,
}
