//! Handlers for the REST surface of §6, and the router that wires them (and
//! the two WebSocket upgrades) together.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use sim_core::{ClientConfigGroup, NetworkBehavior, ServerBehavior};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dto::{status_label, SimulationStatusResponse, StartQuery};
use crate::error::ApiError;
use crate::notify::NotificationEvent;
use crate::state::AppState;
use crate::ws;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/simulation", get(simulation_status).post(simulation_reset).put(simulation_start).delete(simulation_stop))
        .route("/api/clients", get(list_clients).post(add_client).delete(clear_clients))
        .route("/api/clients/{id}", get(get_client).put(update_client).delete(delete_client))
        .route("/api/server", get(get_server).put(put_server))
        .route("/api/network", get(get_network).put(put_network))
        .route("/api/ws/metrics", get(ws::metrics_ws))
        .route("/api/ws/notifications", get(ws::notifications_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn simulation_status(State(state): State<Arc<AppState>>) -> Json<SimulationStatusResponse> {
    let sim = state.sim.lock().await;
    Json(SimulationStatusResponse { id: sim.id.clone(), status: status_label(sim.status()), started_at: sim.started_at() })
}

async fn simulation_reset(State(state): State<Arc<AppState>>) -> Json<SimulationStatusResponse> {
    let mut sim = state.sim.lock().await;
    if sim.is_running() {
        sim.stop().await;
    }
    *sim = sim_core::Simulation::new(uuid::Uuid::new_v4().to_string());
    state.retarget_metrics(sim.metrics());
    state.notify_hub.publish(NotificationEvent::SimulationReset { id: sim.id.clone() });
    Json(SimulationStatusResponse { id: sim.id.clone(), status: status_label(sim.status()), started_at: sim.started_at() })
}

async fn simulation_start(State(state): State<Arc<AppState>>, Query(query): Query<StartQuery>) -> Result<Json<SimulationStatusResponse>, ApiError> {
    let mut sim = state.sim.lock().await;
    let run_limit = query.limit.map(Duration::from_secs);
    sim.start(run_limit).await.map_err(ApiError::from_validation)?;
    state.notify_hub.publish(NotificationEvent::SimulationStarted { started_at: sim.started_at().unwrap_or(0) });
    Ok(Json(SimulationStatusResponse { id: sim.id.clone(), status: status_label(sim.status()), started_at: sim.started_at() }))
}

async fn simulation_stop(State(state): State<Arc<AppState>>) -> Json<SimulationStatusResponse> {
    let mut sim = state.sim.lock().await;
    sim.stop().await;
    state.notify_hub.publish(NotificationEvent::SimulationStopped);
    Json(SimulationStatusResponse { id: sim.id.clone(), status: status_label(sim.status()), started_at: sim.started_at() })
}

async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<ClientConfigGroup>> {
    let sim = state.sim.lock().await;
    Json(sim.groups().to_vec())
}

async fn add_client(State(state): State<Arc<AppState>>, Json(mut group): Json<ClientConfigGroup>) -> Result<Json<ClientConfigGroup>, ApiError> {
    if group.id.is_empty() {
        group.id = uuid::Uuid::new_v4().to_string();
    }
    let mut sim = state.sim.lock().await;
    sim.add_group(group.clone()).map_err(ApiError::from_validation)?;
    state.notify_hub.publish(NotificationEvent::ClientConfigAdded { id: group.id.clone() });
    Ok(Json(group))
}

async fn clear_clients(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    let mut sim = state.sim.lock().await;
    sim.clear_groups().map_err(ApiError::from_validation)?;
    state.notify_hub.publish(NotificationEvent::ClientConfigsCleared);
    Ok(StatusCode::OK)
}

async fn get_client(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<ClientConfigGroup>, ApiError> {
    let sim = state.sim.lock().await;
    if sim.is_running() {
        return Err(ApiError::running());
    }
    sim.groups().iter().find(|g| g.id == id).cloned().map(Json).ok_or_else(|| ApiError::NotFound("unknown client group id".to_string()))
}

async fn update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(group): Json<ClientConfigGroup>,
) -> Result<Json<ClientConfigGroup>, ApiError> {
    let mut sim = state.sim.lock().await;
    if sim.is_running() {
        return Err(ApiError::running());
    }
    sim.update_group(&id, group.clone()).map_err(ApiError::from_validation)?;
    state.notify_hub.publish(NotificationEvent::ClientConfigUpdated { id });
    Ok(Json(group))
}

async fn delete_client(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let mut sim = state.sim.lock().await;
    if sim.is_running() {
        return Err(ApiError::running());
    }
    sim.delete_group(&id).map_err(ApiError::from_validation)?;
    state.notify_hub.publish(NotificationEvent::ClientConfigDeleted { id });
    Ok(StatusCode::OK)
}

async fn get_server(State(state): State<Arc<AppState>>) -> Json<ServerBehavior> {
    Json(state.sim.lock().await.server_behavior())
}

async fn put_server(State(state): State<Arc<AppState>>, Json(behavior): Json<ServerBehavior>) -> Json<ServerBehavior> {
    let mut sim = state.sim.lock().await;
    sim.set_server_behavior(behavior.clone());
    state.notify_hub.publish(NotificationEvent::ServerBehaviorUpdated);
    Json(behavior)
}

async fn get_network(State(state): State<Arc<AppState>>) -> Json<NetworkBehavior> {
    Json(state.sim.lock().await.network_behavior())
}

async fn put_network(State(state): State<Arc<AppState>>, Json(behavior): Json<NetworkBehavior>) -> Json<NetworkBehavior> {
    let mut sim = state.sim.lock().await;
    sim.set_network_behavior(behavior.clone());
    state.notify_hub.publish(NotificationEvent::NetworkBehaviorUpdated);
    Json(behavior)
}
