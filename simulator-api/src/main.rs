use std::time::Duration;

use clap::Parser;
use simulator_api::cfg::{Cfg, Scenario};
use simulator_api::{routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cfg = Cfg::parse();
    tracing::info!(?cfg, "starting simulator control plane");

    let state = AppState::new();

    if let Some(path) = &cfg.scenario {
        load_scenario(&state, path).await?;
    }

    if cfg.autostart {
        let mut sim = state.sim.lock().await;
        let run_limit = cfg.run_duration_seconds.map(Duration::from_secs);
        sim.start(run_limit).await.map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!(id = %sim.id, "autostarted simulation");
    }

    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    tracing::info!(addr = %cfg.listen, "listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn load_scenario(state: &std::sync::Arc<AppState>, path: &std::path::Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading scenario {}: {e}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing scenario {}: {e}", path.display()))?;

    let mut sim = state.sim.lock().await;
    for group in scenario.clients {
        sim.add_group(group).map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(server) = scenario.server {
        sim.set_server_behavior(server);
    }
    if let Some(network) = scenario.network {
        sim.set_network_behavior(network);
    }
    tracing::info!(path = %path.display(), groups = sim.groups().len(), "scenario loaded");
    Ok(())
}
