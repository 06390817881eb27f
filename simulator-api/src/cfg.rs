//! CLI surface, mirroring the teacher's `stress_tester` binary shape: a
//! small `clap`-derived struct plus an optional scenario file instead of
//! individual producer/consumer counts.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use sim_core::{ClientConfigGroup, NetworkBehavior, ServerBehavior};

#[derive(Debug, Clone, Parser)]
#[command(name = "simulator-cli", about = "Client/server request simulator control-plane server")]
pub struct Cfg {
    /// Address the control API and WebSocket streams bind to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,
    /// JSON scenario file pre-loading client groups and server/network behavior.
    #[arg(long)]
    pub scenario: Option<PathBuf>,
    /// Start the simulation immediately once the scenario is loaded.
    #[arg(long, default_value_t = false)]
    pub autostart: bool,
    /// Run-time limit in seconds; only meaningful together with `--autostart`.
    #[arg(long)]
    pub run_duration_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub clients: Vec<ClientConfigGroup>,
    pub server: Option<ServerBehavior>,
    pub network: Option<NetworkBehavior>,
}
