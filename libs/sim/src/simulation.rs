//! Lifecycle of server, network, metrics and the dynamic set of clients;
//! ramp-up scheduling; cooperative shutdown; metrics emitter wiring.

use std::sync::Arc;
use std::time::Duration;

use sim_metrics::Metrics;
use sim_script::{BehaviorInterpreter, NoopInterpreter, ScriptInterpreter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::behavior::{NetworkBehavior, ServerBehavior};
use crate::client::{Client, ClientConfigGroup};
use crate::network::Network;
use crate::sampling::{jitter, now_ms};
use crate::server::Server;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationStatus {
    None,
    Running,
    Stopped,
}

/// Everything a running simulation needs to tear down: the server, every
/// live client, and the coordinator task that was still ramping clients up.
struct RunningState {
    server: Server,
    network: Network,
    cancel: CancellationToken,
    coordinator: JoinHandle<()>,
    clients: Arc<tokio::sync::Mutex<Vec<Client>>>,
    collector: JoinHandle<()>,
    run_limit: Option<JoinHandle<()>>,
}

/// Controls one simulation's lifetime. Client configs and the server/network
/// behaviors persist across `start`/`stop`; everything runtime (server
/// resource state, clients, the cancellation scope) is recreated each start.
pub struct Simulation {
    pub id: String,
    metrics: Arc<Metrics>,
    groups: Vec<ClientConfigGroup>,
    server_behavior: ServerBehavior,
    network_behavior: NetworkBehavior,
    started_at: Option<i64>,
    running: Option<RunningState>,
}

impl Simulation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metrics: Arc::new(Metrics::new()),
            groups: Vec::new(),
            server_behavior: ServerBehavior::default(),
            network_behavior: NetworkBehavior::default(),
            started_at: None,
            running: None,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn status(&self) -> SimulationStatus {
        match (&self.running, self.started_at) {
            (Some(_), _) => SimulationStatus::Running,
            (None, Some(_)) => SimulationStatus::Stopped,
            (None, None) => SimulationStatus::None,
        }
    }

    pub fn started_at(&self) -> Option<i64> {
        self.started_at
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn groups(&self) -> &[ClientConfigGroup] {
        &self.groups
    }

    pub fn server_behavior(&self) -> ServerBehavior {
        self.server_behavior.clone()
    }

    pub fn network_behavior(&self) -> NetworkBehavior {
        self.network_behavior.clone()
    }

    pub fn set_server_behavior(&mut self, behavior: ServerBehavior) {
        self.server_behavior = behavior.clone();
        if let Some(running) = &self.running {
            running.server.set_behavior(behavior);
        }
    }

    pub fn set_network_behavior(&mut self, behavior: NetworkBehavior) {
        self.network_behavior = behavior.clone();
        if let Some(running) = &self.running {
            running.network.set_behavior(behavior);
        }
    }

    /// Mutation requires the simulation to be not-running.
    pub fn add_group(&mut self, group: ClientConfigGroup) -> Result<(), &'static str> {
        if self.is_running() {
            return Err("cannot add a client group while running");
        }
        if self.groups.iter().any(|g| g.id == group.id) {
            return Err("duplicate client group id");
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn update_group(&mut self, id: &str, group: ClientConfigGroup) -> Result<(), &'static str> {
        if self.is_running() {
            return Err("cannot update a client group while running");
        }
        let slot = self.groups.iter_mut().find(|g| g.id == id).ok_or("unknown client group id")?;
        *slot = group;
        Ok(())
    }

    pub fn delete_group(&mut self, id: &str) -> Result<(), &'static str> {
        if self.is_running() {
            return Err("cannot delete a client group while running");
        }
        let before = self.groups.len();
        self.groups.retain(|g| g.id != id);
        if self.groups.len() == before {
            return Err("unknown client group id");
        }
        Ok(())
    }

    pub fn clear_groups(&mut self) -> Result<(), &'static str> {
        if self.is_running() {
            return Err("cannot clear client groups while running");
        }
        self.groups.clear();
        Ok(())
    }

    pub async fn start(&mut self, run_limit: Option<Duration>) -> Result<(), &'static str> {
        if self.is_running() {
            return Err("simulation already running");
        }
        if self.groups.is_empty() {
            return Err("no client groups configured");
        }

        self.metrics.reset();
        let cancel = CancellationToken::new();
        let server = Server::new(self.server_behavior.clone(), self.metrics());
        server.start().await;
        let network = Network::new(self.network_behavior.clone(), self.metrics(), server.clone(), cancel.clone());

        let (client_tx, client_rx) = tokio::sync::mpsc::unbounded_channel();
        let coordinator = tokio::spawn(run_coordinator(
            self.groups.clone(),
            network.clone(),
            self.metrics(),
            cancel.clone(),
            client_tx,
        ));

        // Clients trickle in as the coordinator ramps each group up; a
        // collector task drains them into a shared list so `start` returns
        // immediately instead of blocking for the whole ramp-up window.
        let clients: Arc<tokio::sync::Mutex<Vec<Client>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let clients_for_collector = Arc::clone(&clients);
        let collector = tokio::spawn(async move {
            let mut rx = client_rx;
            while let Some(client) = rx.recv().await {
                clients_for_collector.lock().await.push(client);
            }
        });

        let run_limit_handle = run_limit.map(|limit| {
            let cancel_for_limit = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                cancel_for_limit.cancel();
            })
        });

        self.started_at = Some(now_ms());
        self.running = Some(RunningState { server, network, cancel, coordinator, clients, collector, run_limit: run_limit_handle });

        Ok(())
    }

    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else { return };
        running.cancel.cancel();
        if let Some(limit) = running.run_limit {
            limit.abort();
        }
        let _ = running.coordinator.await;
        let _ = running.collector.await;
        let clients = std::mem::take(&mut *running.clients.lock().await);
        for client in clients {
            client.stop().await;
        }
        running.server.stop().await;
    }
}

/// Spawns each group's clients at `config.delay + (R/N)*i + uniform(-0.5,
/// 0.5)*(R/N)` and forwards the handle back to `start` via `client_tx` as
/// each one comes online, so the coordinator itself can exit once every
/// client in every group has been scheduled.
async fn run_coordinator(
    groups: Vec<ClientConfigGroup>,
    network: Network,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    client_tx: tokio::sync::mpsc::UnboundedSender<Client>,
) {
    let mut group_tasks = Vec::new();
    for group in groups {
        let network = network.clone();
        let metrics = Arc::clone(&metrics);
        let cancel = cancel.clone();
        let client_tx = client_tx.clone();
        group_tasks.push(tokio::spawn(async move {
            ramp_up_group(group, network, metrics, cancel, client_tx).await;
        }));
    }
    for task in group_tasks {
        let _ = task.await;
    }
}

async fn ramp_up_group(
    group: ClientConfigGroup,
    network: Network,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
    client_tx: tokio::sync::mpsc::UnboundedSender<Client>,
) {
    let n = group.count.max(1);
    let slot = group.ramp_up_ms as f64 / n as f64;
    for i in 0..group.count {
        let start_after_ms = group.delay_ms as f64 + slot * i as f64 + jitter(slot, 0.5);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(start_after_ms.max(0.0) as u64)) => {}
            _ = cancel.cancelled() => return,
        }
        if cancel.is_cancelled() {
            return;
        }

        let identity = format!("{}-{i}", group.id);
        let interpreter: Arc<dyn BehaviorInterpreter> = match &group.behavior_script {
            Some(script) => match ScriptInterpreter::new(script, &identity) {
                Ok(interp) => Arc::new(interp),
                Err(err) => {
                    tracing::warn!(group_id = %group.id, error = %err, "behavior script failed to load, falling back to noop");
                    Arc::new(NoopInterpreter)
                }
            },
            None => Arc::new(NoopInterpreter),
        };

        let client = Client::spawn(
            identity,
            group.id.clone(),
            network.clone(),
            Arc::clone(&metrics),
            interpreter,
            group.request_rate_ms,
            &cancel,
        );
        if client_tx.send(client).is_err() {
            return;
        }
    }
}

