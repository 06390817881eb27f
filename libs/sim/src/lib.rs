mod behavior;
mod client;
mod errors;
mod event_hub;
mod network;
mod sampling;
mod server;
mod simulation;

// region:    --- Exports
pub use behavior::{NetworkBehavior, ResourceSettings, ServerBehavior};
pub use client::{Client, ClientConfigGroup};
pub use errors::SimError;
pub use event_hub::{EventHub, MetricsEmitter, ThrottledHub};
pub use network::Network;
pub use server::{Server, ServerLifecycle};
pub use simulation::{Simulation, SimulationStatus};
// endregion: --- Exports

#[cfg(test)]
mod end_to_end_tests {
    use std::time::Duration;

    use sim_curve::BehaviorPoint;

    use crate::behavior::{NetworkBehavior, ServerBehavior};
    use crate::client::ClientConfigGroup;
    use crate::simulation::Simulation;

    fn flat_points(y: f64) -> Vec<BehaviorPoint> {
        vec![BehaviorPoint::curve(0.0, y), BehaviorPoint::curve(1.0, y)]
    }

    fn quiet_network() -> NetworkBehavior {
        NetworkBehavior {
            to: 60.0,
            lat_from: 1.0,
            lat_to: 2.0,
            drop_rate: flat_points(0.0),
            lat_min: flat_points(1.0),
            lat_max: flat_points(2.0),
        }
    }

    fn fast_server(error_rate: f64) -> ServerBehavior {
        ServerBehavior {
            to: 60.0,
            rt_from: 0.0,
            rt_to: 5.0,
            errors: flat_points(error_rate),
            rt_min: flat_points(1.0),
            rt_max: flat_points(3.0),
            resource_management_enabled: false,
            resource_settings: Default::default(),
        }
    }

    #[tokio::test]
    async fn noop_clients_against_a_healthy_server_all_succeed() {
        let mut sim = Simulation::new("sim-1");
        sim.set_server_behavior(fast_server(0.0));
        sim.set_network_behavior(quiet_network());
        sim.add_group(ClientConfigGroup::new("g1", 10, 100)).unwrap();

        sim.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        sim.stop().await;

        let snap = sim.metrics().snapshot();
        assert!(snap.client_sent_req >= 40, "sent={}", snap.client_sent_req);
        assert_eq!(snap.client_sent_req, snap.client_success_resp);
        assert_eq!(snap.client_blocked_req, 0);
        assert_eq!(snap.client_retried_req, 0);
    }

    #[tokio::test]
    async fn noop_clients_never_retry_against_an_always_failing_server() {
        let mut sim = Simulation::new("sim-2");
        sim.set_server_behavior(fast_server(1.0));
        sim.set_network_behavior(quiet_network());
        sim.add_group(ClientConfigGroup::new("g1", 5, 100)).unwrap();

        sim.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        sim.stop().await;

        let snap = sim.metrics().snapshot();
        assert_eq!(snap.client_error_resp, snap.client_sent_req);
        assert_eq!(snap.client_retried_req, 0);
        assert_eq!(snap.client_success_resp, 0);
    }

    #[tokio::test]
    async fn full_forward_drop_never_reaches_the_server() {
        let mut sim = Simulation::new("sim-3");
        sim.set_server_behavior(fast_server(0.0));
        let mut net = quiet_network();
        net.drop_rate = flat_points(1.0);
        sim.set_network_behavior(net);
        sim.add_group(ClientConfigGroup::new("g1", 5, 100)).unwrap();

        sim.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        sim.stop().await;

        let snap = sim.metrics().snapshot();
        assert_eq!(snap.client_network_failed_req, snap.client_sent_req);
        assert_eq!(snap.server_received_req, 0);
    }

    #[tokio::test]
    async fn stop_joins_every_client_and_the_server_promptly() {
        let mut sim = Simulation::new("sim-4");
        sim.set_server_behavior(fast_server(0.0));
        sim.set_network_behavior(quiet_network());
        sim.add_group(ClientConfigGroup::new("g1", 20, 10)).unwrap();

        sim.start(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = std::time::Instant::now();
        sim.stop().await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!sim.is_running());
    }

    #[tokio::test]
    async fn mutating_groups_while_running_is_rejected() {
        let mut sim = Simulation::new("sim-5");
        sim.set_server_behavior(fast_server(0.0));
        sim.set_network_behavior(quiet_network());
        sim.add_group(ClientConfigGroup::new("g1", 1, 50)).unwrap();
        sim.start(None).await.unwrap();

        let result = sim.add_group(ClientConfigGroup::new("g2", 1, 50));
        assert!(result.is_err());

        sim.stop().await;
    }

    #[tokio::test]
    async fn starting_with_no_groups_is_rejected() {
        let mut sim = Simulation::new("sim-6");
        let result = sim.start(None).await;
        assert!(result.is_err());
    }
}
