use std::sync::Arc;
use std::time::Duration;

use orchestrator_types::models::{Engine, Vpn, VpnMode, VpnStatus};

use super::client::fake::FakeVpnSidecarClient;
use super::client::VpnSidecarClient;
use super::VpnCoordinator;
use crate::container::FakeDriver;
use crate::events::EventBus;
use crate::fleet::FleetState;

fn fleet(tmp: &tempfile::TempDir) -> Arc<FleetState> {
    Arc::new(FleetState::new(
        "test-owner".into(),
        Arc::new(FakeDriver::new()),
        Arc::new(EventBus::new()),
        tmp.path().join("snapshot.json").to_string_lossy().into_owned(),
        Duration::from_millis(10),
    ))
}

fn coordinator(
    fleet: Arc<FleetState>,
    driver: Arc<FakeDriver>,
    vpns: Vec<(Vpn, Arc<dyn VpnSidecarClient>)>,
) -> VpnCoordinator {
    VpnCoordinator::new(
        driver,
        fleet,
        Arc::new(EventBus::new()),
        vpns,
        Duration::from_secs(5),
        chrono::Duration::seconds(120),
        4,
    )
}

#[tokio::test]
async fn recovery_stamps_last_recovery_at_and_flips_vpn_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let client: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(false, None));
    let vpn = Vpn::new("vpn-a".into(), VpnMode::Single);
    let coord = coordinator(fleet(&tmp), driver, vec![(vpn, client)]);

    coord.poll_once("vpn-a").await.unwrap();
    assert!(!coord.vpn_ok().await);
    assert!(coord.get("vpn-a").await.unwrap().last_recovery_at.is_none());
}

#[tokio::test]
async fn port_change_invalidates_the_forwarded_engine() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let fleet_state = fleet(&tmp);

    let mut engine = Engine::new("e1".into(), "ace-1".into(), "127.0.0.1".into(), 6878);
    engine.forwarded = true;
    engine.vpn_binding = Some("vpn-a".into());
    fleet_state.insert_engine(engine).await;

    let fake_client = Arc::new(FakeVpnSidecarClient::new(true, Some(30000)));
    let dyn_client: Arc<dyn VpnSidecarClient> = fake_client.clone();

    let mut vpn = Vpn::new("vpn-a".into(), VpnMode::Single);
    vpn.status = VpnStatus::Up;
    vpn.forwarded_port = Some(30000);
    let coord = coordinator(Arc::clone(&fleet_state), driver, vec![(vpn, dyn_client)]);

    // Port unchanged: no invalidation.
    coord.poll_once("vpn-a").await.unwrap();
    assert_eq!(fleet_state.list_engines().await.len(), 1);

    // Sidecar reports a new forwarded port: the old forwarded engine is stopped.
    fake_client.set_port(Some(61697));
    coord.poll_once("vpn-a").await.unwrap();
    assert_eq!(fleet_state.list_engines().await.len(), 0);
    assert_eq!(coord.get("vpn-a").await.unwrap().forwarded_port, Some(61697));
}

#[tokio::test]
async fn emergency_state_detects_single_failed_vpn_in_redundant_mode() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let up_client: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(true, Some(100)));
    let down_client: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(false, None));

    let vpn_up = Vpn::new("vpn-a".into(), VpnMode::Redundant);
    let vpn_down = Vpn::new("vpn-b".into(), VpnMode::Redundant);

    let coord = coordinator(
        fleet(&tmp),
        driver,
        vec![(vpn_up, up_client), (vpn_down, down_client)],
    );
    coord.poll_once("vpn-a").await.unwrap();
    coord.poll_once("vpn-b").await.unwrap();

    let (healthy, cap) = coord.emergency_state().await.expect("should be in emergency mode");
    assert_eq!(healthy, "vpn-a");
    assert_eq!(cap, 4);
}

#[tokio::test]
async fn single_mode_vpn_going_down_does_not_evict_bound_engines() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let fleet_state = fleet(&tmp);

    let mut engine = Engine::new("e1".into(), "ace-1".into(), "127.0.0.1".into(), 6878);
    engine.vpn_binding = Some("vpn-a".into());
    fleet_state.insert_engine(engine).await;

    let fake_client = Arc::new(FakeVpnSidecarClient::new(true, Some(100)));
    let dyn_client: Arc<dyn VpnSidecarClient> = fake_client.clone();
    let mut vpn = Vpn::new("vpn-a".into(), VpnMode::Single);
    vpn.status = VpnStatus::Up;
    let coord = coordinator(Arc::clone(&fleet_state), driver, vec![(vpn, dyn_client)]);

    fake_client.set_up(false);
    coord.poll_once("vpn-a").await.unwrap();

    assert_eq!(fleet_state.list_engines().await.len(), 1, "single-mode outage is not an emergency eviction trigger");
}

#[tokio::test]
async fn redundant_both_down_does_not_evict_bound_engines() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let fleet_state = fleet(&tmp);

    let mut engine = Engine::new("e1".into(), "ace-1".into(), "127.0.0.1".into(), 6878);
    engine.vpn_binding = Some("vpn-a".into());
    fleet_state.insert_engine(engine).await;

    let a_client = Arc::new(FakeVpnSidecarClient::new(true, Some(1)));
    let b_client: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(false, None));
    let a_dyn: Arc<dyn VpnSidecarClient> = a_client.clone();
    let mut vpn_a = Vpn::new("vpn-a".into(), VpnMode::Redundant);
    vpn_a.status = VpnStatus::Up;
    let coord = coordinator(
        Arc::clone(&fleet_state),
        driver,
        vec![(vpn_a, a_dyn), (Vpn::new("vpn-b".into(), VpnMode::Redundant), b_client)],
    );
    coord.poll_once("vpn-b").await.unwrap();

    a_client.set_up(false);
    coord.poll_once("vpn-a").await.unwrap();

    assert_eq!(fleet_state.list_engines().await.len(), 1, "both VPNs down is not the single-failed-side emergency case");
}

#[tokio::test]
async fn redundant_emergency_down_transition_evicts_bound_engines() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let fleet_state = fleet(&tmp);

    let mut engine = Engine::new("e1".into(), "ace-1".into(), "127.0.0.1".into(), 6878);
    engine.vpn_binding = Some("vpn-b".into());
    fleet_state.insert_engine(engine).await;

    let up_client: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(true, Some(100)));
    let down_client = Arc::new(FakeVpnSidecarClient::new(true, Some(200)));
    let down_dyn: Arc<dyn VpnSidecarClient> = down_client.clone();
    let mut vpn_b = Vpn::new("vpn-b".into(), VpnMode::Redundant);
    vpn_b.status = VpnStatus::Up;
    let coord = coordinator(
        Arc::clone(&fleet_state),
        driver,
        vec![(Vpn::new("vpn-a".into(), VpnMode::Redundant), up_client), (vpn_b, down_dyn)],
    );
    coord.poll_once("vpn-a").await.unwrap();

    down_client.set_up(false);
    coord.poll_once("vpn-b").await.unwrap();

    assert_eq!(fleet_state.list_engines().await.len(), 0, "a genuine one-side-down redundant emergency still evicts");
}

#[tokio::test]
async fn emergency_state_is_none_when_both_vpns_up() {
    let tmp = tempfile::tempdir().unwrap();
    let driver = Arc::new(FakeDriver::new());
    let a: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(true, Some(1)));
    let b: Arc<dyn VpnSidecarClient> = Arc::new(FakeVpnSidecarClient::new(true, Some(2)));
    let coord = coordinator(
        fleet(&tmp),
        driver,
        vec![
            (Vpn::new("vpn-a".into(), VpnMode::Redundant), a),
            (Vpn::new("vpn-b".into(), VpnMode::Redundant), b),
        ],
    );
    coord.poll_once("vpn-a").await.unwrap();
    coord.poll_once("vpn-b").await.unwrap();

    assert!(coord.emergency_state().await.is_none());
}
