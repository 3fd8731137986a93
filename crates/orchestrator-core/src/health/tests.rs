use std::sync::Arc;
use std::time::Duration;

use orchestrator_types::models::{Engine, HealthStatus, Vpn, VpnMode, VpnStatus};

use super::prober::fake::FakeProber;
use super::{EngineProber, HealthMonitor};
use crate::container::FakeDriver;
use crate::events::EventBus;
use crate::fleet::FleetState;
use crate::vpn::VpnCoordinator;

fn fleet(tmp: &tempfile::TempDir) -> Arc<FleetState> {
    Arc::new(FleetState::new(
        "test-owner".into(),
        Arc::new(FakeDriver::new()),
        Arc::new(EventBus::new()),
        tmp.path().join("snapshot.json").to_string_lossy().into_owned(),
        Duration::from_millis(10),
    ))
}

fn no_vpn_coordinator(fleet: Arc<FleetState>, driver: Arc<dyn crate::container::ContainerDriver>) -> Arc<VpnCoordinator> {
    Arc::new(VpnCoordinator::new(
        driver,
        fleet,
        Arc::new(EventBus::new()),
        vec![],
        Duration::from_secs(5),
        chrono::Duration::seconds(120),
        4,
    ))
}

fn monitor(fleet_state: Arc<FleetState>, prober: Arc<dyn EngineProber>, grace: Duration) -> Arc<HealthMonitor> {
    let driver: Arc<dyn crate::container::ContainerDriver> = Arc::new(FakeDriver::new());
    let vpn = no_vpn_coordinator(Arc::clone(&fleet_state), Arc::clone(&driver));
    HealthMonitor::new(fleet_state, Arc::new(EventBus::new()), driver, vpn, prober, Duration::from_secs(10), grace)
}

#[tokio::test]
async fn three_consecutive_failures_marks_unhealthy() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    fleet_state.insert_engine(Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878)).await;

    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(false));
    let monitor = monitor(Arc::clone(&fleet_state), prober, Duration::from_secs(60));

    monitor.record_failure("e1").await;
    assert_eq!(fleet_state.get_engine("e1").await.unwrap().health_status, HealthStatus::Unknown);
    monitor.record_failure("e1").await;
    assert_eq!(fleet_state.get_engine("e1").await.unwrap().health_status, HealthStatus::Unknown);
    monitor.record_failure("e1").await;
    assert_eq!(fleet_state.get_engine("e1").await.unwrap().health_status, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn single_success_restores_healthy_and_resets_counter() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    fleet_state.insert_engine(Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878)).await;

    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(false));
    let monitor = monitor(Arc::clone(&fleet_state), prober, Duration::from_secs(60));

    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;
    assert_eq!(fleet_state.get_engine("e1").await.unwrap().health_status, HealthStatus::Unhealthy);

    monitor.record_success("e1").await;
    assert_eq!(fleet_state.get_engine("e1").await.unwrap().health_status, HealthStatus::Healthy);
    assert_eq!(monitor.consecutive_failures("e1"), 0);
}

#[tokio::test]
async fn record_data_only_advances_last_data_at() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    fleet_state.insert_engine(Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878)).await;

    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(true));
    let monitor = monitor(Arc::clone(&fleet_state), prober, Duration::from_secs(60));

    let later = chrono::Utc::now();
    let earlier = later - chrono::Duration::seconds(30);

    monitor.record_data("e1", later).await;
    monitor.record_data("e1", earlier).await;

    assert_eq!(fleet_state.get_engine("e1").await.unwrap().last_data_at, Some(later));
}

#[tokio::test]
async fn evict_unhealthy_beyond_grace_removes_engine_past_grace() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    fleet_state.insert_engine(Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878)).await;

    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(false));
    let monitor = monitor(Arc::clone(&fleet_state), prober, Duration::ZERO);

    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;
    assert_eq!(fleet_state.get_engine("e1").await.unwrap().health_status, HealthStatus::Unhealthy);

    monitor.evict_unhealthy_beyond_grace().await;

    assert!(fleet_state.get_engine("e1").await.is_none(), "unhealthy beyond a zero grace period must be evicted");
}

#[tokio::test]
async fn evict_unhealthy_beyond_grace_skips_within_grace_window() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    fleet_state.insert_engine(Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878)).await;

    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(false));
    let monitor = monitor(Arc::clone(&fleet_state), prober, Duration::from_secs(3600));

    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;

    monitor.evict_unhealthy_beyond_grace().await;

    assert!(fleet_state.get_engine("e1").await.is_some(), "still within the grace window, must not be evicted yet");
}

#[tokio::test]
async fn evict_unhealthy_beyond_grace_skips_engine_in_vpn_stabilization() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    let mut engine = Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878);
    engine.vpn_binding = Some("vpn-a".into());
    fleet_state.insert_engine(engine).await;

    let driver: Arc<dyn crate::container::ContainerDriver> = Arc::new(FakeDriver::new());
    let mut vpn_a = Vpn::new("vpn-a".into(), VpnMode::Single);
    vpn_a.status = VpnStatus::Up;
    vpn_a.last_recovery_at = Some(chrono::Utc::now());
    let vpn_client: Arc<dyn crate::vpn::VpnSidecarClient> =
        Arc::new(crate::vpn::client::fake::FakeVpnSidecarClient::new(true, None));
    let vpn = Arc::new(VpnCoordinator::new(
        Arc::clone(&driver),
        Arc::clone(&fleet_state),
        Arc::new(EventBus::new()),
        vec![(vpn_a, vpn_client)],
        Duration::from_secs(5),
        chrono::Duration::seconds(120),
        4,
    ));

    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(false));
    let monitor = HealthMonitor::new(
        Arc::clone(&fleet_state),
        Arc::new(EventBus::new()),
        driver,
        vpn,
        prober,
        Duration::from_secs(10),
        Duration::ZERO,
    );

    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;
    monitor.record_failure("e1").await;

    monitor.evict_unhealthy_beyond_grace().await;

    assert!(
        fleet_state.get_engine("e1").await.is_some(),
        "an engine bound to a VPN still in its recovery stabilization window must not be evicted"
    );
}
