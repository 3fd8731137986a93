use std::sync::Arc;
use std::time::Duration;

use orchestrator_types::models::{Engine, Stream, StreamStatus};

use super::upstream::fake::FakeUpstreamClient;
use super::upstream::StatSnapshot;
use super::{EngineUpstreamClient, LoopBlacklist, StreamRegistry, StreamRegistryConfig};
use crate::container::FakeDriver;
use crate::events::EventBus;
use crate::fleet::FleetState;
use crate::health::prober::fake::FakeProber;
use crate::health::{EngineProber, HealthMonitor};

fn fleet(tmp: &tempfile::TempDir) -> Arc<FleetState> {
    Arc::new(FleetState::new(
        "test-owner".into(),
        Arc::new(FakeDriver::new()),
        Arc::new(EventBus::new()),
        tmp.path().join("snapshot.json").to_string_lossy().into_owned(),
        Duration::from_millis(10),
    ))
}

fn registry(
    fleet: Arc<FleetState>,
    upstream: Arc<FakeUpstreamClient>,
    config: StreamRegistryConfig,
) -> Arc<StreamRegistry> {
    let prober: Arc<dyn EngineProber> = Arc::new(FakeProber::new(true));
    let health = HealthMonitor::new(Arc::clone(&fleet), Arc::new(EventBus::new()), prober, Duration::from_secs(10));
    let dyn_upstream: Arc<dyn EngineUpstreamClient> = upstream;
    StreamRegistry::new(fleet, health, dyn_upstream, Arc::new(LoopBlacklist::new()), config)
}

fn default_config() -> StreamRegistryConfig {
    StreamRegistryConfig {
        collect_interval: Duration::from_secs(2),
        stale_check_interval: Duration::from_secs(10),
        stream_timeout: chrono::Duration::seconds(120),
        loop_check_interval: Duration::from_secs(10),
        loop_threshold: chrono::Duration::seconds(3600),
        cleanup_interval: Duration::from_secs(300),
        ended_retention: chrono::Duration::seconds(3600),
        blacklist_retention_minutes: 0,
    }
}

#[tokio::test]
async fn stats_collector_ends_stream_on_observed_stop() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    fleet_state.insert_engine(Engine::new("e1".into(), "ace-1".into(), "h".into(), 6878)).await;
    let stream = Stream::new("k1".into(), "e1".into(), "sess-1".into(), "http://e/stat".into(), "http://e/cmd".into());
    let id = stream.stream_id;
    fleet_state.insert_stream(stream).await;

    let upstream = Arc::new(FakeUpstreamClient::new());
    upstream.set_response(
        "http://e/stat",
        StatSnapshot {
            speed_down: 0,
            speed_up: 0,
            peers: 0,
            downloaded: 0,
            uploaded: 0,
            live_last: None,
            playback_session_id: "sess-1".into(),
            stopped: true,
        },
    );

    let registry = registry(Arc::clone(&fleet_state), upstream, default_config());
    registry.collect_stats().await;

    assert_eq!(fleet_state.get_stream(&id).await.unwrap().status, StreamStatus::Ended);
}

#[tokio::test]
async fn stats_collector_ends_stream_on_unknown_playback_session() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    let stream = Stream::new("k1".into(), "e1".into(), "sess-1".into(), "http://e/stat".into(), "http://e/cmd".into());
    let id = stream.stream_id;
    fleet_state.insert_stream(stream).await;

    let upstream = Arc::new(FakeUpstreamClient::new());
    upstream.set_response(
        "http://e/stat",
        StatSnapshot {
            speed_down: 1,
            speed_up: 1,
            peers: 1,
            downloaded: 1,
            uploaded: 1,
            live_last: Some(chrono::Utc::now()),
            playback_session_id: "sess-2-different".into(),
            stopped: false,
        },
    );

    let registry = registry(Arc::clone(&fleet_state), upstream, default_config());
    registry.collect_stats().await;

    assert_eq!(fleet_state.get_stream(&id).await.unwrap().status, StreamStatus::Ended);
}

#[tokio::test]
async fn stale_detector_ends_streams_past_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    let mut stream =
        Stream::new("k1".into(), "e1".into(), "sess-1".into(), "http://e/stat".into(), "http://e/cmd".into());
    stream.live_last = Some(chrono::Utc::now() - chrono::Duration::seconds(200));
    let id = stream.stream_id;
    fleet_state.insert_stream(stream).await;

    let mut config = default_config();
    config.stream_timeout = chrono::Duration::seconds(120);
    let registry = registry(Arc::clone(&fleet_state), Arc::new(FakeUpstreamClient::new()), config);
    registry.detect_stale().await;

    assert_eq!(fleet_state.get_stream(&id).await.unwrap().status, StreamStatus::Ended);
}

#[tokio::test]
async fn loop_detector_blacklists_and_stops_upstream() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    let mut stream =
        Stream::new("k1".into(), "e1".into(), "sess-1".into(), "http://e/stat".into(), "http://e/cmd".into());
    stream.live_last = Some(chrono::Utc::now() - chrono::Duration::seconds(3601));
    let id = stream.stream_id;
    fleet_state.insert_stream(stream).await;

    let upstream = Arc::new(FakeUpstreamClient::new());
    let registry = registry(Arc::clone(&fleet_state), Arc::clone(&upstream), default_config());
    registry.detect_loops().await;

    assert_eq!(fleet_state.get_stream(&id).await.unwrap().status, StreamStatus::Ended);
    assert!(registry.blacklist().contains("k1"));
    assert_eq!(upstream.stopped_urls(), vec!["http://e/cmd".to_owned()]);
}

#[tokio::test]
async fn cleanup_evicts_retained_ended_streams() {
    let tmp = tempfile::tempdir().unwrap();
    let fleet_state = fleet(&tmp);
    let stream = Stream::new("k1".into(), "e1".into(), "sess-1".into(), "http://e/stat".into(), "http://e/cmd".into());
    let id = stream.stream_id;
    fleet_state.insert_stream(stream).await;
    fleet_state.end_stream(&id, orchestrator_types::models::StreamEndReason::Idle).await;

    let mut config = default_config();
    config.ended_retention = chrono::Duration::seconds(0);
    let registry = registry(Arc::clone(&fleet_state), Arc::new(FakeUpstreamClient::new()), config);
    registry.cleanup().await;

    assert!(fleet_state.get_stream(&id).await.is_none());
}
