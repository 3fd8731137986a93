#![allow(unused_crate_dependencies)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests live in tests/ dir")]
#![allow(clippy::expect_used, reason = "integration test — panics are the assertion mechanism")]

//! Exercises `ReqwestTsUpstream` and `ReqwestHlsUpstream` against a real
//! HTTP server (`wiremock`) rather than the in-process `Fake*` doubles used
//! by the unit tests alongside `proxy::ts`/`proxy::hls` — this is the only
//! place the wire format those two speak to an acestream engine is actually
//! round-tripped over a socket.

use orchestrator_core::proxy::hls::HlsUpstream;
use orchestrator_core::proxy::ts::{ReqwestTsUpstream, TsUpstream};
use orchestrator_types::models::Engine;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn engine_for(server: &MockServer) -> Engine {
    let addr = server.address();
    Engine::new("c1".into(), "ace-1".into(), addr.ip().to_string(), addr.port())
}

#[tokio::test]
async fn ts_upstream_open_parses_getstream_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ace/getstream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": {
                "playback_url": "http://127.0.0.1:6878/ace/play/session-1",
                "stat_url": "http://127.0.0.1:6878/ace/stat/session-1",
                "command_url": "http://127.0.0.1:6878/ace/cmd/session-1",
                "playback_session_id": "session-1",
            }
        })))
        .mount(&server)
        .await;

    let upstream = ReqwestTsUpstream::new().expect("client builds");
    let opened = upstream.open(&engine_for(&server), "deadbeef").await.expect("open succeeds");

    assert_eq!(opened.playback_session_id, "session-1");
    assert_eq!(opened.stat_url, "http://127.0.0.1:6878/ace/stat/session-1");
}

#[tokio::test]
async fn ts_upstream_open_surfaces_engine_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ace/getstream"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let upstream = ReqwestTsUpstream::new().expect("client builds");
    let result = upstream.open(&engine_for(&server), "deadbeef").await;

    assert!(result.is_err(), "a 500 with no JSON body must not parse as a successful open");
}

#[tokio::test]
async fn ts_upstream_open_byte_stream_yields_body_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ace/play/session-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .mount(&server)
        .await;

    let upstream = ReqwestTsUpstream::new().expect("client builds");
    let url = format!("{}/ace/play/session-1", server.uri());
    let mut stream = upstream.open_byte_stream(&url).await.expect("stream opens");

    use futures::StreamExt;
    let mut total = 0usize;
    while let Some(chunk) = stream.next().await {
        total += chunk.expect("no transport error").len();
    }
    assert_eq!(total, 4096);
}

#[tokio::test]
async fn hls_upstream_fetch_manifest_returns_playlist_body() {
    use orchestrator_core::proxy::hls::ReqwestHlsUpstream;

    let server = MockServer::start().await;
    let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXTINF:10,\nseg-0.ts\n";
    Mock::given(method("GET"))
        .and(path("/ace/manifest.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(playlist))
        .mount(&server)
        .await;

    let upstream = ReqwestHlsUpstream::new().expect("client builds");
    let url = format!("{}/ace/manifest.m3u8", server.uri());
    let body = upstream.fetch_manifest(&url).await.expect("manifest fetch succeeds");

    assert_eq!(body, playlist);
}
