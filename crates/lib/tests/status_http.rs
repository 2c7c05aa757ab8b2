//! Integration test: start the gateway on a free port, GET / and /qr, assert the status JSON.
//! No bridge or backend is running; the supervisor keeps retrying in the background. The gateway
//! task is left running when the test ends.

use genie::backend::HttpBackend;
use genie::channels::WhatsAppOutbound;
use genie::config::{Config, Overrides, TriggerWords};
use genie::gateway::{self, StatusState};
use genie::router::Router;
use genie::supervisor::{ConnectionState, SupervisorStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn get_json(url: &str) -> Result<serde_json::Value, String> {
    let resp = reqwest::get(url).await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }
    resp.json().await.map_err(|e| e.to_string())
}

#[tokio::test]
async fn gateway_status_http_responds_with_running() {
    let port = free_port();
    let auth = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.triggers.word = Some("start".to_string());
    config.triggers.end_word = Some("stop".to_string());
    config.status.port = port;
    config.status.bind = "127.0.0.1".to_string();
    config.transport.bridge_url = format!("ws://127.0.0.1:{}/ws", free_port());
    config.transport.auth_dir = Some(auth.path().to_path_buf());
    config.reconnect.initial_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;

    let gateway_handle = tokio::spawn(async move {
        let _ = gateway::run_gateway(config, Overrides::default()).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let mut last_err = None;
    for _ in 0..100 {
        match get_json(&url).await {
            Ok(json) => {
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("activeSessions").and_then(|v| v.as_u64()), Some(0));
                let connection = json.get("connection").and_then(|v| v.as_str());
                assert!(
                    matches!(connection, Some("connecting") | Some("disconnected")),
                    "unexpected connection state {:?}",
                    connection
                );
                let qr = get_json(&format!("http://127.0.0.1:{}/qr", port))
                    .await
                    .expect("GET /qr");
                assert!(qr.get("qr").is_some_and(|v| v.is_null()));
                return;
            }
            Err(e) => last_err = Some(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    gateway_handle.abort();
    panic!(
        "GET {} did not return 200 with status JSON within 5s; last error: {:?}",
        url, last_err
    );
}

#[tokio::test]
async fn qr_endpoint_shows_pending_challenge() {
    let (status_tx, status_rx) = watch::channel(SupervisorStatus {
        connection: ConnectionState::Connecting,
        qr: Some("2@challenge".to_string()),
    });
    let router = Arc::new(Router::new(
        TriggerWords::new(Some("start"), Some("stop")).unwrap(),
        Arc::new(HttpBackend::new(None, Duration::from_secs(1)).unwrap()),
        Arc::new(WhatsAppOutbound::new(Duration::from_millis(10))),
        Duration::from_secs(1),
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(gateway::serve_status(
        listener,
        StatusState::new(status_rx, router),
        async move {
            let _ = stop_rx.await;
        },
    ));

    let json = get_json(&format!("http://{}/qr", addr)).await.expect("GET /qr");
    assert_eq!(json, serde_json::json!({ "qr": "2@challenge" }));
    let json = get_json(&format!("http://{}/", addr)).await.expect("GET /");
    assert_eq!(json["connection"], "connecting");

    status_tx.send_replace(SupervisorStatus {
        connection: ConnectionState::Open,
        qr: None,
    });
    let json = get_json(&format!("http://{}/qr", addr)).await.expect("GET /qr");
    assert!(json["qr"].is_null());
    let json = get_json(&format!("http://{}/", addr)).await.expect("GET /");
    assert_eq!(json["connection"], "open");

    let _ = stop_tx.send(());
    server.await.expect("server task").expect("serve");
}
