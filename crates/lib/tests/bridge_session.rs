//! Integration test: a fake bridge sidecar on a local WebSocket drives the supervisor through
//! pairing, a routed message, a recoverable close and a logout.

use futures_util::{SinkExt, StreamExt};
use genie::backend::HttpBackend;
use genie::channels::{CredentialStore, FileCredentialStore, WhatsAppChannel, WhatsAppOutbound};
use genie::config::TriggerWords;
use genie::router::Router;
use genie::supervisor::{Backoff, ConnectionState, Supervisor, SupervisorExit};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER: &str = "15550001111@s.whatsapp.net";
const WAIT: Duration = Duration::from_secs(5);

type Bridge = WebSocketStream<TcpStream>;

async fn accept(listener: &TcpListener) -> Bridge {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("supervisor did not connect")
        .expect("accept");
    tokio_tungstenite::accept_async(stream).await.expect("handshake")
}

async fn recv_json(ws: &mut Bridge) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no frame from supervisor")
            .expect("socket ended")
            .expect("read frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

async fn emit(ws: &mut Bridge, event: Value) {
    ws.send(Message::Text(event.to_string())).await.expect("send frame");
}

fn upsert(text: &str) -> Value {
    json!({
        "type": "messages.upsert",
        "upsertType": "notify",
        "messages": [{
            "key": { "remoteJid": USER, "fromMe": false },
            "message": { "conversation": text }
        }]
    })
}

struct Harness {
    listener: TcpListener,
    supervisor: Supervisor,
    creds: Arc<FileCredentialStore>,
    _auth: tempfile::TempDir,
    _backend: MockServer,
}

async fn harness() -> Harness {
    let backend_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "reply": "" })))
        .mount(&backend_server)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind bridge");
    let bridge_url = format!("ws://{}/ws", listener.local_addr().expect("local_addr"));

    let auth = tempfile::tempdir().expect("tempdir");
    let creds = Arc::new(FileCredentialStore::new(auth.path()));
    let outbound = WhatsAppOutbound::new(Duration::from_secs(2));
    let backend = HttpBackend::new(Some(backend_server.uri()), Duration::from_secs(2)).unwrap();
    let router = Arc::new(Router::new(
        TriggerWords::new(Some("start"), Some("stop")).unwrap(),
        Arc::new(backend),
        Arc::new(outbound.clone()),
        Duration::from_secs(2),
    ));
    let supervisor = Supervisor::new(
        WhatsAppChannel::new(bridge_url, outbound),
        creds.clone(),
        router,
        Backoff::new(Duration::from_millis(10), Duration::from_millis(100)),
    );
    Harness {
        listener,
        supervisor,
        creds,
        _auth: auth,
        _backend: backend_server,
    }
}

#[tokio::test]
async fn pairs_routes_and_stops_on_logout() {
    let h = harness().await;
    let mut status = h.supervisor.subscribe();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(h.supervisor.run(shutdown_rx));

    let mut ws = accept(&h.listener).await;
    let start = recv_json(&mut ws).await;
    assert_eq!(start["type"], "start");
    assert!(start["creds"].is_null());

    emit(&mut ws, json!({ "type": "qr", "data": "2@pairing-challenge" })).await;
    tokio::time::timeout(WAIT, status.wait_for(|s| s.qr.is_some()))
        .await
        .expect("qr not published")
        .expect("status channel");
    assert_eq!(status.borrow().qr.as_deref(), Some("2@pairing-challenge"));

    emit(
        &mut ws,
        json!({ "type": "creds.update", "creds": { "me": { "id": "bot@s.whatsapp.net" } } }),
    )
    .await;
    emit(&mut ws, json!({ "type": "connection", "connection": "open" })).await;
    emit(&mut ws, upsert("Start")).await;

    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "send");
    assert_eq!(reply["to"], USER);
    assert!(reply["text"].as_str().unwrap_or("").contains("Welcome"));
    assert_eq!(status.borrow().connection, ConnectionState::Open);
    assert!(status.borrow().qr.is_none());
    assert_eq!(
        h.creds.load().unwrap(),
        Some(json!({ "me": { "id": "bot@s.whatsapp.net" } }))
    );

    emit(
        &mut ws,
        json!({ "type": "connection", "connection": "close", "statusCode": 401 }),
    )
    .await;
    let exit = tokio::time::timeout(WAIT, run)
        .await
        .expect("supervisor did not stop")
        .expect("supervisor task");
    assert_eq!(exit, SupervisorExit::LoggedOut);
    assert_eq!(status.borrow().connection, ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnects_with_saved_credentials_after_close() {
    let h = harness().await;
    let mut status = h.supervisor.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(h.supervisor.run(shutdown_rx));

    let mut first = accept(&h.listener).await;
    assert_eq!(recv_json(&mut first).await["type"], "start");
    emit(
        &mut first,
        json!({ "type": "creds.update", "creds": { "registered": true } }),
    )
    .await;
    emit(&mut first, json!({ "type": "connection", "connection": "open" })).await;
    emit(
        &mut first,
        json!({ "type": "connection", "connection": "close", "statusCode": 428 }),
    )
    .await;

    let mut second = accept(&h.listener).await;
    let start = recv_json(&mut second).await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["creds"], json!({ "registered": true }));

    emit(&mut second, json!({ "type": "connection", "connection": "open" })).await;
    tokio::time::timeout(WAIT, status.wait_for(|s| s.connection == ConnectionState::Open))
        .await
        .expect("second session never opened")
        .expect("status channel");

    shutdown_tx.send(true).expect("send shutdown");
    let exit = tokio::time::timeout(WAIT, run)
        .await
        .expect("supervisor did not stop")
        .expect("supervisor task");
    assert_eq!(exit, SupervisorExit::Shutdown);
    assert_eq!(status.borrow().connection, ConnectionState::Disconnected);
}

#[tokio::test]
async fn unreachable_bridge_keeps_retrying_until_shutdown() {
    let h = harness().await;
    let addr = h.listener.local_addr().expect("local_addr");
    drop(h.listener);
    let mut status = h.supervisor.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(h.supervisor.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_ne!(status.borrow_and_update().connection, ConnectionState::Open);
    assert!(!run.is_finished(), "supervisor gave up on {}", addr);

    shutdown_tx.send(true).expect("send shutdown");
    let exit = tokio::time::timeout(WAIT, run)
        .await
        .expect("supervisor did not stop")
        .expect("supervisor task");
    assert_eq!(exit, SupervisorExit::Shutdown);
}
