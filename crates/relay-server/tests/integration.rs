//! End-to-end: a bound server driven by the real client over HTTP.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_client::{
    BuiltinExecutor, ClientConfig, ConnectionConfig, ConnectionManager, ConnectionState, RelayApi,
    RelayClient, SseTransport, ToolExecutor, TransportKind,
};
use relay_core::{ExecutionError, RequestId, SessionCode, StreamEvent, ToolManifest, ToolRequest};
use relay_queue::MemoryStore;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::ClientSettings;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

async fn boot() -> (RelayServer, String) {
    boot_with(ServerConfig {
        queue_poll_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    })
    .await
}

async fn boot_with(config: ServerConfig) -> (RelayServer, String) {
    let server = RelayServer::new(config, Arc::new(MemoryStore::new()));
    let (addr, _serving) = server.listen().await.unwrap();
    (server, format!("http://{addr}"))
}

fn code() -> SessionCode {
    SessionCode::parse("ABCD2345").unwrap()
}

fn client_config(base_url: &str, transport: TransportKind) -> ClientConfig {
    let mut settings = ClientSettings {
        base_url: base_url.to_owned(),
        ..ClientSettings::default()
    };
    settings.batch.max_batch_delay_ms = 20;
    let mut config = ClientConfig::from_settings(&settings, code()).unwrap();
    config.transport = transport;
    config.connection.poll_interval = Duration::from_millis(50);
    config
}

fn spawn_client(client: Arc<RelayClient>) -> (CancellationToken, JoinHandle<()>) {
    let token = CancellationToken::new();
    let run_token = token.clone();
    let handle = tokio::spawn(async move {
        client.run(run_token).await.unwrap();
    });
    (token, handle)
}

/// Counts executions per request.
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicU32,
    seen: Mutex<Vec<RequestId>>,
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, request: &ToolRequest) -> Result<Value, ExecutionError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.id.clone());
        Ok(json!({ "call": request.id }))
    }

    fn manifest(&self) -> ToolManifest {
        ToolManifest::default()
    }
}

#[tokio::test]
async fn request_round_trip_over_stream() {
    let (server, url) = boot().await;
    let api = RelayApi::new(url.clone());
    let session = api.create_session(Some(&code())).await.unwrap();
    assert_eq!(session.code, code());

    let client = Arc::new(RelayClient::new(
        client_config(&url, TransportKind::Stream),
        Arc::new(BuiltinExecutor),
    ));
    let (token, handle) = spawn_client(client);

    let id = api.enqueue(&code(), None, "echo", json!({"x": 1})).await.unwrap();
    let response = api
        .get_response(&code(), &id, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("response within the wait");
    assert!(response.is_success());
    assert_eq!(response.request_id, id);

    // the manifest is published asynchronously after attach
    let manifest = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let metadata = reqwest::get(format!("{url}/api/sessions/ABCD2345/metadata"))
                .await
                .unwrap();
            assert_eq!(metadata.status(), 200);
            let manifest: ToolManifest = metadata.json().await.unwrap();
            if !manifest.tools.is_empty() {
                return manifest;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert!(manifest.tools.iter().any(|t| t.name == "echo"));

    token.cancel();
    handle.await.unwrap();
    server.shutdown().trigger();
}

#[tokio::test]
async fn request_round_trip_over_polling() {
    let (server, url) = boot().await;
    let api = RelayApi::new(url.clone());
    let _ = api.create_session(Some(&code())).await.unwrap();

    let client = Arc::new(RelayClient::new(
        client_config(&url, TransportKind::Poll),
        Arc::new(BuiltinExecutor),
    ));
    let (token, handle) = spawn_client(client);

    let id = api.enqueue(&code(), None, "noop", json!({})).await.unwrap();
    let response = api
        .get_response(&code(), &id, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("response within the wait");
    assert!(response.is_success());

    token.cancel();
    handle.await.unwrap();
    server.shutdown().trigger();
}

#[tokio::test]
async fn redelivered_request_executes_once() {
    let (server, url) = boot().await;
    let api = RelayApi::new(url.clone());
    let _ = api.create_session(Some(&code())).await.unwrap();

    let executor = Arc::new(CountingExecutor::default());
    let client = Arc::new(RelayClient::new(
        client_config(&url, TransportKind::Stream),
        executor.clone(),
    ));
    let (token, handle) = spawn_client(client);

    let id = RequestId::from("dup-1");
    let _ = api.enqueue(&code(), Some(&id), "noop", json!({})).await.unwrap();
    let _ = api.enqueue(&code(), Some(&id), "noop", json!({})).await.unwrap();
    let response = api
        .get_response(&code(), &id, Duration::from_secs(5))
        .await
        .unwrap()
        .expect("response within the wait");
    assert_eq!(response.request_id, id);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    token.cancel();
    handle.await.unwrap();
    server.shutdown().trigger();
}

#[tokio::test]
async fn stream_delivers_queued_requests_in_order() {
    let (server, url) = boot().await;
    let api = RelayApi::new(url.clone());
    let _ = api.create_session(Some(&code())).await.unwrap();
    for id in ["r1", "r2", "r3"] {
        let _ = api
            .enqueue(&code(), Some(&RequestId::from(id)), "noop", json!({}))
            .await
            .unwrap();
    }

    let transport = Arc::new(SseTransport::new(api.clone(), code()));
    let manager = ConnectionManager::new(ConnectionConfig::default(), transport);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _ = manager.on_message(Arc::new(move |event: &StreamEvent| {
        if let StreamEvent::ToolRequest(request) = event {
            sink.lock().push(request.id.to_string());
        }
    }));

    manager.connect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
    tokio::time::timeout(Duration::from_secs(5), async {
        while received.lock().len() < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*received.lock(), ["r1", "r2", "r3"]);

    manager.disconnect();
    assert_eq!(manager.armed_timers(), 0);
    server.shutdown().trigger();
}

#[tokio::test]
async fn unknown_session_stream_is_rejected() {
    let (server, url) = boot().await;
    let api = RelayApi::new(url);
    let transport = Arc::new(SseTransport::new(api, code()));
    let manager = ConnectionManager::new(ConnectionConfig::default(), transport);

    let err = manager.connect().await.unwrap_err();
    assert_eq!(err.status, Some(401));
    assert!(manager.has_given_up());
    server.shutdown().trigger();
}

#[tokio::test]
async fn idle_client_keeps_its_stream_past_idle_timeout() {
    let (server, url) = boot_with(ServerConfig {
        queue_poll_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(300),
        idle_timeout: Duration::from_secs(1),
        ..ServerConfig::default()
    })
    .await;
    let api = RelayApi::new(url.clone());
    let _ = api.create_session(Some(&code())).await.unwrap();

    let client = Arc::new(RelayClient::new(
        client_config(&url, TransportKind::Stream),
        Arc::new(BuiltinExecutor),
    ));
    let (token, handle) = spawn_client(client);

    let first = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(conn) = server.registry().session_connections(&code()).pop() {
                return conn.id.clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    // three idle timeouts with no tool traffic
    tokio::time::sleep(Duration::from_millis(3500)).await;
    let open: Vec<_> = server
        .registry()
        .session_connections(&code())
        .into_iter()
        .map(|conn| conn.id.clone())
        .collect();
    assert_eq!(open, [first]);

    token.cancel();
    handle.await.unwrap();
    server.shutdown().trigger();
}

#[tokio::test]
async fn drain_closes_open_streams() {
    let (server, url) = boot().await;
    let api = RelayApi::new(url.clone());
    let _ = api.create_session(Some(&code())).await.unwrap();

    let transport = Arc::new(SseTransport::new(api, code()));
    let manager = ConnectionManager::new(ConnectionConfig::default(), transport);
    manager.connect().await.unwrap();
    assert_eq!(server.registry().connection_count(), 1);

    let report = server.drain(Vec::new()).await;
    assert_eq!(report.streams_open, 0);
    assert!(report.is_clean());
    manager.disconnect();
}
