//! End-to-end tests for streaming a log file over WebSocket.
//!
//! These tests run the real router and change watcher against a temporary log
//! file and connect with a WebSocket client:
//! - A new client receives the recent lines first
//! - Appended lines arrive as deltas, capped to the line limit
//! - Every client receives the same deltas
//! - Disconnected clients are removed from the hub

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use logtail_server::config::Config;
use logtail_server::engine::TailEngine;
use logtail_server::routes::{create_router, AppState};
use logtail_server::watcher::ChangeWatcher;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    path: PathBuf,
    engine: Arc<TailEngine>,
    watcher: ChangeWatcher,
    server: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.watcher.abort();
        self.server.abort();
    }
}

/// Writes `content` to a fresh log file and serves it on a random port.
async fn spawn_test_server(content: &str) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs.txt");
    fs::write(&path, content).unwrap();

    let config = Config {
        log_file: path.clone(),
        port: 0,
        rewatch_interval: Duration::from_millis(50),
        ..Config::default()
    };

    let engine = Arc::new(TailEngine::open(&path, config.tail).await.unwrap());
    let watcher = ChangeWatcher::spawn(Arc::clone(&engine), config.rewatch_interval).unwrap();
    let state = AppState::new(config, Arc::clone(&engine), watcher.subscribe_state());
    let app = create_router(state);

    // Bind to port 0 to get a random available port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        path,
        engine,
        watcher,
        server,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _response) = tokio_test::assert_ok!(connect_async(format!("ws://{addr}/ws")).await);
    client
}

/// Waits for the next text message, skipping control frames.
async fn next_text(client: &mut Client) -> String {
    loop {
        let msg = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("websocket error");

        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(path)
        .expect("Failed to open log");
    file.write_all(content.as_bytes()).expect("Failed to append");
    file.sync_all().expect("Failed to sync");
}

async fn wait_for_subscribers(engine: &TailEngine, expected: usize) {
    timeout(WAIT, async {
        while engine.hub().subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn client_receives_snapshot_then_deltas() {
    let server = spawn_test_server("a\nb\nc\n").await;
    let mut client = connect(server.addr).await;

    assert_eq!(next_text(&mut client).await, "a\n\nb\n\nc");

    append(&server.path, "d\n");
    assert_eq!(next_text(&mut client).await, "d");

    let burst: String = ('e'..='o').map(|c| format!("{c}\n")).collect();
    append(&server.path, &burst);
    assert_eq!(
        next_text(&mut client).await,
        "f\n\ng\n\nh\n\ni\n\nj\n\nk\n\nl\n\nm\n\nn\n\no"
    );

    assert_eq!(server.engine.cursor(), fs::metadata(&server.path).unwrap().len());
}

#[tokio::test]
async fn every_client_receives_the_same_delta() {
    let server = spawn_test_server("start\n").await;
    let mut first = connect(server.addr).await;
    let mut second = connect(server.addr).await;

    assert_eq!(next_text(&mut first).await, "start");
    assert_eq!(next_text(&mut second).await, "start");
    assert_eq!(server.engine.hub().subscriber_count(), 2);

    append(&server.path, "shared\n");

    assert_eq!(next_text(&mut first).await, "shared");
    assert_eq!(next_text(&mut second).await, "shared");
}

#[tokio::test]
async fn empty_log_sends_no_snapshot() {
    let server = spawn_test_server("").await;
    let mut client = connect(server.addr).await;
    wait_for_subscribers(&server.engine, 1).await;

    append(&server.path, "first line\n");

    // The first message is the delta, not an empty snapshot.
    assert_eq!(next_text(&mut client).await, "first line");
}

#[tokio::test]
async fn disconnected_client_is_removed() {
    let server = spawn_test_server("x\n").await;
    let mut staying = connect(server.addr).await;
    let mut leaving = connect(server.addr).await;

    next_text(&mut staying).await;
    next_text(&mut leaving).await;
    assert_eq!(server.engine.hub().subscriber_count(), 2);

    leaving.send(Message::Close(None)).await.unwrap();
    drop(leaving);
    wait_for_subscribers(&server.engine, 1).await;

    append(&server.path, "after\n");
    assert_eq!(next_text(&mut staying).await, "after");
}

#[tokio::test]
async fn client_messages_are_ignored() {
    let server = spawn_test_server("hello\n").await;
    let mut client = connect(server.addr).await;
    assert_eq!(next_text(&mut client).await, "hello");

    client
        .send(Message::Text("ignored".into()))
        .await
        .unwrap();

    append(&server.path, "world\n");
    assert_eq!(next_text(&mut client).await, "world");
    assert_eq!(server.engine.hub().subscriber_count(), 1);
}
