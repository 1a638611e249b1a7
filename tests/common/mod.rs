//! Shared utilities for broker integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use hookbroker::broker::{ClientFrame, ServerFrame};
use hookbroker::config::{AuditConfig, BrokerConfig, ListenerConfig};
use hookbroker::hooks::{
    AuditHook, AuditSink, ClientInfo, ConnectRequest, DisconnectReason, EventKind, Hook, HookError,
    KindSet, Message, Subscription,
};

pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Config with a single ephemeral TCP listener `t1`.
pub fn test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.listeners = vec![ListenerConfig {
        id: "t1".into(),
        address: "127.0.0.1:0".into(),
        ..ListenerConfig::default()
    }];
    config.shutdown.grace_period_secs = Some(5);
    config.hooks.stats = false;
    config
}

/// A JSON-line client speaking the broker protocol.
pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    pub async fn open(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    /// Open a connection and perform the connect handshake.
    pub async fn connect(addr: &str, client_id: &str) -> (Self, ServerFrame) {
        let mut client = Self::open(addr).await;
        client
            .send(&ClientFrame::Connect {
                client_id: client_id.into(),
                username: None,
                clean: true,
            })
            .await;
        let connack = client.recv().await;
        (client, connack)
    }

    pub async fn send(&mut self, frame: &ClientFrame) {
        let mut line = serde_json::to_string(frame).unwrap();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Next frame from the broker; panics on timeout or EOF.
    pub async fn recv(&mut self) -> ServerFrame {
        self.try_recv().await.expect("connection closed")
    }

    /// Next frame, or `None` once the broker closed the connection.
    pub async fn try_recv(&mut self) -> Option<ServerFrame> {
        let mut line = String::new();
        let read = tokio::time::timeout(FRAME_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for frame")
            .unwrap_or(0);
        if read == 0 {
            return None;
        }
        Some(serde_json::from_str(line.trim_end()).unwrap())
    }

    /// Wait until the broker closes the connection, skipping pending frames.
    pub async fn closed(&mut self) {
        while self.try_recv().await.is_some() {}
    }
}

/// Records audit lines in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

/// A sink that rejects every line.
pub struct FailingSink;

impl AuditSink for FailingSink {
    fn write_line(&self, _line: &str) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
    }
}

pub fn memory_audit() -> (Arc<AuditHook>, MemorySink) {
    let sink = MemorySink::default();
    let hook = AuditHook::with_sink(&AuditConfig::default(), sink.clone());
    (Arc::new(hook), sink)
}

/// One observed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Started,
    Stopped,
    Connect(String),
    Disconnect {
        client: String,
        reason: DisconnectReason,
        expire: bool,
    },
    Subscribed(String, Vec<u8>),
    Unsubscribed(String, Vec<String>),
    Published(String, String),
}

/// Records every notification it receives.
pub struct RecordingHook {
    id: String,
    seen: Mutex<Vec<Seen>>,
    stopped: AtomicBool,
}

impl RecordingHook {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            seen: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Whether the registry called `stop` on this hook.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<Seen> {
        self.seen()
            .into_iter()
            .filter(|s| matches!(s, Seen::Disconnect { .. }))
            .collect()
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }
}

impl Hook for RecordingHook {
    fn id(&self) -> &str {
        &self.id
    }

    fn provides(&self) -> KindSet {
        KindSet::of(&[
            EventKind::Started,
            EventKind::Stopped,
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::Subscribed,
            EventKind::Unsubscribed,
            EventKind::Published,
        ])
    }

    fn stop(&self) -> Result<(), HookError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_started(&self) {
        self.push(Seen::Started);
    }

    fn on_stopped(&self) {
        self.push(Seen::Stopped);
    }

    fn on_connect(&self, client: &ClientInfo, _connect: &ConnectRequest) {
        self.push(Seen::Connect(client.id.clone()));
    }

    fn on_disconnect(&self, client: &ClientInfo, reason: &DisconnectReason, expire: bool) {
        self.push(Seen::Disconnect {
            client: client.id.clone(),
            reason: reason.clone(),
            expire,
        });
    }

    fn on_subscribed(&self, client: &ClientInfo, _subscriptions: &[Subscription], reason_codes: &[u8]) {
        self.push(Seen::Subscribed(client.id.clone(), reason_codes.to_vec()));
    }

    fn on_unsubscribed(&self, client: &ClientInfo, filters: &[String]) {
        self.push(Seen::Unsubscribed(client.id.clone(), filters.to_vec()));
    }

    fn on_published(&self, client: &ClientInfo, message: &Message) {
        self.push(Seen::Published(client.id.clone(), message.topic.clone()));
    }
}

/// Poll `check` until it holds or the frame timeout elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + FRAME_TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
