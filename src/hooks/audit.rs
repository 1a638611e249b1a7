//! Audit hook: one human-readable line per observed event.
//!
//! # Responsibilities
//! - Render connect, disconnect, subscribe, unsubscribe and publish records
//! - Write them to a pluggable sink
//! - Contain sink failures (count + warn, never propagate)

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::event::{ClientInfo, ConnectRequest, DisconnectReason, EventKind, KindSet, Message, Subscription};
use super::Hook;

pub use crate::config::schema::{AuditConfig, AuditSinkConfig};

const AUDIT_KINDS: KindSet = KindSet::of(&[
    EventKind::Connect,
    EventKind::Disconnect,
    EventKind::Subscribed,
    EventKind::Unsubscribed,
    EventKind::Published,
]);

/// Destination for rendered audit lines.
pub trait AuditSink: Send + Sync {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Sends lines to the tracing subscriber under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        tracing::info!(target: "audit", "{}", line);
        Ok(())
    }
}

/// Writes lines to any `Write` (stdout, an append-mode file).
pub struct WriterSink {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl WriterSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Open `path` for appending, creating it if needed.
    pub fn append_file(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl AuditSink for WriterSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "audit writer poisoned"))?;
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

/// Logs every observed event as a text line.
pub struct AuditHook {
    sink: Box<dyn AuditSink>,
    show_payload: bool,
    max_payload_bytes: usize,
    sink_errors: AtomicU64,
}

impl AuditHook {
    /// Audit hook writing to the tracing subscriber.
    pub fn new(config: &AuditConfig) -> Self {
        Self::with_sink(config, LogSink)
    }

    pub fn with_sink(config: &AuditConfig, sink: impl AuditSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            show_payload: config.show_payload,
            max_payload_bytes: config.max_payload_bytes,
            sink_errors: AtomicU64::new(0),
        }
    }

    /// Build the hook with the sink named in `config`.
    pub fn from_config(config: &AuditConfig) -> io::Result<Self> {
        Ok(match &config.sink {
            AuditSinkConfig::Log => Self::new(config),
            AuditSinkConfig::Stdout => Self::with_sink(config, WriterSink::stdout()),
            AuditSinkConfig::File { path } => {
                Self::with_sink(config, WriterSink::append_file(Path::new(path))?)
            }
        })
    }

    /// Number of lines the sink failed to accept.
    pub fn sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }

    fn emit(&self, line: String) {
        if let Err(e) = self.sink.write_line(&line) {
            let failures = self.sink_errors.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(error = %e, failures, "Audit sink write failed");
        }
    }

    fn render_payload(&self, payload: &[u8]) -> String {
        if !self.show_payload {
            return String::new();
        }
        let shown = &payload[..payload.len().min(self.max_payload_bytes)];
        let mut text = String::from_utf8_lossy(shown).into_owned();
        if shown.len() < payload.len() {
            text.push_str("...");
        }
        format!(" payload={:?}", text)
    }
}

impl Hook for AuditHook {
    fn id(&self) -> &str {
        "audit-log"
    }

    fn provides(&self) -> KindSet {
        AUDIT_KINDS
    }

    fn on_connect(&self, client: &ClientInfo, _connect: &ConnectRequest) {
        self.emit(format!(
            "[CONNECT] client={} remote={} listener={} username={}",
            client.id,
            client.remote,
            client.listener,
            client.username.as_deref().unwrap_or("-")
        ));
    }

    fn on_disconnect(&self, client: &ClientInfo, reason: &DisconnectReason, expire: bool) {
        self.emit(format!(
            "[DISCONNECT] client={} remote={} reason={:?} expire={}",
            client.id,
            client.remote,
            reason.to_string(),
            expire
        ));
    }

    fn on_subscribed(&self, client: &ClientInfo, subscriptions: &[Subscription], reason_codes: &[u8]) {
        for (i, sub) in subscriptions.iter().enumerate() {
            let code = reason_codes.get(i).copied().unwrap_or(sub.qos);
            self.emit(format!(
                "[SUBSCRIBE] client={} filter={} qos={} code=0x{:02x}",
                client.id, sub.filter, sub.qos, code
            ));
        }
    }

    fn on_unsubscribed(&self, client: &ClientInfo, filters: &[String]) {
        for filter in filters {
            self.emit(format!("[UNSUBSCRIBE] client={} filter={}", client.id, filter));
        }
    }

    fn on_published(&self, client: &ClientInfo, message: &Message) {
        self.emit(format!(
            "[PUBLISH] client={} topic={} qos={} retain={} size={}{}",
            client.id,
            message.topic,
            message.qos,
            message.retain,
            message.payload.len(),
            self.render_payload(&message.payload)
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionId;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Lines(Arc<Mutex<Vec<String>>>);

    impl AuditSink for Lines {
        fn write_line(&self, line: &str) -> io::Result<()> {
            self.0.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl AuditSink for Broken {
        fn write_line(&self, _line: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone"))
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            id: "dev-1".into(),
            remote: "10.0.0.5:51000".into(),
            listener: "t1".into(),
            connection: ConnectionId::new(),
            username: None,
        }
    }

    #[test]
    fn connect_line_names_client_and_remote() {
        let lines = Lines::default();
        let hook = AuditHook::with_sink(&AuditConfig::default(), lines.clone());
        hook.on_connect(&client(), &ConnectRequest::default());

        let lines = lines.0.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("[CONNECT]"));
        assert!(lines[0].contains("dev-1"));
        assert!(lines[0].contains("10.0.0.5:51000"));
    }

    #[test]
    fn subscribe_renders_one_line_per_filter_in_order() {
        let lines = Lines::default();
        let hook = AuditHook::with_sink(&AuditConfig::default(), lines.clone());
        let subs = vec![
            Subscription { filter: "sensors/+".into(), qos: 0 },
            Subscription { filter: "alerts/#".into(), qos: 1 },
        ];
        hook.on_subscribed(&client(), &subs, &[0, 1]);

        let lines = lines.0.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("filter=sensors/+ qos=0"));
        assert!(lines[1].contains("filter=alerts/# qos=1"));
    }

    #[test]
    fn payload_is_truncated() {
        let lines = Lines::default();
        let config = AuditConfig {
            max_payload_bytes: 4,
            ..AuditConfig::default()
        };
        let hook = AuditHook::with_sink(&config, lines.clone());
        let message = Message {
            topic: "a/b".into(),
            payload: b"hello world".to_vec(),
            qos: 1,
            retain: false,
        };
        hook.on_published(&client(), &message);

        let lines = lines.0.lock().unwrap();
        assert!(lines[0].contains("size=11"));
        assert!(lines[0].contains("payload=\"hell...\""));
    }

    #[test]
    fn hidden_payload_reports_size_only() {
        let lines = Lines::default();
        let config = AuditConfig {
            show_payload: false,
            ..AuditConfig::default()
        };
        let hook = AuditHook::with_sink(&config, lines.clone());
        let message = Message {
            topic: "a/b".into(),
            payload: b"secret".to_vec(),
            qos: 0,
            retain: false,
        };
        hook.on_published(&client(), &message);

        let lines = lines.0.lock().unwrap();
        assert!(lines[0].contains("size=6"));
        assert!(!lines[0].contains("secret"));
    }

    #[test]
    fn sink_failures_are_counted_not_raised() {
        let hook = AuditHook::with_sink(&AuditConfig::default(), Broken);
        hook.on_connect(&client(), &ConnectRequest::default());
        hook.on_disconnect(&client(), &DisconnectReason::ConnectionLost, false);
        assert_eq!(hook.sink_errors(), 2);
    }

    #[test]
    fn writer_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = WriterSink::append_file(&path).unwrap();
        sink.write_line("one").unwrap();
        sink.write_line("two").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }
}
