//! Audit sinks.
//!
//! Managers hand every committed state change to an [`AuditSink`]. Recording
//! is fire-and-forget: a sink never fails the operation that produced the
//! event, it logs and moves on.

use pmr_core::AuditEvent;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receives audit events after the store has committed them
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes each event as a structured `tracing` record under `pmr::audit`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "pmr::audit",
            entity = %event.entity,
            id = event.entity_id,
            action = %event.action,
            from = event.from_status.as_deref().unwrap_or("-"),
            to = event.to_status.as_deref().unwrap_or("-"),
            actor = %event.actor_id,
            "audit"
        );
    }
}

/// Appends events as JSON lines, e.g. `.pmr/audit.jsonl`.
///
/// `record` only queues the event. A writer task owns the file and appends
/// in arrival order; it stops once every clone of the sink is dropped and
/// the queue is empty.
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl JsonlAuditSink {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> (Self, JoinHandle<()>) {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_lines(path.clone(), rx));
        (Self { path, tx }, writer)
    }
}

async fn write_lines(path: PathBuf, mut rx: mpsc::UnboundedReceiver<AuditEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = append_line(&path, &event).await {
            warn!(path = %path.display(), error = %e, "failed to append audit event");
        }
    }
}

async fn append_line(path: &Path, event: &AuditEvent) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            warn!(path = %self.path.display(), "audit writer stopped; event discarded");
        }
    }
}

/// Forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.tx.send(event).is_err() {
            warn!("audit receiver dropped; event discarded");
        }
    }
}

/// Hands each event to every inner sink in order
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmr_core::{Actor, AuditAction, EntityKind};
    use tempfile::TempDir;

    fn event() -> AuditEvent {
        AuditEvent::new(
            EntityKind::Escalation,
            42,
            AuditAction::Taken,
            &Actor::new("dr-cuddy", "Lisa Cuddy"),
        )
        .transition("PENDING", "IN_REVIEW")
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.record(event());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.entity_id, 42);
        assert_eq!(received.to_status.as_deref(), Some("IN_REVIEW"));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        sink.record(event());
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");
        let (sink, writer) = JsonlAuditSink::spawn(&path);

        sink.record(event());
        sink.record(event());
        drop(sink);
        writer.await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditEvent = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.action, AuditAction::Taken);
    }

    #[tokio::test]
    async fn test_jsonl_sink_is_fail_open() {
        let (sink, writer) = JsonlAuditSink::spawn("/nonexistent-dir/audit.jsonl");
        sink.record(event());
        drop(sink);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let (first, mut rx1) = ChannelAuditSink::new();
        let (second, mut rx2) = ChannelAuditSink::new();
        let fanout = FanoutAuditSink::new()
            .with(Arc::new(first))
            .with(Arc::new(second));

        fanout.record(event());
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }
}
