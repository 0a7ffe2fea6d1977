//! In-process event bus for pool changes.
//!
//! Fire and forget: an event emitted while nobody listens is gone. Views must
//! never depend on delivery; refocus always refetches.
//!
//! Events can also be mirrored as JSON lines to stdout or a file.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::error::{Error, Result};

pub const EVENT_SCHEMA_VERSION: &str = "taskpool.event.v1";

/// Default number of undelivered events a slow listener may fall behind by.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Assigned,
    Unassigned,
    Verified,
    PoolUpdated,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Assigned,
        EventKind::Unassigned,
        EventKind::Verified,
        EventKind::PoolUpdated,
    ];
}

/// A pool change, always tagged with the dependent it touched.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolEvent {
    pub schema_version: &'static str,
    pub event: EventKind,
    pub dependent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PoolEvent {
    pub fn new(event: EventKind, dependent_id: impl Into<String>) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            dependent_id: dependent_id.into(),
            assignment_id: None,
            timestamp: Utc::now(),
            data: None,
        }
    }

    pub fn for_assignment(mut self, assignment_id: impl Into<String>) -> Self {
        self.assignment_id = Some(assignment_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Injectable publish/subscribe channel. Clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PoolEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to whoever is listening right now. Returns the listener count.
    pub fn emit(&self, event: PoolEvent) -> usize {
        tracing::debug!(
            event = ?event.event,
            dependent = %event.dependent_id,
            "emit pool event"
        );
        self.tx.send(event).unwrap_or(0)
    }

    /// Listen for the given kinds. An empty slice listens for everything.
    pub fn listen(&self, kinds: &[EventKind]) -> EventListener {
        EventListener {
            rx: self.tx.subscribe(),
            kinds: kinds.iter().copied().collect(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// What a non-blocking drain found.
#[derive(Debug, Default)]
pub struct Drained {
    pub events: Vec<PoolEvent>,
    /// Events were dropped because this listener fell behind.
    pub lagged: bool,
}

impl Drained {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && !self.lagged
    }
}

/// Receiving half of a bus subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventListener {
    rx: broadcast::Receiver<PoolEvent>,
    kinds: HashSet<EventKind>,
}

impl EventListener {
    fn wants(&self, event: &PoolEvent) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&event.event)
    }

    /// Take everything queued without waiting.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.wants(&event) {
                        drained.events.push(event);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                    drained.lagged = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        drained
    }

    /// Wait for the next matching event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<PoolEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event listener lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// Event sink that writes JSONL output to a destination.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    /// Emit events to stdout.
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Emit events to a file, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    /// Write a single event as JSONL.
    pub fn emit(&mut self, event: &PoolEvent) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }

    /// Write everything the listener has queued. Returns the number written.
    pub fn forward(&mut self, listener: &mut EventListener) -> Result<usize> {
        let drained = listener.drain();
        for event in &drained.events {
            self.emit(event)?;
        }
        Ok(drained.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_listeners_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(PoolEvent::new(EventKind::Assigned, "kid-a")), 0);

        let mut listener = bus.listen(&[]);
        assert!(listener.drain().is_empty());
    }

    #[test]
    fn listener_filters_by_kind() {
        let bus = EventBus::default();
        let mut verified = bus.listen(&[EventKind::Verified]);
        let mut everything = bus.listen(&[]);

        bus.emit(PoolEvent::new(EventKind::Assigned, "kid-a"));
        bus.emit(PoolEvent::new(EventKind::Verified, "kid-a").for_assignment("asg-1"));

        let got = verified.drain();
        assert_eq!(got.events.len(), 1);
        assert_eq!(got.events[0].assignment_id.as_deref(), Some("asg-1"));
        assert_eq!(everything.drain().events.len(), 2);
    }

    #[test]
    fn slow_listener_reports_lag() {
        let bus = EventBus::new(2);
        let mut listener = bus.listen(&[]);
        for _ in 0..5 {
            bus.emit(PoolEvent::new(EventKind::PoolUpdated, "kid-a"));
        }
        let drained = listener.drain();
        assert!(drained.lagged);
        assert_eq!(drained.events.len(), 2);
    }

    #[test]
    fn sink_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let bus = EventBus::default();
        let mut listener = bus.listen(&[]);
        bus.emit(
            PoolEvent::new(EventKind::Unassigned, "kid-a")
                .with_data(serde_json::json!({ "status": "unassigned" })),
        );

        let mut sink = EventDestination::File(path.clone()).open().expect("sink");
        assert_eq!(sink.forward(&mut listener).expect("forward"), 1);

        let written = std::fs::read_to_string(&path).expect("read");
        let value: serde_json::Value =
            serde_json::from_str(written.lines().next().expect("line")).expect("json");
        assert_eq!(value["event"], "unassigned");
        assert_eq!(value["schema_version"], EVENT_SCHEMA_VERSION);
        assert_eq!(value["data"]["status"], "unassigned");
    }

    #[tokio::test]
    async fn recv_skips_unwanted_kinds() {
        let bus = EventBus::default();
        let mut listener = bus.listen(&[EventKind::Unassigned]);
        bus.emit(PoolEvent::new(EventKind::Assigned, "kid-a"));
        bus.emit(PoolEvent::new(EventKind::Unassigned, "kid-b"));
        let event = listener.recv().await.expect("event");
        assert_eq!(event.dependent_id, "kid-b");
    }
}
