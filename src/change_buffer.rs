//! Debounced filesystem-change aggregator. §4.7
//!
//! `Idle -> Buffering -> Flushing -> Idle`. Modeled per §9 as a state machine
//! owning its own debounce timer rather than a callback-driven timer thread.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Buffering,
    Flushing,
}

#[derive(Debug, Default)]
pub struct FlushBatch {
    pub deletes: Vec<PathBuf>,
    pub creates_or_updates: Vec<PathBuf>,
}

pub struct ChangeBuffer {
    state: State,
    debounce: Duration,
    max_buffer_size: usize,
    max_wait: Duration,
    pending: HashMap<PathBuf, ChangeEvent>,
    oldest_at: Option<Instant>,
}

impl ChangeBuffer {
    pub fn new(debounce_ms: u64, max_buffer_size: usize, max_wait_ms: u64) -> Self {
        Self {
            state: State::Idle,
            debounce: Duration::from_millis(debounce_ms),
            max_buffer_size,
            max_wait: Duration::from_millis(max_wait_ms),
            pending: HashMap::new(),
            oldest_at: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accept one event, coalescing with anything already buffered for that
    /// path. Returns `true` if the caller should flush immediately (buffer
    /// full or oldest event has exceeded `max_wait_ms`); otherwise the caller
    /// should (re)schedule a flush after `debounce_ms`.
    pub fn push(&mut self, event: ChangeEvent) -> bool {
        if self.state == State::Idle {
            self.state = State::Buffering;
        }
        if self.oldest_at.is_none() {
            self.oldest_at = Some(event.at);
        }

        match self.pending.remove(&event.path) {
            Some(prior) => {
                if let Some(merged) = coalesce(prior.kind, event.kind) {
                    self.pending.insert(event.path.clone(), ChangeEvent { kind: merged, path: event.path, at: event.at });
                }
                // `None` means drop both (create-then-delete cancels out).
            }
            None => {
                self.pending.insert(event.path.clone(), event);
            }
        }

        let buffer_full = self.pending.len() >= self.max_buffer_size;
        let too_old = self.oldest_at.map(|t| t.elapsed() >= self.max_wait).unwrap_or(false);
        buffer_full || too_old
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Move to Flushing, drain the buffer into a `{deletes, creates_or_updates}`
    /// batch, and return to Idle. The buffer is always cleared, even if the
    /// caller's callback fails — that failure is the caller's concern.
    pub fn flush(&mut self) -> FlushBatch {
        self.state = State::Flushing;
        let mut batch = FlushBatch::default();
        for (path, event) in self.pending.drain() {
            match event.kind {
                ChangeKind::Delete => batch.deletes.push(path),
                ChangeKind::Create | ChangeKind::Update => batch.creates_or_updates.push(path),
            }
        }
        self.oldest_at = None;
        self.state = State::Idle;
        batch
    }
}

/// `(final, incoming) -> merged`. `None` means both are dropped.
fn coalesce(prior: ChangeKind, incoming: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (prior, incoming) {
        (Create, Delete) => None,
        (_, Update) => Some(incoming),
        (Delete, Create) => Some(Update),
        (Update, Delete) => Some(Delete),
        (_, other) => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: ChangeKind, path: &str) -> ChangeEvent {
        ChangeEvent { kind, path: PathBuf::from(path), at: Instant::now() }
    }

    #[test]
    fn create_then_delete_drops_both() {
        let mut buf = ChangeBuffer::new(500, 50, 5000);
        buf.push(ev(ChangeKind::Create, "p"));
        buf.push(ev(ChangeKind::Delete, "p"));
        let batch = buf.flush();
        assert!(batch.deletes.is_empty());
        assert!(batch.creates_or_updates.is_empty());
    }

    #[test]
    fn scenario_6_create_update_update_delete_flushes_single_delete() {
        let mut buf = ChangeBuffer::new(500, 50, 5000);
        buf.push(ev(ChangeKind::Create, "p"));
        buf.push(ev(ChangeKind::Update, "p"));
        buf.push(ev(ChangeKind::Update, "p"));
        buf.push(ev(ChangeKind::Delete, "p"));
        let batch = buf.flush();
        assert_eq!(batch.deletes, vec![PathBuf::from("p")]);
        assert!(batch.creates_or_updates.is_empty());
    }

    #[test]
    fn delete_then_create_becomes_update() {
        let mut buf = ChangeBuffer::new(500, 50, 5000);
        buf.push(ev(ChangeKind::Delete, "p"));
        buf.push(ev(ChangeKind::Create, "p"));
        let batch = buf.flush();
        assert_eq!(batch.creates_or_updates, vec![PathBuf::from("p")]);
        assert!(batch.deletes.is_empty());
    }

    #[test]
    fn buffer_full_triggers_immediate_flush_signal() {
        let mut buf = ChangeBuffer::new(500, 2, 5000);
        assert!(!buf.push(ev(ChangeKind::Create, "a")));
        assert!(buf.push(ev(ChangeKind::Create, "b")));
    }

    #[test]
    fn flush_returns_buffer_to_idle() {
        let mut buf = ChangeBuffer::new(500, 50, 5000);
        buf.push(ev(ChangeKind::Create, "p"));
        assert!(!buf.is_idle());
        buf.flush();
        assert!(buf.is_idle());
        assert_eq!(buf.pending_len(), 0);
    }
}
