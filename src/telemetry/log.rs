use std::collections::VecDeque;

use chrono::Utc;

use crate::types::{Event, EventKind};

/// Bounded ring buffer of the last `CAPACITY` events (spec section 3's
/// `EventLog`). Single-writer: every component logs through `EventLog::push`
/// (or the `log_*` helpers below), the publisher task only ever reads it.
pub const CAPACITY: usize = 500;

#[derive(Debug, Default)]
pub struct EventLog {
    buf: VecDeque<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { buf: VecDeque::with_capacity(CAPACITY) }
    }

    pub fn push(&mut self, kind: EventKind, message: impl Into<String>) {
        let message = message.into();
        eprintln!("[{}] {}", tag(kind), message);
        if self.buf.len() == CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(Event { t: Utc::now().timestamp_millis(), kind, message });
    }

    pub fn entries(&self) -> impl Iterator<Item = &Event> {
        self.buf.iter()
    }
}

fn tag(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Info => "INFO",
        EventKind::Signal => "SIG",
        EventKind::Buy => "BUY",
        EventKind::Sell => "SELL",
        EventKind::Warn => "WARN",
        EventKind::Error => "ERROR",
    }
}
