use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::telemetry::log::EventLog;
use crate::types::{ClosedTrade, Position, Tick, Window};

/// Process-scoped singletons (spec section 9's "Global state" note): the
/// registry, positions, stats-source (closed trades), and event log. Each
/// lives behind exactly one lock, matching spec section 5's "Shared
/// resources" paragraph — the registry task is the sole writer of the
/// registry map, the strategy/exit tasks are the sole writers of positions,
/// the publisher task only ever reads.
#[derive(Clone)]
pub struct SharedState {
    pub registry: Arc<RwLock<HashMap<String, Window>>>,
    pub positions: Arc<Mutex<HashMap<String, Position>>>,
    pub closed_trades: Arc<Mutex<Vec<ClosedTrade>>>,
    pub event_log: Arc<Mutex<EventLog>>,
    /// Rolling 1-point-per-second price history, capped at 120 points
    /// (spec 4.F).
    pub price_history: Arc<Mutex<VecDeque<Tick>>>,
}

pub const PRICE_HISTORY_CAPACITY: usize = 120;

impl SharedState {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            positions: Arc::new(Mutex::new(HashMap::new())),
            closed_trades: Arc::new(Mutex::new(Vec::new())),
            event_log: Arc::new(Mutex::new(EventLog::new())),
            price_history: Arc::new(Mutex::new(VecDeque::with_capacity(PRICE_HISTORY_CAPACITY))),
        }
    }

    /// Appends to the rolling price history at at most 1 point/s (spec
    /// 4.F): called on every tick, but samples sharing a wall-clock second
    /// with the last recorded point are dropped rather than queued.
    pub async fn push_price_sample(&self, tick: Tick) {
        let mut hist = self.price_history.lock().await;
        if let Some(last) = hist.back() {
            if tick.t / 1000 == last.t / 1000 {
                return;
            }
        }
        if hist.len() == PRICE_HISTORY_CAPACITY {
            hist.pop_front();
        }
        hist.push_back(tick);
    }

    pub async fn log(&self, kind: crate::types::EventKind, message: impl Into<String>) {
        self.event_log.lock().await.push(kind, message);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
