use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::feed::PriceFeed;
use crate::shared::SharedState;
use crate::stats::{self, Stats};
use crate::types::{Event, Position, Tick, Window};

/// Component F, State Publisher. A read-only JSON-shaped aggregate over the
/// process-scoped singletons, refreshed at a fixed 10 Hz — satisfying spec
/// 4.F's "debounced to <= 10 Hz" without ever blocking a mutator, since this
/// task only ever takes read locks and publishes over a `watch::channel`
/// (consumers that are slow just see the latest value, never back-pressure
/// a producer).
///
/// Grounded on the teacher's `telemetry/writer.rs` single-background-task
/// shape; reshaped here from CSV rows to one JSON snapshot since the
/// dashboard/CLI/WS-broadcast UI itself is out of scope (spec section 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub feed_live: bool,
    pub latest_price: f64,
    pub latest_tick_at: i64,
    pub windows: Vec<Window>,
    pub positions: Vec<Position>,
    pub stats: Stats,
    pub event_log: Vec<Event>,
    pub price_history: Vec<Tick>,
}

const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

pub fn spawn(shared: SharedState, feed: PriceFeed, signal_count: std::sync::Arc<std::sync::atomic::AtomicU64>) -> watch::Receiver<Snapshot> {
    let (tx, rx) = watch::channel(empty_snapshot());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
        loop {
            ticker.tick().await;
            let snapshot = build_snapshot(&shared, &feed, signal_count.load(std::sync::atomic::Ordering::Relaxed)).await;
            if tx.send(snapshot).is_err() {
                break;
            }
        }
    });
    rx
}

async fn build_snapshot(shared: &SharedState, feed: &PriceFeed, signal_count: u64) -> Snapshot {
    let windows: Vec<Window> = {
        let registry = shared.registry.read().await;
        let mut w: Vec<Window> = registry.values().cloned().collect();
        w.sort_by_key(|w| w.end_time);
        w
    };
    let positions: Vec<Position> = shared.positions.lock().await.values().cloned().collect();
    let closed_trades = shared.closed_trades.lock().await.clone();
    let event_log: Vec<Event> = shared.event_log.lock().await.entries().cloned().collect();
    let price_history: Vec<Tick> = shared.price_history.lock().await.iter().cloned().collect();
    let sample = feed.latest();

    Snapshot {
        feed_live: feed.is_live(),
        latest_price: sample.price,
        latest_tick_at: sample.t,
        windows,
        positions,
        stats: stats::compute(&closed_trades, signal_count),
        event_log,
        price_history,
    }
}

fn empty_snapshot() -> Snapshot {
    Snapshot {
        feed_live: false,
        latest_price: 0.0,
        latest_tick_at: 0,
        windows: Vec::new(),
        positions: Vec::new(),
        stats: stats::compute(&[], 0),
        event_log: Vec::new(),
        price_history: Vec::new(),
    }
}
