use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::position::PositionManager;
use crate::shared::SharedState;
use crate::telemetry;
use crate::tracker::WindowTracker;
use crate::types::{EventKind, Phase};
use crate::venue::VenueClient;
use crate::{feed, registry};

/// Task wiring for the six canonical tasks of spec section 5. Constructs the
/// shared state, spawns every task, and drives shutdown in the specified
/// cancellation order (`feed -> strategy -> exit -> resolution -> registry
/// -> publisher`), with a 10-second grace window to flush pending
/// telemetry. Grounded on the teacher's `main.rs` spawn/swap shape,
/// generalized from a single-market loop into a many-windows engine.
pub struct Engine {
    shared: SharedState,
    feed_handle: JoinHandle<()>,
    strategy_handle: JoinHandle<()>,
    exit_handle: JoinHandle<()>,
    resolution_handle: JoinHandle<()>,
    registry_handle: JoinHandle<()>,
    publisher_handle: JoinHandle<()>,
}

impl Engine {
    pub async fn start(config: Config, venue: Arc<dyn VenueClient>) -> Self {
        let shared = SharedState::new();
        let (price_feed, feed_handle) = feed::spawn(config.clone(), shared.clone());

        shared.log(EventKind::Info, "engine: waiting for first price tick").await;
        let mut warmup = price_feed.clone();
        let _ = warmup.changed().await;

        let registry_handle = registry::spawn(config.clone(), shared.clone(), venue.clone());

        let position_manager = Arc::new(PositionManager::new(venue.clone(), shared.clone(), config.clone()));
        let tracker = Arc::new(Mutex::new(WindowTracker::new()));
        let signal_count = Arc::new(AtomicU64::new(0));

        let strategy_handle = spawn_strategy_task(
            config.clone(),
            shared.clone(),
            price_feed.clone(),
            tracker.clone(),
            venue.clone(),
            position_manager.clone(),
            signal_count.clone(),
        );

        let exit_handle = spawn_exit_task(config.clone(), shared.clone(), position_manager.clone());
        let resolution_handle = spawn_resolution_task(config.clone(), shared.clone(), venue.clone(), position_manager.clone());

        let publisher_rx = telemetry::spawn(shared.clone(), price_feed.clone(), signal_count.clone());
        let publisher_handle = tokio::spawn(async move {
            let mut rx = publisher_rx;
            while rx.changed().await.is_ok() {}
        });

        Self { shared, feed_handle, strategy_handle, exit_handle, resolution_handle, registry_handle, publisher_handle }
    }

    /// Cancellation order per spec section 5: feed -> strategy -> exit ->
    /// resolution -> registry -> publisher, then a 10s grace window for
    /// pending telemetry to flush. In-flight orders are not cancelled
    /// remotely — the venue keeps them; they become the operator's
    /// responsibility.
    pub async fn shutdown(self) {
        self.shared.log(EventKind::Info, "engine: shutting down").await;
        self.feed_handle.abort();
        self.strategy_handle.abort();
        self.exit_handle.abort();
        self.resolution_handle.abort();
        self.registry_handle.abort();
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.publisher_handle.abort();
    }
}

/// Strategy task (component D's signal-consuming half): the sole mutator of
/// `signal_fired`. Reads ticks from the feed, reads the registry under the
/// shared lock, evaluates the three predicates via the Window Tracker, and
/// on a signal hands off to the Position Manager's entry algorithm.
fn spawn_strategy_task(
    config: Config,
    shared: SharedState,
    mut price_feed: feed::PriceFeed,
    tracker: Arc<Mutex<WindowTracker>>,
    venue: Arc<dyn VenueClient>,
    position_manager: Arc<PositionManager>,
    signal_count: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut prev_phase: HashMap<String, Phase> = HashMap::new();

        loop {
            if price_feed.changed().await.is_err() {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
            let sample = price_feed.latest();
            if sample.t == 0 {
                continue;
            }
            let tick = crate::types::Tick { price: sample.price, t: sample.t };
            let now_ms = tick.t;

            let windows = registry::snapshot(&shared).await;
            let live_slugs: std::collections::HashSet<String> = windows.iter().map(|w| w.slug.clone()).collect();
            tracker.lock().await.prune(&live_slugs);

            for window in &windows {
                let phase = window.phase(now_ms, config.settle_seconds);
                let last_phase = prev_phase.get(&window.slug).copied().unwrap_or(Phase::Waiting);

                {
                    let mut registry = shared.registry.write().await;
                    if let Some(w) = registry.get_mut(&window.slug) {
                        tracker.lock().await.latch_open_price(w, tick, config.settle_seconds);
                    }
                }

                let mut tr = tracker.lock().await;
                tr.observe(window, tick, &config);
                if let Some((up_mid, down_mid)) = late_window_mids(&venue, window, now_ms, &config).await {
                    tr.observe_late_window(window, now_ms, up_mid, down_mid, &config);
                }

                let signal = tr
                    .spike_signal(window, now_ms, &config)
                    .or_else(|| tr.passive_signal(window, last_phase, now_ms, &config))
                    .or_else(|| tr.late_window_signal(window, now_ms, &config));
                drop(tr);

                prev_phase.insert(window.slug.clone(), phase);

                let Some(signal) = signal else { continue };

                // The signal_fired compare-and-set happens here, under the
                // registry write lock, guaranteeing at most one signal per
                // (window, strategy) even with multiple predicates racing
                // on the same tick (spec section 5 ordering guarantee (b)).
                let claimed = {
                    let mut registry = shared.registry.write().await;
                    match registry.get_mut(&window.slug) {
                        Some(w) if !w.has_fired(signal.strategy) => {
                            w.signal_fired.insert(signal.strategy);
                            true
                        }
                        _ => false,
                    }
                };
                if !claimed {
                    continue;
                }

                signal_count.fetch_add(1, Ordering::Relaxed);
                shared
                    .log(EventKind::Signal, format!("{} {} {} @ {:.3}", signal.window_slug, signal.strategy, signal.side, signal.at_price))
                    .await;

                let feed_live = price_feed.is_live();
                if let Err(rejection) =
                    position_manager.try_enter(&signal, window, feed_live, now_ms).await
                {
                    shared.log(EventKind::Warn, format!("{}: signal dropped: {:?}", window.slug, rejection)).await;
                }
            }
        }
    })
}

/// Reads both sides' books during a window's late-window tracking phase
/// only (spec 4.C strategy 3); a cheap timestamp check skips the round-trip
/// entirely the rest of a window's life.
async fn late_window_mids(
    venue: &Arc<dyn VenueClient>,
    window: &crate::types::Window,
    now_ms: i64,
    config: &Config,
) -> Option<(f64, f64)> {
    let tracking_start = window.end_time - config.tracking_start_sec_before_end * 1000;
    let decision_at = window.end_time - config.decision_sec_before_end * 1000;
    if now_ms < tracking_start || now_ms >= decision_at {
        return None;
    }
    let up_book = venue.get_book(&window.up_token_id).await.ok()?;
    let down_book = venue.get_book(&window.down_token_id).await.ok()?;
    let up_mid = mid_price(&up_book)?;
    let down_mid = mid_price(&down_book)?;
    Some((up_mid, down_mid))
}

fn mid_price(book: &crate::venue::OrderBook) -> Option<f64> {
    match (book.best_bid(), book.best_ask()) {
        (Some(b), Some(a)) => Some((b + a) / 2.0),
        (Some(b), None) => Some(b),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

/// Exit task (component D's exit half, spec section 5 task 4). Periodic
/// timer; re-evaluates every open position's exit state machine. Shares the
/// same lock discipline as the strategy task so mutations stay serialized
/// per spec section 5 ordering guarantee (c).
fn spawn_exit_task(config: Config, shared: SharedState, position_manager: Arc<PositionManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.exit_eval_interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let slugs: Vec<String> = shared.positions.lock().await.keys().cloned().collect();
            let now_ms = chrono::Utc::now().timestamp_millis();
            for slug in slugs {
                if let Err(e) = position_manager.evaluate_exit(&slug, now_ms).await {
                    shared.log(EventKind::Warn, format!("{slug}: exit evaluation failed: {e}")).await;
                }
            }
        }
    })
}

/// Resolution task (spec section 5 task 5). Polls resolution for positions
/// whose window has ended, independent of whether the window is still in
/// the registry (positions hold their own `WindowSnapshot`, spec section 3's
/// graph-free-ownership invariant).
fn spawn_resolution_task(
    config: Config,
    shared: SharedState,
    venue: Arc<dyn VenueClient>,
    position_manager: Arc<PositionManager>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            let ended: Vec<(String, String)> = {
                let positions = shared.positions.lock().await;
                positions
                    .iter()
                    .filter(|(_, p)| p.window.end_time <= now_ms)
                    .map(|(slug, p)| (slug.clone(), p.window.slug.clone()))
                    .collect()
            };
            for (slug, window_slug) in ended {
                let outcome = venue
                    .wait_resolution(&window_slug, Duration::from_secs(config.resolution_grace_secs.max(60) as u64))
                    .await;
                match outcome {
                    Ok(Some(side)) => {
                        if let Err(e) = position_manager.resolve(&slug, side, now_ms).await {
                            shared.log(EventKind::Warn, format!("{slug}: resolution close failed: {e}")).await;
                        }
                    }
                    Ok(None) => {
                        shared.log(EventKind::Warn, format!("{slug}: resolution timed out, will retry")).await;
                    }
                    Err(e) => {
                        shared.log(EventKind::Warn, format!("{slug}: resolution poll failed: {e}")).await;
                    }
                }
            }
        }
    })
}

