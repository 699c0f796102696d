use std::collections::{HashMap, VecDeque};

use crate::config::Config;
use crate::types::{Phase, Signal, Side, Tick, Window};

/// Component C, Window Tracker. Owns the ephemeral per-window state the
/// signal predicates need beyond what lives on `Window` itself: the rolling
/// tick deque for the spike predicate and the observed best-ask extremes for
/// the late-window predicate. Keyed by slug, pruned whenever the registry
/// evicts a window.
///
/// Grounded on the teacher's `engine/state.rs` (`trade_buffer` eviction by
/// elapsed time, as in `settlement_sniper.rs`'s `state.trade_buffer.front()`
/// use) for the rolling-deque shape, and `strategies/lp_extreme.rs`'s
/// `is_passive` convention for the unconditional passive-limit signal. The
/// decision logic itself is rewritten to the spec's discrete predicates —
/// no fair-value/z-score model is used here.
#[derive(Default)]
pub struct WindowTracker {
    buffers: HashMap<String, TickBuffer>,
    late: HashMap<String, LateWindowState>,
    /// Global debounce across all windows (spec 4.C): the last time any
    /// strategy fired, anywhere.
    last_fired_at: Option<i64>,
}

/// Rolling deque of ticks within the last `spike_window_sec`.
struct TickBuffer {
    buf: VecDeque<Tick>,
    window_ms: i64,
}

impl TickBuffer {
    fn new(window_ms: i64) -> Self {
        Self { buf: VecDeque::new(), window_ms }
    }

    fn push(&mut self, tick: Tick) {
        self.buf.push_back(tick);
        let cutoff = tick.t - self.window_ms;
        while self.buf.front().map(|t| t.t < cutoff).unwrap_or(false) {
            self.buf.pop_front();
        }
    }
}

/// Tracks the best-ask extremes observed on each side during the late-window
/// "tracking phase" sub-window (spec 4.C strategy 3).
#[derive(Default, Clone, Copy)]
struct LateWindowState {
    up_max_mid: f64,
    down_max_mid: f64,
    decided: bool,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prune(&mut self, live_slugs: &std::collections::HashSet<String>) {
        self.buffers.retain(|slug, _| live_slugs.contains(slug));
        self.late.retain(|slug, _| live_slugs.contains(slug));
    }

    /// Open-price latch (spec 4.C). Pins `window.open_price` on the first
    /// tick received at or after `settle_seconds` past the window's start.
    /// Once set, never overwritten — a tick arriving after the window ends
    /// cannot retroactively change it (spec section 8 invariant). A tick at
    /// or past `end_time` is rejected outright: a window that never latched
    /// during its active life (e.g. a feed outage spanning the settle point)
    /// must stay unlatched, not get backfilled by a stale post-end tick.
    pub fn latch_open_price(&self, window: &mut Window, tick: Tick, settle_seconds: i64) {
        if window.open_price.is_some() {
            return;
        }
        if tick.t >= window.end_time {
            return;
        }
        let start = window.start_time();
        if tick.t - start >= settle_seconds * 1000 {
            window.open_price = Some(tick.price);
        }
    }

    /// Feeds a tick into the window's rolling spike buffer and the
    /// late-window observation state. Call once per (window, tick) pair
    /// before evaluating predicates.
    pub fn observe(&mut self, window: &Window, tick: Tick, config: &Config) {
        let window_ms = (config.spike_window_sec * 1000.0) as i64;
        self.buffers
            .entry(window.slug.clone())
            .or_insert_with(|| TickBuffer::new(window_ms))
            .push(tick);
    }

    /// Records a best-ask observation for the late-window predicate. Called
    /// on every book read during a window's tracking phase
    /// `(end_time - tracking_start, end_time - decision)`.
    pub fn observe_late_window(&mut self, window: &Window, now_ms: i64, up_mid: f64, down_mid: f64, config: &Config) {
        let tracking_start = window.end_time - config.tracking_start_sec_before_end * 1000;
        let decision_at = window.end_time - config.decision_sec_before_end * 1000;
        if now_ms < tracking_start || now_ms >= decision_at {
            return;
        }
        let entry = self.late.entry(window.slug.clone()).or_default();
        entry.up_max_mid = entry.up_max_mid.max(up_mid);
        entry.down_max_mid = entry.down_max_mid.max(down_mid);
    }

    /// Spike predicate (strategy 1, spec 4.C). Fires at most once per
    /// window; respects the global debounce window.
    pub fn spike_signal(&mut self, window: &Window, now_ms: i64, config: &Config) -> Option<Signal> {
        const STRATEGY: &str = "spike";
        if window.has_fired(STRATEGY) {
            return None;
        }
        if window.phase(now_ms, config.settle_seconds) != Phase::Active {
            return None;
        }
        if !self.debounce_ok(now_ms, config) {
            return None;
        }

        let buf = self.buffers.get(&window.slug)?;
        let p_now = buf.buf.back()?.price;
        let p_then = buf.buf.front()?.price;
        let delta = p_now - p_then;
        if delta.abs() < config.spike_move_usd {
            return None;
        }

        let side = if delta > 0.0 { Side::Up } else { Side::Down };
        self.last_fired_at = Some(now_ms);
        Some(Signal { window_slug: window.slug.clone(), strategy: STRATEGY, side, at_price: p_now, fired_at: now_ms })
    }

    /// Passive-limit predicate (strategy 2, spec 4.C). Fires unconditionally
    /// the moment a window transitions from `settling` to `active`, for the
    /// configured fixed side. Preserved "as-is" per spec section 9 — flagged
    /// there as likely oversimplified, not redesigned here.
    pub fn passive_signal(
        &mut self,
        window: &Window,
        prev_phase: Phase,
        now_ms: i64,
        config: &Config,
    ) -> Option<Signal> {
        const STRATEGY: &str = "passive_limit";
        if window.has_fired(STRATEGY) {
            return None;
        }
        let now_phase = window.phase(now_ms, config.settle_seconds);
        if prev_phase != Phase::Settling || now_phase != Phase::Active {
            return None;
        }
        if !self.debounce_ok(now_ms, config) {
            return None;
        }
        self.last_fired_at = Some(now_ms);
        Some(Signal {
            window_slug: window.slug.clone(),
            strategy: STRATEGY,
            side: config.passive_side,
            at_price: config.passive_entry_price,
            fired_at: now_ms,
        })
    }

    /// Late-window price-threshold predicate (strategy 3, spec 4.C).
    /// Evaluated once, exactly at the decision timestamp
    /// `end_time - decision_sec_before_end`.
    pub fn late_window_signal(&mut self, window: &Window, now_ms: i64, config: &Config) -> Option<Signal> {
        const STRATEGY: &str = "late_window";
        if window.has_fired(STRATEGY) {
            return None;
        }
        let decision_at = window.end_time - config.decision_sec_before_end * 1000;
        if now_ms < decision_at {
            return None;
        }
        let state = self.late.get_mut(&window.slug)?;
        if state.decided {
            return None;
        }
        state.decided = true;

        let up_wins = state.up_max_mid >= config.late_entry_price && state.down_max_mid < config.choppy_cutoff;
        let down_wins = state.down_max_mid >= config.late_entry_price && state.up_max_mid < config.choppy_cutoff;

        if up_wins == down_wins {
            // Neither crossed decisively, or both did (choppy) — skip.
            return None;
        }
        if !self.debounce_ok(now_ms, config) {
            return None;
        }

        let (side, at_price) =
            if up_wins { (Side::Up, state.up_max_mid) } else { (Side::Down, state.down_max_mid) };
        self.last_fired_at = Some(now_ms);
        Some(Signal { window_slug: window.slug.clone(), strategy: STRATEGY, side, at_price, fired_at: now_ms })
    }

    fn debounce_ok(&self, now_ms: i64, config: &Config) -> bool {
        match self.last_fired_at {
            None => true,
            Some(last) => (now_ms - last) as f64 >= config.spike_debounce_sec * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn window(end_time: i64, open_price: Option<f64>) -> Window {
        Window {
            slug: "btc-updown-5m-test".into(),
            question: "Will BTC be up?".into(),
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            end_time,
            open_price,
            signal_fired: HashSet::new(),
        }
    }

    fn config() -> Config {
        Config {
            symbol: "BTCUSDT".into(),
            asset_tag: "btc".into(),
            duration_tag: "5m".into(),
            exchange_ws: String::new(),
            exchange_ws_fallback: String::new(),
            stale_after_secs: 5.0,
            gamma_api_url: String::new(),
            clob_api_url: String::new(),
            series_id: String::new(),
            registry_refresh_interval_secs: 30,
            resolution_grace_secs: 900,
            lookahead_secs: 1800,
            venue_private_key: None,
            venue_funder_address: None,
            spike_move_usd: 20.0,
            spike_window_sec: 3.0,
            poll_interval_sec: 0.5,
            spike_debounce_sec: 10.0,
            passive_entry_price: 0.50,
            passive_sell_price: 0.60,
            passive_side: Side::Up,
            late_entry_price: 0.70,
            choppy_cutoff: 0.65,
            tracking_start_sec_before_end: 165,
            decision_sec_before_end: 90,
            profit_target_pct: 10.0,
            moonbag_pct: 20.0,
            drawdown_trigger_pct: -15.0,
            protection_exit_pct: -10.0,
            hard_stop_pct: -25.0,
            fee_rate: 0.02,
            exit_eval_interval_secs: 1,
            max_position_usdc: 50.0,
            max_concurrent_positions: 3,
            max_entry_price: 0.60,
            settle_seconds: 10,
            min_time_to_resolution_secs: 30,
            dry_run: true,
            headless: false,
        }
    }

    /// Scenario: a tick arrives exactly at settle_seconds since window start.
    /// Expected: open_price latches (boundary is inclusive, spec section 8).
    #[test]
    fn test_latch_boundary_inclusive() {
        let tracker = WindowTracker::new();
        let mut w = window(305_000, None);
        tracker.latch_open_price(&mut w, Tick { price: 97_000.0, t: 10_000 }, 10);
        assert_eq!(w.open_price, Some(97_000.0));
    }

    /// Scenario: a tick arrives one millisecond before settle_seconds.
    /// Expected: open_price remains unset.
    #[test]
    fn test_latch_boundary_exclusive_before() {
        let tracker = WindowTracker::new();
        let mut w = window(305_000, None);
        tracker.latch_open_price(&mut w, Tick { price: 97_000.0, t: 9_999 }, 10);
        assert_eq!(w.open_price, None);
    }

    /// Scenario: open_price already set; a later tick arrives.
    /// Expected: open_price is unchanged (immutable once latched).
    #[test]
    fn test_latch_is_immutable() {
        let tracker = WindowTracker::new();
        let mut w = window(305_000, Some(97_000.0));
        tracker.latch_open_price(&mut w, Tick { price: 99_000.0, t: 20_000 }, 10);
        assert_eq!(w.open_price, Some(97_000.0));
    }

    /// Scenario: three ticks [97000, 97010, 97022] spaced 1s apart — scenario
    /// 1 from spec section 8 (spike_move = 22 >= 20).
    /// Expected: spike_signal fires Up at the latest price.
    #[test]
    fn test_spike_fires_up() {
        let cfg = config();
        let mut tracker = WindowTracker::new();
        let w = window(300_000 + 300_000, Some(97_000.0));
        let base = w.start_time() + 10_000;
        tracker.observe(&w, Tick { price: 97_000.0, t: base }, &cfg);
        tracker.observe(&w, Tick { price: 97_010.0, t: base + 1000 }, &cfg);
        tracker.observe(&w, Tick { price: 97_022.0, t: base + 2000 }, &cfg);
        let sig = tracker.spike_signal(&w, base + 2000, &cfg).expect("expected a signal");
        assert_eq!(sig.side, Side::Up);
        assert!((sig.at_price - 97_022.0).abs() < 1e-9);
    }

    /// Scenario: spike_signal already fired for this window.
    /// Expected: no second signal, even if the move condition still holds.
    #[test]
    fn test_spike_fires_at_most_once() {
        let cfg = config();
        let mut tracker = WindowTracker::new();
        let mut w = window(300_000 + 300_000, Some(97_000.0));
        let base = w.start_time() + 10_000;
        tracker.observe(&w, Tick { price: 97_000.0, t: base }, &cfg);
        tracker.observe(&w, Tick { price: 97_022.0, t: base + 1000 }, &cfg);
        assert!(tracker.spike_signal(&w, base + 1000, &cfg).is_some());
        w.signal_fired.insert("spike");
        assert!(tracker.spike_signal(&w, base + 1000, &cfg).is_none());
    }

    /// Scenario: window transitions settling -> active.
    /// Expected: passive_signal fires once for the configured fixed side.
    #[test]
    fn test_passive_fires_on_transition() {
        let cfg = config();
        let mut tracker = WindowTracker::new();
        let w = window(300_000, Some(97_000.0));
        let now = w.start_time() + 10_000;
        let sig = tracker
            .passive_signal(&w, Phase::Settling, now, &cfg)
            .expect("expected passive signal");
        assert_eq!(sig.side, Side::Up);
    }

    /// Scenario: one side's max mid crosses late_entry_price, the other
    /// never crosses choppy_cutoff.
    /// Expected: late_window_signal fires for the dominant side.
    #[test]
    fn test_late_window_fires_dominant_side() {
        let cfg = config();
        let mut tracker = WindowTracker::new();
        let w = window(1_000_000, Some(97_000.0));
        let tracking_at = w.end_time - cfg.tracking_start_sec_before_end * 1000 + 1000;
        tracker.observe_late_window(&w, tracking_at, 0.75, 0.40, &cfg);
        let decision_at = w.end_time - cfg.decision_sec_before_end * 1000;
        let sig = tracker.late_window_signal(&w, decision_at, &cfg).expect("expected signal");
        assert_eq!(sig.side, Side::Up);
    }

    /// Scenario: both sides cross late_entry_price (choppy).
    /// Expected: late_window_signal does not fire.
    #[test]
    fn test_late_window_skips_when_choppy() {
        let cfg = config();
        let mut tracker = WindowTracker::new();
        let w = window(1_000_000, Some(97_000.0));
        let tracking_at = w.end_time - cfg.tracking_start_sec_before_end * 1000 + 1000;
        tracker.observe_late_window(&w, tracking_at, 0.75, 0.72, &cfg);
        let decision_at = w.end_time - cfg.decision_sec_before_end * 1000;
        assert!(tracker.late_window_signal(&w, decision_at, &cfg).is_none());
    }
}
