use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A single exchange trade event. `t` is milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub price: f64,
    pub t: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Up => write!(f, "Up"),
            Side::Down => write!(f, "Down"),
        }
    }
}

/// Phase is always derived, never stored directly — see `Window::phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Waiting,
    Settling,
    Active,
    Closing,
    Ended,
}

pub const WINDOW_LEN_SECS: i64 = 300;
pub const CLOSING_CUTOFF_SECS: i64 = 30;

/// One rolling 5-minute binary market, keyed by venue slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub slug: String,
    pub question: String,
    pub up_token_id: String,
    pub down_token_id: String,
    /// Absolute end-of-window timestamp, ms since epoch.
    pub end_time: i64,
    /// First tick observed >= settle_seconds after window start. Immutable
    /// once set — nothing outside `latch_open_price` may write it.
    pub open_price: Option<f64>,
    /// Strategies that have already fired a signal for this window. A
    /// strategy name appears here at most once for the window's lifetime.
    #[serde(skip)]
    pub signal_fired: HashSet<&'static str>,
}

impl Window {
    pub fn start_time(&self) -> i64 {
        self.end_time - WINDOW_LEN_SECS * 1000
    }

    pub fn phase(&self, now_ms: i64, settle_secs: i64) -> Phase {
        if now_ms >= self.end_time {
            return Phase::Ended;
        }
        if self.end_time - now_ms <= CLOSING_CUTOFF_SECS * 1000 {
            return Phase::Closing;
        }
        let start = self.start_time();
        if now_ms < start {
            return Phase::Waiting;
        }
        if self.open_price.is_none() || now_ms - start < settle_secs * 1000 {
            return Phase::Settling;
        }
        Phase::Active
    }

    pub fn has_fired(&self, strategy: &str) -> bool {
        self.signal_fired.contains(strategy)
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            slug: self.slug.clone(),
            end_time: self.end_time,
            up_token_id: self.up_token_id.clone(),
            down_token_id: self.down_token_id.clone(),
        }
    }
}

/// A small, self-contained copy of the identifiers a position needs to keep
/// operating after its window is evicted from the registry. Positions
/// reference windows by slug, never by pointer (see DESIGN.md's
/// "graph-free ownership" note).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub slug: String,
    pub end_time: i64,
    pub up_token_id: String,
    pub down_token_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    Normal,
    Moonbag,
    Protection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub window: WindowSnapshot,
    pub side: Side,
    pub token_id: String,
    pub entry_price: f64,
    pub shares: f64,
    pub cost: f64,
    pub opened_at: i64,
    pub peak_gain_pct: f64,
    pub mode: PositionMode,
    pub status: PositionStatus,
    /// Set once a sell has failed three times; still polled for resolution.
    pub sell_stuck: bool,
    /// Name of the strategy whose signal opened this position (e.g.
    /// `"spike"`, `"passive_limit"`, `"late_window"`). Lets the exit state
    /// machine apply a strategy-specific extra exit condition (the
    /// passive-limit sell target) on top of the unified table.
    pub entry_strategy: &'static str,
}

impl Position {
    pub fn new(
        window: WindowSnapshot,
        side: Side,
        token_id: String,
        entry_price: f64,
        shares: f64,
        opened_at: i64,
        entry_strategy: &'static str,
    ) -> Self {
        Position {
            window,
            side,
            token_id,
            entry_price,
            shares,
            cost: entry_price * shares,
            opened_at,
            peak_gain_pct: 0.0,
            mode: PositionMode::Normal,
            status: PositionStatus::Open,
            sell_stuck: false,
            entry_strategy,
        }
    }

    pub fn gain_pct(&self, best_bid: f64) -> f64 {
        (best_bid - self.entry_price) / self.entry_price * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseStatus {
    TakeProfit,
    MoonbagTrail,
    Protection,
    HardStop,
    ResolvedWin,
    ResolvedLoss,
}

impl CloseStatus {
    pub fn is_win(self) -> bool {
        matches!(
            self,
            CloseStatus::TakeProfit | CloseStatus::MoonbagTrail | CloseStatus::ResolvedWin
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub side: Side,
    pub entry: f64,
    pub exit: f64,
    pub shares: f64,
    pub cost: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub status: CloseStatus,
    pub window_slug: String,
    pub opened_at: i64,
    pub closed_at: i64,
}

/// Emitted by the Window Tracker at most once per (window, strategy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub window_slug: String,
    pub strategy: &'static str,
    pub side: Side,
    pub at_price: f64,
    pub fired_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Info,
    Signal,
    Buy,
    Sell,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub t: i64,
    pub kind: EventKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(end_time: i64, open_price: Option<f64>) -> Window {
        Window {
            slug: "btc-5m-test".into(),
            question: "Will BTC be up?".into(),
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            end_time,
            open_price,
            signal_fired: HashSet::new(),
        }
    }

    /// Scenario: now is before the window's start time.
    /// Expected: phase is Waiting.
    #[test]
    fn test_phase_waiting() {
        let w = window(300_000, None);
        assert_eq!(w.phase(-1, 10), Phase::Waiting);
    }

    /// Scenario: now is within settle_seconds of window start, no open_price yet.
    /// Expected: phase is Settling.
    #[test]
    fn test_phase_settling() {
        let w = window(300_000, None);
        assert_eq!(w.phase(5_000, 10), Phase::Settling);
    }

    /// Scenario: open_price is set and more than closing cutoff remains.
    /// Expected: phase is Active.
    #[test]
    fn test_phase_active() {
        let w = window(300_000, Some(97_000.0));
        assert_eq!(w.phase(150_000, 10), Phase::Active);
    }

    /// Scenario: 30s or less remain before end_time.
    /// Expected: phase is Closing, even with open_price set.
    #[test]
    fn test_phase_closing_boundary() {
        let w = window(300_000, Some(97_000.0));
        assert_eq!(w.phase(270_000, 10), Phase::Closing);
    }

    /// Scenario: now has reached end_time.
    /// Expected: phase is Ended.
    #[test]
    fn test_phase_ended() {
        let w = window(300_000, Some(97_000.0));
        assert_eq!(w.phase(300_000, 10), Phase::Ended);
    }

    /// Scenario: a position entered at 0.50 observes a best-bid of 0.55.
    /// Expected: gain_pct is 10.0.
    #[test]
    fn test_position_gain_pct() {
        let p = Position::new(
            WindowSnapshot {
                slug: "s".into(),
                end_time: 0,
                up_token_id: "u".into(),
                down_token_id: "d".into(),
            },
            Side::Up,
            "u".into(),
            0.50,
            200.0,
            0,
            "spike",
        );
        assert!((p.gain_pct(0.55) - 10.0).abs() < 1e-9);
    }
}
