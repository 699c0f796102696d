use std::collections::BTreeMap;

use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ClosedTrade;

/// The derived projection of spec section 3's `Stats`: computed on demand
/// from the closed-trade history, never stored authoritatively. Also
/// folds in the live signal count, which the closed-trade list alone
/// cannot recover (some signals are rejected before a position ever opens).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub signal_count: u64,
    pub trade_count: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub best: f64,
    pub worst: f64,
    /// Eastern-time hour (0-23) of the current local date -> cumulative pnl.
    /// Resets on local-date rollover (spec section 3).
    pub hourly_pnl: BTreeMap<u8, f64>,
}

pub fn compute(trades: &[ClosedTrade], signal_count: u64) -> Stats {
    let trade_count = trades.len() as u64;
    let wins: Vec<&ClosedTrade> = trades.iter().filter(|t| t.status.is_win()).collect();
    let losses: Vec<&ClosedTrade> = trades.iter().filter(|t| !t.status.is_win()).collect();

    let total_pnl: f64 = trades.iter().map(|t| t.pnl).sum();
    let avg_win = avg(&wins);
    let avg_loss = avg(&losses);
    let best = trades.iter().map(|t| t.pnl).fold(f64::MIN, f64::max);
    let worst = trades.iter().map(|t| t.pnl).fold(f64::MAX, f64::min);

    let today = trades.last().map(|t| eastern_date(t.closed_at));
    let mut hourly_pnl = BTreeMap::new();
    if let Some(today) = today {
        for t in trades {
            let (date, hour) = eastern_date_hour(t.closed_at);
            if date == today {
                *hourly_pnl.entry(hour).or_insert(0.0) += t.pnl;
            }
        }
    }

    Stats {
        signal_count,
        trade_count,
        wins: wins.len() as u64,
        losses: losses.len() as u64,
        win_rate: if trade_count > 0 { wins.len() as f64 / trade_count as f64 * 100.0 } else { 0.0 },
        total_pnl,
        avg_win,
        avg_loss,
        best: if trades.is_empty() { 0.0 } else { best },
        worst: if trades.is_empty() { 0.0 } else { worst },
        hourly_pnl,
    }
}

fn avg(trades: &[&ClosedTrade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().map(|t| t.pnl).sum::<f64>() / trades.len() as f64
}

fn eastern_date(t_ms: i64) -> chrono::NaiveDate {
    eastern_date_hour(t_ms).0
}

/// Converts an epoch-ms timestamp into (Eastern local date, Eastern hour).
/// Approximates US Eastern DST (UTC-4 roughly mid-March through early
/// November, UTC-5 otherwise) rather than pulling in a timezone-database
/// crate the rest of this repository's stack does not otherwise need.
fn eastern_date_hour(t_ms: i64) -> (chrono::NaiveDate, u8) {
    let utc = Utc.timestamp_millis_opt(t_ms).single().unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    let offset_hours: i64 = if is_us_dst(utc.naive_utc().date()) { 4 } else { 5 };
    let local = utc.naive_utc() - chrono::Duration::hours(offset_hours);
    (local.date(), local.time().hour() as u8)
}

use chrono::Timelike;

/// True between the second Sunday in March and the first Sunday in
/// November (inclusive start, exclusive end), the US DST rule since 2007.
fn is_us_dst(date: chrono::NaiveDate) -> bool {
    let year = date.year();
    let march_start = nth_sunday(year, 3, 2);
    let november_end = nth_sunday(year, 11, 1);
    date >= march_start && date < november_end
}

fn nth_sunday(year: i32, month: u32, n: u32) -> chrono::NaiveDate {
    let first = chrono::NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    let first_sunday_offset = (7 - first.weekday().num_days_from_sunday()) % 7;
    let first_sunday = first + chrono::Duration::days(first_sunday_offset as i64);
    first_sunday + chrono::Duration::weeks((n - 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CloseStatus, Side};

    fn trade(pnl: f64, status: CloseStatus, closed_at: i64) -> ClosedTrade {
        ClosedTrade {
            side: Side::Up,
            entry: 0.5,
            exit: 0.55,
            shares: 100.0,
            cost: 50.0,
            pnl,
            pnl_pct: pnl / 50.0 * 100.0,
            status,
            window_slug: "s".into(),
            opened_at: closed_at - 1000,
            closed_at,
        }
    }

    /// Scenario: two wins and one loss.
    /// Expected: win_rate is 2/3, total_pnl sums all three.
    #[test]
    fn test_win_rate_and_total_pnl() {
        let trades = vec![
            trade(10.0, CloseStatus::TakeProfit, 1_700_000_000_000),
            trade(5.0, CloseStatus::ResolvedWin, 1_700_000_001_000),
            trade(-8.0, CloseStatus::HardStop, 1_700_000_002_000),
        ];
        let stats = compute(&trades, 10);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate - 66.666_666).abs() < 1e-3);
        assert!((stats.total_pnl - 7.0).abs() < 1e-9);
        assert_eq!(stats.signal_count, 10);
    }

    /// Scenario: no trades closed yet.
    /// Expected: win_rate is 0, not NaN or a divide-by-zero panic.
    #[test]
    fn test_empty_stats_no_panic() {
        let stats = compute(&[], 3);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.best, 0.0);
    }

    /// Scenario: a date known to fall within US DST (July).
    /// Expected: is_us_dst returns true.
    #[test]
    fn test_dst_summer() {
        let d = chrono::NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert!(is_us_dst(d));
    }

    /// Scenario: a date known to fall outside US DST (January).
    /// Expected: is_us_dst returns false.
    #[test]
    fn test_dst_winter() {
        let d = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(!is_us_dst(d));
    }
}
