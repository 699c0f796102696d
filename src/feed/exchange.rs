use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::feed::PriceSample;
use crate::shared::SharedState;
use crate::types::{EventKind, Tick};

const MAX_BACKOFF_SECS: f64 = 30.0;
const SUSTAINED_HEALTHY_SECS: u64 = 10;

/// Supervised reconnect loop: round-robins the primary/fallback endpoints,
/// parses trade messages, and publishes samples. Grounded on the teacher's
/// `feeds/binance.rs` connect/backoff/parse loop, generalized to the
/// explicit `min(2^attempt, 30s) + jitter` backoff and `stale_after`
/// liveness tracking spec 4.A names.
pub async fn run(config: Config, shared: SharedState, tx: watch::Sender<PriceSample>, live: Arc<AtomicBool>) {
    let endpoints = [config.exchange_ws.clone(), config.exchange_ws_fallback.clone()];
    let mut endpoint_idx = 0usize;
    let mut attempt: u32 = 0;
    let mut continuous_failure_since: Option<std::time::Instant> = None;

    loop {
        let url = &endpoints[endpoint_idx % endpoints.len()];
        shared.log(EventKind::Info, format!("feed: connecting to {url}")).await;

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                attempt = 0;
                continuous_failure_since = None;
                let (mut write, mut read) = ws.split();
                let connected_at = std::time::Instant::now();
                let mut last_tick_at = std::time::Instant::now();

                loop {
                    let stale_budget = Duration::from_secs_f64(config.stale_after_secs);
                    let msg = tokio::time::timeout(stale_budget, read.next()).await;

                    match msg {
                        Ok(Some(Ok(Message::Text(text)))) => {
                            if let Some(tick) = parse_trade(&text) {
                                last_tick_at = std::time::Instant::now();
                                live.store(true, Ordering::Relaxed);
                                let _ = tx.send(PriceSample { price: tick.price, t: tick.t });
                                shared.push_price_sample(tick).await;
                            }
                        }
                        Ok(Some(Ok(Message::Ping(payload)))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Some(Ok(_))) => {}
                        Ok(Some(Err(e))) => {
                            shared.log(EventKind::Warn, format!("feed: socket error: {e}")).await;
                            break;
                        }
                        Ok(None) => {
                            shared.log(EventKind::Warn, "feed: socket closed").await;
                            break;
                        }
                        Err(_) => {
                            // No message within stale_after — mark stale but keep trying.
                            if last_tick_at.elapsed() >= stale_budget {
                                live.store(false, Ordering::Relaxed);
                            }
                        }
                    }

                    if connected_at.elapsed() >= Duration::from_secs(SUSTAINED_HEALTHY_SECS) {
                        attempt = 0;
                    }
                }
            }
            Err(e) => {
                shared.log(EventKind::Warn, format!("feed: connect failed: {e}")).await;
            }
        }

        live.store(false, Ordering::Relaxed);
        match continuous_failure_since {
            None => continuous_failure_since = Some(std::time::Instant::now()),
            Some(since) if since.elapsed() >= Duration::from_secs(60) => {
                shared.log(EventKind::Error, "feed: feed_unavailable (all endpoints down > 60s)").await;
            }
            Some(_) => {}
        }

        let backoff = (2f64.powi(attempt as i32)).min(MAX_BACKOFF_SECS);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
        tokio::time::sleep(Duration::from_secs_f64(backoff + jitter)).await;
        attempt = attempt.saturating_add(1);
        endpoint_idx = endpoint_idx.wrapping_add(1);
    }
}

/// Extracts `(price, t)` from a raw Binance-shaped trade message
/// (`{"p": "...", "T": ...}`). Unknown/extra fields are ignored; a message
/// missing either field yields `None` rather than panicking.
fn parse_trade(text: &str) -> Option<Tick> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    let price: f64 = v.get("p")?.as_str()?.parse().ok()?;
    let t = v
        .get("T")
        .and_then(|x| x.as_i64())
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    Some(Tick { price, t })
}
