use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::shared::SharedState;
use crate::types::{EventKind, Window};
use crate::venue::VenueClient;

/// Component B, Market Registry. Periodically discovers active windows from
/// the venue and keeps `SharedState::registry` in sync: new windows are
/// inserted with `open_price = None`, already-known windows are updated only
/// in their derived fields (`open_price`/`signal_fired` survive
/// re-discovery, per spec 4.B), and windows past `end_time + resolution_grace`
/// are evicted.
///
/// Grounded on the teacher's `market/discovery.rs` loop shape (retry-then-
/// sleep cadence), generalized from a single-next-market scan into a
/// concurrent multi-window registry.
pub async fn run(config: Config, shared: SharedState, venue: Arc<dyn VenueClient>) {
    let mut consecutive_failures = 0u32;
    loop {
        match refresh(&config, &shared, &venue).await {
            Ok(()) => consecutive_failures = 0,
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures > 3 {
                    shared.log(EventKind::Warn, format!("registry_stale: {e}")).await;
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(config.registry_refresh_interval_secs)).await;
    }
}

async fn refresh(config: &Config, shared: &SharedState, venue: &Arc<dyn VenueClient>) -> anyhow::Result<()> {
    let discovered = venue.list_windows(&config.asset_tag, &config.duration_tag).await?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let grace_ms = config.resolution_grace_secs * 1000;
    let lookahead_ms = config.lookahead_secs * 1000;

    let mut registry = shared.registry.write().await;

    for descriptor in discovered {
        if descriptor.end_time < now_ms - grace_ms || descriptor.end_time > now_ms + lookahead_ms {
            continue;
        }
        match registry.get_mut(&descriptor.slug) {
            Some(existing) => {
                // Only derived fields are refreshed; open_price and
                // signal_fired are never touched by re-discovery.
                existing.question = descriptor.question;
                existing.up_token_id = descriptor.up_token_id;
                existing.down_token_id = descriptor.down_token_id;
                existing.end_time = descriptor.end_time;
            }
            None => {
                registry.insert(
                    descriptor.slug.clone(),
                    Window {
                        slug: descriptor.slug,
                        question: descriptor.question,
                        up_token_id: descriptor.up_token_id,
                        down_token_id: descriptor.down_token_id,
                        end_time: descriptor.end_time,
                        open_price: None,
                        signal_fired: HashSet::new(),
                    },
                );
            }
        }
    }

    let evict_before = now_ms - grace_ms;
    registry.retain(|_, w| w.end_time >= evict_before);

    Ok(())
}

pub fn spawn(config: Config, shared: SharedState, venue: Arc<dyn VenueClient>) -> JoinHandle<()> {
    tokio::spawn(async move { run(config, shared, venue).await })
}

/// Ordered snapshot of the registry (spec 4.B contract: ordered by
/// `end_time` ascending). Used by the strategy/exit/resolution tasks to
/// iterate without holding the write lock.
pub async fn snapshot(shared: &SharedState) -> Vec<Window> {
    let registry = shared.registry.read().await;
    let mut windows: Vec<Window> = registry.values().cloned().collect();
    windows.sort_by_key(|w| w.end_time);
    windows
}

pub async fn live_slugs(shared: &SharedState) -> HashSet<String> {
    shared.registry.read().await.keys().cloned().collect()
}
