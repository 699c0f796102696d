use crate::config::Config;
use crate::types::Side;
use crate::venue::MarketDescriptor;

/// Thin wrapper giving the free functions below a `VenueClient`-shaped home
/// for the discovery/resolution half of the venue surface (spec 4.E's
/// `list_windows`, `get_market`, `wait_resolution`). `get_book`/`place_order`
/// live on `venue::clob::ClobClient` instead; `venue::CompositeVenue` glues
/// the two into one `VenueClient` for `main.rs` to hand to the engine.
pub struct GammaVenue {
    http: reqwest::Client,
    gamma_api_url: String,
    series_id: String,
}

impl GammaVenue {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            gamma_api_url: config.gamma_api_url.clone(),
            series_id: config.series_id.clone(),
        }
    }

    pub async fn list_windows(&self, _asset_tag: &str, _duration_tag: &str) -> anyhow::Result<Vec<MarketDescriptor>> {
        list_windows(&self.http, &self.gamma_api_url, &self.series_id).await
    }

    pub async fn get_market(&self, slug: &str) -> anyhow::Result<Option<MarketDescriptor>> {
        get_market(&self.http, &self.gamma_api_url, slug).await
    }

    pub async fn wait_resolution(&self, slug: &str, timeout: std::time::Duration) -> anyhow::Result<Option<Side>> {
        let Some(market) = self.get_market(slug).await? else {
            return Ok(None);
        };
        wait_resolution(&self.http, &self.gamma_api_url, slug, &market.up_token_id, timeout).await
    }
}

/// Lists active markets tagged by asset + duration via a series-id scan —
/// generalized from the teacher's `market/discovery.rs`, which looked up a
/// single next market by guessing its slug from the current window
/// boundary. The Market Registry needs the full active set (it tracks many
/// concurrent windows), so this always takes the series-scan path and lets
/// the registry filter by `[now - grace, now + lookahead]` itself.
pub async fn list_windows(
    client: &reqwest::Client,
    gamma_api_url: &str,
    series_id: &str,
) -> anyhow::Result<Vec<MarketDescriptor>> {
    let url = format!(
        "{gamma_api_url}/events?series_id={series_id}&active=true&closed=false&limit=100&order=endDate&ascending=false"
    );

    let text = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("discovery request failed: {e}"))?
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("discovery response body failed: {e}"))?;

    let events: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("discovery JSON malformed: {e}"))?;

    let events_arr = events.as_array().cloned().unwrap_or_default();

    Ok(events_arr
        .iter()
        .filter_map(parse_event)
        .collect())
}

/// Single-market lookup by exact slug, used for resolution polling (spec
/// 4.E `get_market`).
pub async fn get_market(
    client: &reqwest::Client,
    gamma_api_url: &str,
    slug: &str,
) -> anyhow::Result<Option<MarketDescriptor>> {
    let url = format!("{gamma_api_url}/events?slug={slug}");
    let text = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("get_market request failed: {e}"))?
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("get_market response body failed: {e}"))?;

    let events: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("get_market JSON malformed: {e}"))?;

    Ok(events
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(parse_event))
}

/// Polls the venue for resolution by slug until an outcome's price crosses
/// the 0.95/0.05 resolution threshold (spec 4.E `wait_resolution`).
pub async fn wait_resolution(
    client: &reqwest::Client,
    gamma_api_url: &str,
    slug: &str,
    up_token_id: &str,
    timeout: std::time::Duration,
) -> anyhow::Result<Option<Side>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(prices) = fetch_outcome_prices(client, gamma_api_url, slug).await? {
            if let Some(up_price) = prices.get(up_token_id).copied() {
                if up_price >= 0.95 {
                    return Ok(Some(Side::Up));
                }
                if up_price <= 0.05 {
                    return Ok(Some(Side::Down));
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(std::time::Duration::from_secs(12)).await;
    }
}

async fn fetch_outcome_prices(
    client: &reqwest::Client,
    gamma_api_url: &str,
    slug: &str,
) -> anyhow::Result<Option<std::collections::HashMap<String, f64>>> {
    let url = format!("{gamma_api_url}/events?slug={slug}");
    let text = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("resolution poll request failed: {e}"))?
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("resolution poll body failed: {e}"))?;

    let events: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("resolution poll JSON malformed: {e}"))?;

    let Some(event) = events.as_array().and_then(|arr| arr.first()) else {
        return Ok(None);
    };
    let Some(markets) = event.get("markets").and_then(|m| m.as_array()) else {
        return Ok(None);
    };

    let mut out = std::collections::HashMap::new();
    for market in markets {
        let tokens = extract_token_ids_zipped(market);
        for (token_id, price) in tokens {
            out.insert(token_id, price);
        }
    }
    Some(out).filter(|m| !m.is_empty()).map(Ok).transpose()
}

fn extract_token_ids_zipped(market: &serde_json::Value) -> Vec<(String, f64)> {
    let tokens_str = market.get("clobTokenIds").and_then(|t| t.as_str()).unwrap_or("");
    let prices_str = market.get("outcomePrices").and_then(|t| t.as_str()).unwrap_or("");
    let (Ok(tokens), Ok(prices)) = (
        serde_json::from_str::<Vec<String>>(tokens_str),
        serde_json::from_str::<Vec<String>>(prices_str),
    ) else {
        return Vec::new();
    };
    tokens
        .into_iter()
        .zip(prices.into_iter())
        .filter_map(|(tok, price)| price.parse::<f64>().ok().map(|p| (tok, p)))
        .collect()
}

/// Parses one Gamma event object into a `MarketDescriptor`. Per spec
/// section 9's "Dynamic shapes → tagged variants" note: a missing required
/// field (end date, either token id) degrades the market to "not tradable"
/// by returning `None`, never a panic. Per spec 4.B's discovery freshness
/// check, a market whose outcome prices are already pinned near 0 or 1 —
/// i.e. already resolved even though the venue still lists it as active —
/// is degraded the same way.
fn parse_event(event: &serde_json::Value) -> Option<MarketDescriptor> {
    let slug = event.get("slug")?.as_str()?.to_string();
    let markets = event.get("markets")?.as_array()?;
    if markets.is_empty() {
        return None;
    }
    if has_resolved_prices(markets) {
        return None;
    }

    let end_date = event.get("endDate")?.as_str()?;
    let end_time = parse_datetime_ms(end_date)?;

    let question = event
        .get("title")
        .and_then(|s| s.as_str())
        .unwrap_or(&slug)
        .to_string();

    let (up_token_id, down_token_id) = extract_token_ids(markets);
    if up_token_id.is_empty() || down_token_id.is_empty() {
        return None;
    }

    Some(MarketDescriptor { slug, question, end_time, up_token_id, down_token_id })
}

/// True if any outcome price across `markets` is already pinned near 0 or 1
/// (the same 0.95/0.05 threshold `wait_resolution` polls for) — the venue
/// sometimes still lists a market as active/not-closed for a short while
/// after it has effectively resolved.
fn has_resolved_prices(markets: &[serde_json::Value]) -> bool {
    markets
        .iter()
        .flat_map(extract_token_ids_zipped)
        .any(|(_, price)| price >= 0.95 || price <= 0.05)
}

/// Handles both Gamma JSON shapes the venue is known to emit: two markets
/// keyed by `groupItemTitle`/`outcome`, or one market with `outcomes` and
/// `clobTokenIds` as JSON-array-encoded strings.
fn extract_token_ids(markets: &[serde_json::Value]) -> (String, String) {
    let mut up_token = String::new();
    let mut down_token = String::new();

    if markets.len() == 2 {
        for market in markets {
            let outcome = market
                .get("groupItemTitle")
                .or_else(|| market.get("outcome"))
                .and_then(|o| o.as_str())
                .unwrap_or("")
                .to_lowercase();
            let token_id = extract_first_token_id(market);
            if is_up_label(&outcome) {
                up_token = token_id;
            } else if is_down_label(&outcome) {
                down_token = token_id;
            }
        }
    }

    if up_token.is_empty() || down_token.is_empty() {
        for market in markets {
            let outcomes_str = market.get("outcomes").and_then(|o| o.as_str()).unwrap_or("");
            let tokens_str = market.get("clobTokenIds").and_then(|t| t.as_str()).unwrap_or("");
            if let (Ok(outcomes), Ok(tokens)) = (
                serde_json::from_str::<Vec<String>>(outcomes_str),
                serde_json::from_str::<Vec<String>>(tokens_str),
            ) {
                for (outcome, token) in outcomes.iter().zip(tokens.iter()) {
                    let lower = outcome.to_lowercase();
                    if is_up_label(&lower) {
                        up_token = token.clone();
                    } else if is_down_label(&lower) {
                        down_token = token.clone();
                    }
                }
            }
        }
    }

    (up_token, down_token)
}

/// The single normalization point for the venue's Up/Down label — spec
/// section 9 flags this as an open question implementers must verify
/// against the live venue. See DESIGN.md's "Open Question decisions".
fn is_up_label(s: &str) -> bool {
    s.contains("up") || s.contains("yes") || s.contains("higher")
}

fn is_down_label(s: &str) -> bool {
    s.contains("down") || s.contains("no") || s.contains("lower")
}

fn extract_first_token_id(market: &serde_json::Value) -> String {
    let Some(raw) = market.get("clobTokenIds") else {
        return String::new();
    };
    if let Some(s) = raw.as_str() {
        if s.starts_with('[') {
            if let Ok(tokens) = serde_json::from_str::<Vec<String>>(s) {
                return tokens.into_iter().next().unwrap_or_default();
            }
        }
        return s.to_string();
    }
    raw.as_array()
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn parse_datetime_ms(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(ts) = s.parse::<i64>() {
        return Some(if ts > 1_000_000_000_000 { ts } else { ts * 1000 });
    }
    None
}
