/// Configuration loaded from environment variables (`.env` first, via
/// `dotenvy`), in the teacher's `env::var(..).ok().and_then(parse).unwrap_or(default)`
/// style. Every field here corresponds to one of the spec's external
/// interface variables.
#[derive(Clone, Debug)]
pub struct Config {
    // --- identity / discovery tags ---
    /// Exchange trade-stream symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// Venue slug asset tag, e.g. "btc".
    pub asset_tag: String,
    /// Venue slug duration tag, e.g. "5m". Window length itself is fixed at
    /// 300s regardless of this tag — see `types::WINDOW_LEN_SECS`.
    pub duration_tag: String,

    // --- exchange feed endpoints ---
    pub exchange_ws: String,
    pub exchange_ws_fallback: String,
    /// Seconds with no tick before the feed reports `!live` (spec 4.A).
    pub stale_after_secs: f64,

    // --- venue endpoints ---
    pub gamma_api_url: String,
    pub clob_api_url: String,
    pub series_id: String,
    /// Seconds between Market Registry discovery rounds (spec 4.B).
    pub registry_refresh_interval_secs: u64,
    /// Seconds a window is retained past its resolution for poll purposes.
    pub resolution_grace_secs: i64,
    /// Seconds ahead of now a not-yet-open window may be discovered.
    pub lookahead_secs: i64,

    // --- venue credentials (opaque to this spec) ---
    pub venue_private_key: Option<String>,
    pub venue_funder_address: Option<String>,

    // --- strategy 1: spike predicate ---
    pub spike_move_usd: f64,
    pub spike_window_sec: f64,
    pub poll_interval_sec: f64,
    /// Minimum spacing between signals fired across all windows (spec 4.C).
    pub spike_debounce_sec: f64,

    // --- strategy 2: passive-limit predicate ---
    pub passive_entry_price: f64,
    pub passive_sell_price: f64,
    pub passive_side: crate::types::Side,

    // --- strategy 3: late-window threshold predicate ---
    pub late_entry_price: f64,
    pub choppy_cutoff: f64,
    pub tracking_start_sec_before_end: i64,
    pub decision_sec_before_end: i64,

    // --- exit state machine ---
    pub profit_target_pct: f64,
    pub moonbag_pct: f64,
    pub drawdown_trigger_pct: f64,
    pub protection_exit_pct: f64,
    pub hard_stop_pct: f64,
    pub fee_rate: f64,
    /// Seconds between exit-state-machine re-evaluations (spec 4.D/5).
    pub exit_eval_interval_secs: u64,

    // --- entry budget ---
    pub max_position_usdc: f64,
    pub max_concurrent_positions: usize,
    pub max_entry_price: f64,
    pub settle_seconds: i64,
    pub min_time_to_resolution_secs: i64,

    // --- mode ---
    pub dry_run: bool,
    pub headless: bool,
}

impl Config {
    /// Loads configuration from the process environment. Returns an error
    /// only when a value is present but fails to parse — spec section 7's
    /// "Configuration" failure kind, fatal at the call site in `main.rs`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let asset_tag = env_str("ASSET_TAG", "btc").to_lowercase();
        let symbol = env_str("SYMBOL", "BTCUSDT").to_uppercase();

        Ok(Self {
            symbol,
            asset_tag,
            duration_tag: env_str("DURATION_TAG", "5m"),

            exchange_ws: env_str(
                "EXCHANGE_WS",
                "wss://stream.binance.com:9443/ws/btcusdt@trade",
            ),
            exchange_ws_fallback: env_str(
                "EXCHANGE_WS_FALLBACK",
                "wss://stream.binance.us:9443/ws/btcusd@trade",
            ),
            stale_after_secs: env_parse("STALE_AFTER_SECS", 5.0)?,

            gamma_api_url: env_str("GAMMA_API_URL", "https://gamma-api.polymarket.com"),
            clob_api_url: env_str("CLOB_API_URL", "https://clob.polymarket.com"),
            series_id: env_str("SERIES_ID", "10684"),
            registry_refresh_interval_secs: env_parse("REGISTRY_REFRESH_INTERVAL_SECS", 30)?,
            resolution_grace_secs: env_parse("RESOLUTION_GRACE_SECS", 900)?,
            lookahead_secs: env_parse("LOOKAHEAD_SECS", 1800)?,

            venue_private_key: std::env::var("VENUE_PRIVATE_KEY").ok(),
            venue_funder_address: std::env::var("VENUE_FUNDER_ADDRESS").ok(),

            spike_move_usd: env_parse("SPIKE_MOVE_USD", 20.0)?,
            spike_window_sec: env_parse("SPIKE_WINDOW_SEC", 3.0)?,
            poll_interval_sec: env_parse("POLL_INTERVAL_SEC", 0.5)?,
            spike_debounce_sec: env_parse("SPIKE_DEBOUNCE_SEC", 10.0)?,

            passive_entry_price: env_parse("PASSIVE_ENTRY_PRICE", 0.50)?,
            passive_sell_price: env_parse("PASSIVE_SELL_PRICE", 0.60)?,
            passive_side: crate::types::Side::Up,

            late_entry_price: env_parse("LATE_ENTRY_PRICE", 0.70)?,
            choppy_cutoff: env_parse("CHOPPY_CUTOFF", 0.65)?,
            tracking_start_sec_before_end: env_parse("TRACKING_START_SEC_BEFORE_END", 165)?,
            decision_sec_before_end: env_parse("DECISION_SEC_BEFORE_END", 90)?,

            profit_target_pct: env_parse("PROFIT_TARGET_PCT", 10.0)?,
            moonbag_pct: env_parse("MOONBAG_PCT", 20.0)?,
            drawdown_trigger_pct: env_parse("DRAWDOWN_TRIGGER_PCT", -15.0)?,
            protection_exit_pct: env_parse("PROTECTION_EXIT_PCT", -10.0)?,
            hard_stop_pct: env_parse("HARD_STOP_PCT", -25.0)?,
            fee_rate: env_parse("FEE_RATE", 0.02)?,
            exit_eval_interval_secs: env_parse("EXIT_EVAL_INTERVAL_SECS", 1)?,

            max_position_usdc: env_parse("MAX_POSITION_USDC", 50.0)?,
            max_concurrent_positions: env_parse("MAX_CONCURRENT_POSITIONS", 3)?,
            max_entry_price: env_parse("MAX_ENTRY_PRICE", 0.60)?,
            settle_seconds: env_parse("SETTLE_SECONDS", 10)?,
            min_time_to_resolution_secs: env_parse("MIN_TIME_TO_RESOLUTION", 30)?,

            dry_run: std::env::var("DRY_RUN")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(true),
            headless: std::env::var("HEADLESS")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }

    /// Applies CLI overrides parsed in `main.rs` ahead of this call — a
    /// `--dry-run` flag wins over `DRY_RUN` when both are present.
    pub fn apply_cli(mut self, headless: bool, dry_run: Option<bool>) -> Self {
        if headless {
            self.headless = true;
        }
        if let Some(d) = dry_run {
            self.dry_run = d;
        }
        self
    }

    /// Slug prefix for market discovery: "{asset}-updown-{duration}-".
    pub fn slug_prefix(&self) -> String {
        format!("{}-updown-{}-", self.asset_tag, self.duration_tag)
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {key}: {raw:?}")),
    }
}
