use std::process::ExitCode;
use std::sync::Arc;

use polymarket_crypto::config::Config;
use polymarket_crypto::engine::Engine;
use polymarket_crypto::error::BotError;
use polymarket_crypto::venue::clob::ClobClient;
use polymarket_crypto::venue::gamma::GammaVenue;
use polymarket_crypto::venue::{CompositeVenue, VenueClient};

/// Entry point: parses `--headless`/`--dry-run=<bool>` CLI flags ahead of
/// `Config::from_env()` (a `--dry-run` flag wins over `DRY_RUN` when both
/// are present, matching the teacher's no-framework argument handling —
/// no CLI-parsing crate is pulled in anywhere in this manifest), wires up
/// the engine, and awaits a ctrl-c signal before draining tasks in the
/// cancellation order spec section 5 names.
#[tokio::main]
async fn main() -> ExitCode {
    let (headless, dry_run_flag) = parse_cli_flags();

    let config = match Config::from_env() {
        Ok(c) => c.apply_cli(headless, dry_run_flag),
        Err(e) => {
            let err = BotError::Configuration(e.to_string());
            eprintln!("[MAIN] {err} (exit code {})", err.exit_code().unwrap_or(1));
            return ExitCode::from(err.exit_code().unwrap_or(1) as u8);
        }
    };

    eprintln!("╔══════════════════════════════════════════════════╗");
    eprintln!("║  Polymarket {} {} latency-arbitrage bot", config.symbol, config.duration_tag);
    eprintln!("║  Dry run: {} | Headless: {}", config.dry_run, config.headless);
    eprintln!("║  Max position: ${:.0} | Max concurrent: {}", config.max_position_usdc, config.max_concurrent_positions);
    eprintln!("╚══════════════════════════════════════════════════╝");

    let venue: Arc<dyn VenueClient> = if config.dry_run {
        Arc::new(CompositeVenue::new(GammaVenue::new(&config), ClobClient::dry_run(&config.clob_api_url)))
    } else {
        let clob = match ClobClient::live(&config).await {
            Ok(c) => c,
            Err(e) => {
                let err = BotError::Authentication(e.to_string());
                eprintln!("[MAIN] {err} (exit code {})", err.exit_code().unwrap_or(2));
                return ExitCode::from(err.exit_code().unwrap_or(2) as u8);
            }
        };
        Arc::new(CompositeVenue::new(GammaVenue::new(&config), clob))
    };

    let engine = Engine::start(config, venue).await;

    match tokio::signal::ctrl_c().await {
        Ok(()) => eprintln!("[MAIN] shutdown signal received"),
        Err(e) => eprintln!("[MAIN] failed to listen for shutdown signal: {e}"),
    }

    engine.shutdown().await;
    eprintln!("[MAIN] clean shutdown");
    ExitCode::from(0)
}

/// Hand-rolled CLI flag parsing (`--headless`, `--dry-run=<bool>`), matching
/// the teacher's existing no-framework argument handling.
fn parse_cli_flags() -> (bool, Option<bool>) {
    let mut headless = false;
    let mut dry_run = None;
    for arg in std::env::args().skip(1) {
        if arg == "--headless" {
            headless = true;
        } else if let Some(value) = arg.strip_prefix("--dry-run=") {
            dry_run = Some(value == "1" || value.eq_ignore_ascii_case("true"));
        }
    }
    (headless, dry_run)
}
