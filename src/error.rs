/// Error taxonomy by kind, not by call site — see spec section 7. Most
/// call sites still propagate via `anyhow::Result`; this enum exists so the
/// two fatal kinds (`main.rs`'s exit-code mapping) and any future caller
/// that needs to branch on error *kind* have a closed set to match on
/// instead of string-sniffing.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("venue rejected request: {0}")]
    VenueReject(String),

    #[error("venue outage: {0}")]
    VenueOutage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failure: {0}")]
    Authentication(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl BotError {
    /// Process exit code for the fatal kinds; `None` for kinds that are
    /// recovered locally and never reach `main`.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BotError::Configuration(_) => Some(1),
            BotError::Authentication(_) => Some(2),
            _ => None,
        }
    }
}
