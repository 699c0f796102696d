pub mod exchange;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::shared::SharedState;

/// The latest observed exchange price, published atomically alongside its
/// timestamp so consumers never read a torn (price, t) pair (spec 4.A
/// guarantee 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceSample {
    pub price: f64,
    pub t: i64,
}

/// Handle to the running Price Feed task — the public surface the rest of
/// the engine consumes. Cloning is cheap; every clone observes the same
/// underlying stream.
#[derive(Clone)]
pub struct PriceFeed {
    rx: watch::Receiver<PriceSample>,
    live: Arc<AtomicBool>,
}

impl PriceFeed {
    pub fn latest(&self) -> PriceSample {
        *self.rx.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

/// Spawns the reconnecting feed task (component A). Returns the handle
/// immediately; callers typically wait for the first nonzero price before
/// proceeding, mirroring the teacher's `main.rs` startup sequence.
pub fn spawn(config: Config, shared: SharedState) -> (PriceFeed, JoinHandle<()>) {
    let (tx, rx) = watch::channel(PriceSample::default());
    let live = Arc::new(AtomicBool::new(false));
    let handle = {
        let live = live.clone();
        tokio::spawn(async move {
            exchange::run(config, shared, tx, live).await;
        })
    };
    (PriceFeed { rx, live }, handle)
}
