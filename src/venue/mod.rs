pub mod clob;
pub mod gamma;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Side;

/// A market as discovered from the venue, already normalized into this
/// crate's `Side` convention (spec section 9's "Dynamic shapes → tagged
/// variants" design note — parsing happens once, at this boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDescriptor {
    pub slug: String,
    pub question: String,
    pub end_time: i64,
    pub up_token_id: String,
    pub down_token_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    /// (price, size), best bid first (descending price).
    pub bids: Vec<(f64, f64)>,
    /// (price, size), best ask first (ascending price).
    pub asks: Vec<(f64, f64)>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub order_type: OrderType,
}

#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: String,
    pub filled_price: f64,
    pub filled_size: f64,
}

/// Thin, stateless adapter over the venue's Gamma-style discovery REST
/// surface and CLOB-style order surface — the five operations of spec
/// section 4.E. Shared (as `&dyn VenueClient` / `Arc<dyn VenueClient>`) by
/// the Market Registry and the Strategy/Position Manager.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn list_windows(&self, asset_tag: &str, duration_tag: &str) -> anyhow::Result<Vec<MarketDescriptor>>;
    async fn get_market(&self, slug: &str) -> anyhow::Result<Option<MarketDescriptor>>;
    async fn get_book(&self, token_id: &str) -> anyhow::Result<OrderBook>;
    async fn place_order(&self, req: OrderRequest) -> anyhow::Result<OrderReceipt>;
    /// Polls `get_market`-derived resolution prices at a 10-15s cadence
    /// until an outcome crosses the resolution threshold or `timeout`
    /// elapses.
    async fn wait_resolution(&self, slug: &str, timeout: std::time::Duration) -> anyhow::Result<Option<Side>>;
}

/// Glues `venue::gamma::GammaVenue` (discovery/resolution) and
/// `venue::clob::ClobClient` (books/orders) into one `VenueClient`, since
/// the venue is modeled in spec section 1 as a single external collaborator
/// even though its Gamma and CLOB surfaces are different REST APIs in
/// practice (spec 4.E groups all five operations under one client).
pub struct CompositeVenue {
    gamma: gamma::GammaVenue,
    clob: clob::ClobClient,
}

impl CompositeVenue {
    pub fn new(gamma: gamma::GammaVenue, clob: clob::ClobClient) -> Self {
        Self { gamma, clob }
    }
}

#[async_trait]
impl VenueClient for CompositeVenue {
    async fn list_windows(&self, asset_tag: &str, duration_tag: &str) -> anyhow::Result<Vec<MarketDescriptor>> {
        self.gamma.list_windows(asset_tag, duration_tag).await
    }

    async fn get_market(&self, slug: &str) -> anyhow::Result<Option<MarketDescriptor>> {
        self.gamma.get_market(slug).await
    }

    async fn get_book(&self, token_id: &str) -> anyhow::Result<OrderBook> {
        self.clob.get_book(token_id).await
    }

    async fn place_order(&self, req: OrderRequest) -> anyhow::Result<OrderReceipt> {
        self.clob.place_order(req).await
    }

    async fn wait_resolution(&self, slug: &str, timeout: std::time::Duration) -> anyhow::Result<Option<Side>> {
        self.gamma.wait_resolution(slug, timeout).await
    }
}
