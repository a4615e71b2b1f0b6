//! Exchange Adapter (C1): per-exchange WebSocket client, REST historical
//! candle client, and symbol normalization, behind one uniform trait.
//!
//! One concrete adapter per exchange selected through [`ExchangeId`] and a
//! small [`AdapterRegistry`] — the capability-set pattern from spec §9
//! replacing dynamic dispatch over exchange objects, grounded on the
//! teacher's `scrapers::binance_price_feed`/`scrapers::polymarket_ws`
//! `spawn()`-constructor shape.

pub mod binance;
pub mod book;
pub mod coinbase;
pub mod kraken;
pub mod okx;
pub mod symbol;
pub mod ws_common;

use crate::error::GatewayError;
use crate::models::{Book, Candle, ExchangeId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A single committed book write from an adapter, keyed by the exchange's
/// own native symbol spelling. The Feed Aggregator (C3) consumes these and
/// writes them into the Order-Book Cache (C2).
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub native_symbol: String,
    pub book: Book,
}

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// REST: list tradeable canonical symbols.
    async fn list_symbols(&self) -> Result<Vec<String>, GatewayError>;

    /// REST: paginated OHLCV fetch. `interval` is exchange-native (e.g. "1m").
    async fn fetch_candles(
        &self,
        native_symbol: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, GatewayError>;

    /// Ask the upstream stream worker to subscribe this native symbol.
    /// Non-blocking; idempotent.
    fn request_subscribe(&self, native_symbol: &str);

    /// Ask the upstream stream worker to unsubscribe. Non-blocking.
    /// Adapters that cannot selectively unsubscribe MAY defer or no-op,
    /// relying on the next reconnect to resubscribe only demanded symbols.
    fn request_unsubscribe(&self, native_symbol: &str);

    /// Subscribe to the raw stream of book writes this adapter has made.
    /// Every call gets an independent receiver starting from "now".
    fn subscribe_updates(&self) -> broadcast::Receiver<BookUpdate>;
}

/// Maps [`ExchangeId`] to its running adapter instance.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>,
}

impl AdapterRegistry {
    pub fn new(adapters: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn get(&self, id: ExchangeId) -> Option<&Arc<dyn ExchangeAdapter>> {
        self.adapters.get(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ExchangeId> {
        self.adapters.keys()
    }
}
