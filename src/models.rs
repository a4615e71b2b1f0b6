//! Core domain types shared across the gateway: exchange identity, order
//! books, candles, and subscription bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of exchanges the gateway speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    Binance,
    Okx,
    CoinbasePro,
    Kraken,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 4] = [
        ExchangeId::Binance,
        ExchangeId::Okx,
        ExchangeId::CoinbasePro,
        ExchangeId::Kraken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Okx => "okx",
            ExchangeId::CoinbasePro => "coinbase_pro",
            ExchangeId::Kraken => "kraken",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binance" => Some(ExchangeId::Binance),
            "okx" => Some(ExchangeId::Okx),
            "coinbase_pro" | "coinbasepro" => Some(ExchangeId::CoinbasePro),
            "kraken" => Some(ExchangeId::Kraken),
            _ => None,
        }
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single price/quantity resting at one level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

/// Top-N order-book snapshot for one `(exchange, native symbol)` key.
///
/// `bids` sorted descending by price, `asks` ascending; both truncated to
/// `BOOK_DEPTH` levels. Last-write-wins: there is no delta reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: u64,
}

pub const BOOK_DEPTH: usize = 10;

impl Book {
    /// Sort bids descending, asks ascending, and truncate both to `BOOK_DEPTH`.
    pub fn normalize(mut self) -> Self {
        self.bids
            .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
        self.asks
            .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
        self.bids.truncate(BOOK_DEPTH);
        self.asks.truncate(BOOK_DEPTH);
        self
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }
}

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Key identifying a cached order book: the exchange plus its native symbol
/// spelling (e.g. `(Binance, "BTCUSDT")`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub exchange: ExchangeId,
    pub native_symbol: String,
}

impl BookKey {
    pub fn new(exchange: ExchangeId, native_symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            native_symbol: native_symbol.into(),
        }
    }
}

impl fmt::Display for BookKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.native_symbol)
    }
}
