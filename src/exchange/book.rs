//! Helper for turning exchange-native bid/ask rows into a normalized,
//! top-N `Book`. `version` is left at `0` here — the Order-Book Cache (C2)
//! assigns the real monotonic version when the update is written.

use crate::models::{Book, PriceLevel};
use chrono::Utc;

pub fn build_book(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Book {
    Book {
        bids,
        asks,
        timestamp: Utc::now(),
        version: 0,
    }
    .normalize()
}
