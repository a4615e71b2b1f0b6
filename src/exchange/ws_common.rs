//! Shared plumbing reused by every per-exchange adapter: reconnect backoff,
//! string-pair price-level parsing, and a timeout-configured REST client.
//! Grounded on `scrapers/polymarket_ws.rs`'s reconnect loop (1s..30s, doubling).

use crate::models::PriceLevel;
use std::time::Duration;

/// Exponential backoff with a configurable cap. Not jittered internally —
/// callers that want jitter add it themselves (see each adapter's `run`),
/// matching spec §4.1's "exponential back-off with jitter, unbounded
/// retries, cap at e.g. 30s".
pub struct Backoff {
    current: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(cap: Duration) -> Self {
        Self {
            current: Duration::from_secs(1),
            cap,
        }
    }

    pub fn reset(&mut self) {
        self.current = Duration::from_secs(1);
    }

    /// Next delay to sleep, with up to 20% jitter, then doubles the
    /// underlying delay (capped).
    pub fn next_delay(&mut self) -> Duration {
        let jitter_frac: f64 = rand::random::<f64>() * 0.2;
        let jittered = self.current.mul_f64(1.0 + jitter_frac);
        self.current = (self.current * 2).min(self.cap);
        jittered
    }
}

/// Parse a `[["12345.6", "0.01"], ...]` style price-level array as sent by
/// every exchange's REST/WS JSON APIs.
pub fn parse_level_pairs(raw: &[[String; 2]]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|[p, q]| {
            let price = p.parse::<f64>().ok()?;
            let quantity = q.parse::<f64>().ok()?;
            Some(PriceLevel { price, quantity })
        })
        .collect()
}

/// Same as [`parse_level_pairs`] but tolerant of a third element per row
/// (OKX includes order count; Kraken includes a timestamp).
pub fn parse_level_rows(raw: &[Vec<String>]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|row| {
            let price = row.first()?.parse::<f64>().ok()?;
            let quantity = row.get(1)?.parse::<f64>().ok()?;
            Some(PriceLevel { price, quantity })
        })
        .collect()
}

pub fn rest_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client builds with a simple timeout config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(8));
        let mut prev = Duration::from_secs(0);
        for _ in 0..6 {
            let d = b.next_delay();
            assert!(d >= prev.mul_f64(0.5));
            prev = d;
        }
        // after enough iterations the underlying delay is pinned at the cap
        assert!(b.current <= Duration::from_secs(8));
    }

    #[test]
    fn parse_level_rows_tolerates_extra_columns() {
        let raw = vec![
            vec!["100.0".to_string(), "1.5".to_string(), "1".to_string()],
            vec!["101.0".to_string(), "2.5".to_string()],
        ];
        let levels = parse_level_rows(&raw);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].price, 100.0);
        assert_eq!(levels[1].quantity, 2.5);
    }
}
