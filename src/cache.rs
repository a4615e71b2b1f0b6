//! Order-Book Cache (C2): a concurrent `(exchange, native symbol) -> Book`
//! map with monotonic per-key versioning and broadcast fan-out, grounded on
//! `scrapers/polymarket_ws.rs`'s `Arc<RwLock<HashMap<...>>>` cache shape,
//! generalized with a version counter and a `watch` channel per key.

use crate::models::{Book, BookKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

const WATCH_CHANNEL_CAPACITY: usize = 256;

struct Entry {
    book: Book,
    tx: broadcast::Sender<Book>,
}

pub struct OrderBookCache {
    inner: RwLock<HashMap<BookKey, Entry>>,
}

impl Default for OrderBookCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBookCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Atomic replace: assigns the next version for `key` and fans out the
    /// full snapshot to every current watcher. Never blocks on slow
    /// watchers — a lagging receiver just misses intermediate versions.
    pub fn put(&self, key: BookKey, mut book: Book) {
        let mut map = self.inner.write();
        match map.get_mut(&key) {
            Some(entry) => {
                book.version = entry.book.version + 1;
                entry.book = book.clone();
                let _ = entry.tx.send(book);
            }
            None => {
                book.version = 1;
                let (tx, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
                let _ = tx.send(book.clone());
                map.insert(key, Entry { book, tx });
            }
        }
    }

    pub fn get(&self, key: &BookKey) -> Option<Book> {
        self.inner.read().get(key).map(|e| e.book.clone())
    }

    /// Subscribe to every future `put` for `key`. Creates the key with an
    /// empty placeholder book (version 0) if it doesn't exist yet, so a
    /// watcher registered before the first write still gets the first
    /// real snapshot.
    pub fn watch(&self, key: &BookKey) -> broadcast::Receiver<Book> {
        let mut map = self.inner.write();
        let entry = map.entry(key.clone()).or_insert_with(|| Entry {
            book: Book {
                bids: Vec::new(),
                asks: Vec::new(),
                timestamp: chrono::Utc::now(),
                version: 0,
            },
            tx: broadcast::channel(WATCH_CHANNEL_CAPACITY).0,
        });
        entry.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExchangeId, PriceLevel};

    fn book(price: f64) -> Book {
        Book {
            bids: vec![PriceLevel {
                price,
                quantity: 1.0,
            }],
            asks: vec![],
            timestamp: chrono::Utc::now(),
            version: 0,
        }
    }

    #[test]
    fn put_assigns_monotonic_versions() {
        let cache = OrderBookCache::new();
        let key = BookKey::new(ExchangeId::Binance, "BTCUSDT");

        cache.put(key.clone(), book(100.0));
        cache.put(key.clone(), book(101.0));
        cache.put(key.clone(), book(102.0));

        let latest = cache.get(&key).unwrap();
        assert_eq!(latest.version, 3);
        assert_eq!(latest.bids[0].price, 102.0);
    }

    #[tokio::test]
    async fn watchers_see_every_committed_version_when_not_lagging() {
        let cache = OrderBookCache::new();
        let key = BookKey::new(ExchangeId::Binance, "BTCUSDT");
        let mut rx = cache.watch(&key);

        cache.put(key.clone(), book(100.0));
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.version, 1);

        cache.put(key.clone(), book(101.0));
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.version, 2);
    }

    #[test]
    fn get_on_unknown_key_is_none() {
        let cache = OrderBookCache::new();
        let key = BookKey::new(ExchangeId::Kraken, "XBT/USD");
        assert!(cache.get(&key).is_none());
    }
}
