//! Subscription Hub (C4): per-client session state mapping
//! `(canonical symbol, exchange)` to a Feed Aggregator lease plus a watcher
//! task that forwards Order-Book Cache notifications toward the client's
//! transport. Backpressure is single-slot coalescing per key — grounded on
//! the teacher's `broadcast::Sender<WsServerEvent>` fan-out pattern,
//! adapted here to an overwrite-in-place pending map instead of a second
//! broadcast hop, since spec §4.4 asks for "drop intermediate versions,
//! eventually emit latest" rather than an at-least-once delivery log.

use crate::aggregator::{FeedAggregator, Lease};
use crate::cache::OrderBookCache;
use crate::models::{Book, ExchangeId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingKey = (String, ExchangeId);

struct LeaseSlot {
    #[allow(dead_code)]
    lease: Lease,
    watcher: JoinHandle<()>,
}

impl Drop for LeaseSlot {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// One connected client's subscription state and outbound fan-in.
pub struct Session {
    aggregator: Arc<FeedAggregator>,
    cache: Arc<OrderBookCache>,
    leases: HashMap<PendingKey, LeaseSlot>,
    pending: Arc<parking_lot::Mutex<HashMap<PendingKey, Book>>>,
    notify: Arc<Notify>,
    grace_period: Duration,
}

#[derive(Serialize)]
struct WireLevel {
    price: f64,
    quantity: f64,
}

impl From<crate::models::PriceLevel> for WireLevel {
    fn from(l: crate::models::PriceLevel) -> Self {
        Self {
            price: l.price,
            quantity: l.quantity,
        }
    }
}

#[derive(Serialize)]
struct WireBook {
    bids: Vec<WireLevel>,
    asks: Vec<WireLevel>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn new(
        aggregator: Arc<FeedAggregator>,
        cache: Arc<OrderBookCache>,
        grace_period: Duration,
    ) -> Self {
        Self {
            aggregator,
            cache,
            leases: HashMap::new(),
            pending: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            grace_period,
        }
    }

    /// `subscribe(symbol, exchanges)` per §4.4: acquires a lease and a
    /// cache watch for every `(symbol, exchange)` not already leased by
    /// this session.
    pub async fn subscribe(&mut self, canonical_symbol: &str, exchanges: &[ExchangeId]) {
        for &exchange in exchanges {
            let pending_key = (canonical_symbol.to_string(), exchange);
            if self.leases.contains_key(&pending_key) {
                continue;
            }

            let Some(lease) = self.aggregator.acquire(exchange, canonical_symbol).await else {
                warn!(%exchange, symbol = %canonical_symbol, "no adapter registered for exchange");
                continue;
            };

            let mut cache_rx = self.cache.watch(lease.key());
            let pending = self.pending.clone();
            let notify = self.notify.clone();
            let watch_key = pending_key.clone();

            let watcher = tokio::spawn(async move {
                loop {
                    match cache_rx.recv().await {
                        Ok(book) => {
                            pending.lock().insert(watch_key.clone(), book);
                            notify.notify_one();
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            });

            self.leases.insert(pending_key, LeaseSlot { lease, watcher });
        }
    }

    /// `unsubscribe(symbol, exchanges)`: releases leases and drops watches.
    pub fn unsubscribe(&mut self, canonical_symbol: &str, exchanges: &[ExchangeId]) {
        for &exchange in exchanges {
            self.leases
                .remove(&(canonical_symbol.to_string(), exchange));
        }
    }

    /// Drains pending book updates grouped by symbol into the wire shape
    /// `{ "<symbol>": { "<exchange>": {bids, asks, timestamp} } }` and
    /// sends it to `outbound`. Returns `false` if the transport was
    /// unwritable for longer than `grace_period`, signaling the caller to
    /// tear the session down.
    async fn drain_and_send(&mut self, outbound: &mpsc::Sender<String>) -> bool {
        let batch: HashMap<PendingKey, Book> = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return true;
        }

        let mut by_symbol: HashMap<String, serde_json::Map<String, serde_json::Value>> = HashMap::new();
        for ((symbol, exchange), book) in batch {
            let wire = WireBook {
                bids: book.bids.into_iter().map(WireLevel::from).collect(),
                asks: book.asks.into_iter().map(WireLevel::from).collect(),
                timestamp: book.timestamp,
            };
            by_symbol
                .entry(symbol)
                .or_default()
                .insert(exchange.as_str().to_string(), serde_json::to_value(wire).unwrap());
        }

        let frame = serde_json::to_string(&by_symbol).unwrap_or_default();

        match tokio::time::timeout(self.grace_period, outbound.send(frame)).await {
            Ok(Ok(())) => true,
            _ => {
                debug!("client transport unwritable past grace period, tearing down session");
                false
            }
        }
    }

    /// Drives the session end to end: client subscribe/unsubscribe commands
    /// arriving on `commands` are applied immediately; cache notifications
    /// are coalesced and pushed to `outbound`. Returns when `commands`
    /// closes or the transport grace period is exceeded — in either case
    /// every lease this session holds is released via `Drop`.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>, outbound: mpsc::Sender<String>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => {
                    match cmd {
                        Some(SessionCommand::Subscribe { symbol, exchanges }) => {
                            self.subscribe(&symbol, &exchanges).await;
                        }
                        Some(SessionCommand::Unsubscribe { symbol, exchanges }) => {
                            self.unsubscribe(&symbol, &exchanges);
                        }
                        None => return,
                    }
                }
                _ = self.notify.notified() => {
                    if !self.drain_and_send(&outbound).await {
                        return;
                    }
                }
            }
        }
    }
}

/// A parsed client→server frame from the `/ws` protocol (spec §6).
pub enum SessionCommand {
    Subscribe {
        symbol: String,
        exchanges: Vec<ExchangeId>,
    },
    Unsubscribe {
        symbol: String,
        exchanges: Vec<ExchangeId>,
    },
}
