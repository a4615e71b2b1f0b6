//! Feed Aggregator (C3): one demand-count worker per exchange, serializing
//! subscribe/unsubscribe decisions so two overlapping 0→1/1→0 transitions
//! on the same key can never race — the same concurrency discipline
//! `scrapers/polymarket_ws.rs::run` uses for its single-consumer
//! `desired_assets` mutation loop, generalized to a registry of adapters
//! and reference-counted leases.

use crate::cache::OrderBookCache;
use crate::exchange::symbol::normalize_symbol;
use crate::exchange::{AdapterRegistry, ExchangeAdapter};
use crate::models::{BookKey, ExchangeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

enum WorkerCommand {
    Acquire {
        native_symbol: String,
        resp: oneshot::Sender<()>,
    },
    Release {
        native_symbol: String,
    },
}

/// A reference-counted claim on a `(exchange, native symbol)` upstream
/// subscription. Dropping it releases the claim — idempotent, since the
/// worker only acts on the demand count, never on the `Lease` value itself.
pub struct Lease {
    key: BookKey,
    release_tx: mpsc::UnboundedSender<WorkerCommand>,
    released: bool,
}

impl Lease {
    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Explicit release. Also runs on `Drop`, so calling this is optional —
    /// it exists so callers can release deterministically without waiting
    /// for the value to go out of scope.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.release_tx.send(WorkerCommand::Release {
            native_symbol: self.key.native_symbol.clone(),
        });
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.do_release();
    }
}

struct ExchangeWorkerHandle {
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
}

async fn run_exchange_worker(
    adapter: Arc<dyn ExchangeAdapter>,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
) {
    let mut demand: HashMap<String, u64> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            WorkerCommand::Acquire {
                native_symbol,
                resp,
            } => {
                let count = demand.entry(native_symbol.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    debug!(exchange = %adapter.id(), symbol = %native_symbol, "demand 0->1, subscribing");
                    adapter.request_subscribe(&native_symbol);
                }
                let _ = resp.send(());
            }
            WorkerCommand::Release { native_symbol } => {
                if let Some(count) = demand.get_mut(&native_symbol) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        demand.remove(&native_symbol);
                        debug!(exchange = %adapter.id(), symbol = %native_symbol, "demand 1->0, unsubscribing");
                        adapter.request_unsubscribe(&native_symbol);
                    }
                }
            }
        }
    }
}

async fn run_cache_forwarder(
    adapter: Arc<dyn ExchangeAdapter>,
    cache: Arc<OrderBookCache>,
) {
    let mut rx = adapter.subscribe_updates();
    loop {
        match rx.recv().await {
            Ok(update) => {
                let key = BookKey::new(adapter.id(), update.native_symbol);
                cache.put(key, update.book);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                // A missed intermediate version is fine; the cache already
                // holds a fresher write from before we fell behind.
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub struct FeedAggregator {
    workers: HashMap<ExchangeId, ExchangeWorkerHandle>,
}

impl FeedAggregator {
    pub fn spawn(registry: &AdapterRegistry, cache: Arc<OrderBookCache>) -> Arc<Self> {
        let mut workers = HashMap::new();

        for &id in registry.ids() {
            let adapter = registry.get(id).expect("id came from registry.ids()").clone();
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

            tokio::spawn(run_exchange_worker(adapter.clone(), cmd_rx));
            tokio::spawn(run_cache_forwarder(adapter, cache.clone()));

            workers.insert(id, ExchangeWorkerHandle { cmd_tx });
            info!(exchange = %id, "feed aggregator worker started");
        }

        Arc::new(Self { workers })
    }

    /// Increment demand for `(exchange, canonical_symbol)`. If this is the
    /// first leaseholder, asks the adapter to subscribe.
    pub async fn acquire(&self, exchange: ExchangeId, canonical_symbol: &str) -> Option<Lease> {
        let native_symbol = normalize_symbol(exchange, canonical_symbol);
        self.acquire_native(exchange, &native_symbol).await
    }

    /// Same as [`acquire`](Self::acquire) but `native_symbol` is already in
    /// the exchange's own spelling (used by the TWAP engine, whose order
    /// records store the exchange-native symbol directly per spec §3).
    pub async fn acquire_native(&self, exchange: ExchangeId, native_symbol: &str) -> Option<Lease> {
        let handle = self.workers.get(&exchange)?;
        let (resp_tx, resp_rx) = oneshot::channel();

        handle
            .cmd_tx
            .send(WorkerCommand::Acquire {
                native_symbol: native_symbol.to_string(),
                resp: resp_tx,
            })
            .ok()?;
        resp_rx.await.ok()?;

        Some(Lease {
            key: BookKey::new(exchange, native_symbol.to_string()),
            release_tx: handle.cmd_tx.clone(),
            released: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::BookUpdate;
    use crate::models::Candle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::broadcast;

    struct CountingAdapter {
        subscribes: AtomicU64,
        unsubscribes: AtomicU64,
        update_tx: broadcast::Sender<BookUpdate>,
    }

    impl CountingAdapter {
        fn new() -> Arc<Self> {
            let (update_tx, _) = broadcast::channel(16);
            Arc::new(Self {
                subscribes: AtomicU64::new(0),
                unsubscribes: AtomicU64::new(0),
                update_tx,
            })
        }
    }

    #[async_trait]
    impl ExchangeAdapter for CountingAdapter {
        fn id(&self) -> ExchangeId {
            ExchangeId::Binance
        }

        async fn list_symbols(&self) -> Result<Vec<String>, crate::error::GatewayError> {
            Ok(vec![])
        }

        async fn fetch_candles(
            &self,
            _native_symbol: &str,
            _interval: &str,
            _start_ms: i64,
            _end_ms: i64,
        ) -> Result<Vec<Candle>, crate::error::GatewayError> {
            Ok(vec![])
        }

        fn request_subscribe(&self, _native_symbol: &str) {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
        }

        fn request_unsubscribe(&self, _native_symbol: &str) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }

        fn subscribe_updates(&self) -> broadcast::Receiver<BookUpdate> {
            self.update_tx.subscribe()
        }
    }

    #[tokio::test]
    async fn demand_lifecycle_subscribes_once_and_unsubscribes_on_last_release() {
        let adapter = CountingAdapter::new();
        let mut map: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        map.insert(ExchangeId::Binance, adapter.clone());
        let registry = AdapterRegistry::new(map);
        let cache = Arc::new(OrderBookCache::new());
        let aggregator = FeedAggregator::spawn(&registry, cache);

        let lease_a = aggregator
            .acquire(ExchangeId::Binance, "BTC-USDT")
            .await
            .unwrap();
        let lease_b = aggregator
            .acquire(ExchangeId::Binance, "BTC-USDT")
            .await
            .unwrap();

        // Give the worker task a beat to process the acquires.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(adapter.subscribes.load(Ordering::SeqCst), 1);

        drop(lease_a);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(adapter.unsubscribes.load(Ordering::SeqCst), 0);

        drop(lease_b);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(adapter.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn release_is_idempotent_via_explicit_call() {
        let adapter = CountingAdapter::new();
        let mut map: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        map.insert(ExchangeId::Binance, adapter.clone());
        let registry = AdapterRegistry::new(map);
        let cache = Arc::new(OrderBookCache::new());
        let aggregator = FeedAggregator::spawn(&registry, cache);

        let lease = aggregator
            .acquire(ExchangeId::Binance, "ETH-USDT")
            .await
            .unwrap();
        lease.release();
        // Second drop of an already-released lease must not double-decrement;
        // there is nothing left to drop here, which is itself the point —
        // `release()` consumed `self`, so a caller cannot double-release.

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(adapter.unsubscribes.load(Ordering::SeqCst), 1);
    }
}
