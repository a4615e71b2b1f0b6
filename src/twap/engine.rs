//! TWAP execution engine (C5): per-order background scheduler implementing
//! spec §4.5's slice procedure. Grounded on `vault/execution.rs`'s
//! `ExecutionAdapter::run` task-per-position loop, generalized to an
//! in-process order table instead of a persisted fills ledger, since
//! orders here are scoped to the gateway's own process lifetime (no
//! restart-recovery requirement in scope).

use crate::aggregator::FeedAggregator;
use crate::cache::OrderBookCache;
use crate::error::{GatewayError, GatewayResult};
use crate::models::BookKey;
use crate::twap::order::{
    validate_new_order, CreateTwapOrderRequest, ExecutionLogEntry, OrderSide, OrderStatus,
    TwapOrder, FILL_EPSILON,
};
use chrono::Utc;
use parking_lot::RwLock as SyncRwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded wait for the cache to produce a first book on a freshly leased
/// key, so a brand new subscription doesn't stall a slice indefinitely.
const FIRST_BOOK_TIMEOUT: Duration = Duration::from_secs(5);

struct OrderHandle {
    record: Arc<SyncRwLock<TwapOrder>>,
    cancel: CancellationToken,
}

pub struct TwapEngine {
    aggregator: Arc<FeedAggregator>,
    cache: Arc<OrderBookCache>,
    orders: RwLock<HashMap<String, OrderHandle>>,
}

impl TwapEngine {
    pub fn new(aggregator: Arc<FeedAggregator>, cache: Arc<OrderBookCache>) -> Arc<Self> {
        Arc::new(Self {
            aggregator,
            cache,
            orders: RwLock::new(HashMap::new()),
        })
    }

    /// Validates and admits a new order, returning the initial record.
    /// Spawns the per-slice background task before returning.
    pub async fn submit(
        self: &Arc<Self>,
        owner: &str,
        req: CreateTwapOrderRequest,
    ) -> GatewayResult<TwapOrder> {
        let exchange = validate_new_order(&req)?;

        let order_id = req.order_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        {
            let orders = self.orders.read().await;
            if orders.contains_key(&order_id) {
                return Err(GatewayError::DuplicateOrderId(order_id));
            }
        }

        let native_symbol = crate::exchange::symbol::normalize_symbol(exchange, &req.symbol);

        let order = TwapOrder {
            order_id: order_id.clone(),
            owner: owner.to_string(),
            exchange,
            symbol: native_symbol,
            side: req.side,
            total_quantity: req.total_quantity,
            limit_price: req.limit_price,
            duration_seconds: req.duration_seconds,
            slice_interval_seconds: req.slice_interval_seconds,
            created_at: Utc::now(),
            status: OrderStatus::Open,
            executed_quantity: 0.0,
            remaining_quantity: req.total_quantity,
            execution_log: Vec::new(),
        };

        let record = Arc::new(SyncRwLock::new(order.clone()));
        let cancel = CancellationToken::new();

        {
            let mut orders = self.orders.write().await;
            orders.insert(
                order_id.clone(),
                OrderHandle {
                    record: record.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let engine = self.clone();
        tokio::spawn(engine.run_order(record, cancel));

        Ok(order)
    }

    pub async fn get(&self, order_id: &str) -> Option<TwapOrder> {
        let orders = self.orders.read().await;
        orders.get(order_id).map(|h| h.record.read().clone())
    }

    /// Lists orders, optionally narrowed to one owner and/or one status.
    pub async fn list(&self, owner: Option<&str>, status: Option<OrderStatus>) -> Vec<TwapOrder> {
        let orders = self.orders.read().await;
        orders
            .values()
            .map(|h| h.record.read().clone())
            .filter(|o| owner.map(|u| o.owner == u).unwrap_or(true))
            .filter(|o| status.map(|s| o.status == s).unwrap_or(true))
            .collect()
    }

    /// Cancels an open order. No-op (but not an error) if already terminal.
    pub async fn cancel(&self, order_id: &str, requester: &str) -> GatewayResult<TwapOrder> {
        let orders = self.orders.read().await;
        let handle = orders.get(order_id).ok_or(GatewayError::NotFound)?;

        {
            let record = handle.record.read();
            if record.owner != requester {
                return Err(GatewayError::Forbidden);
            }
        }

        handle.cancel.cancel();
        // The background task observes cancellation at the next slice
        // boundary and performs the actual status transition; callers that
        // need the committed terminal state should poll `get`.
        Ok(handle.record.read().clone())
    }

    async fn run_order(self: Arc<Self>, record: Arc<SyncRwLock<TwapOrder>>, cancel: CancellationToken) {
        let (exchange, native_symbol, slice_interval, slice_count, per_slice_qty, side, limit_price, order_id) = {
            let o = record.read();
            (
                o.exchange,
                o.symbol.clone(),
                Duration::from_secs(o.slice_interval_seconds),
                o.slice_count(),
                o.per_slice_quantity(),
                o.side,
                o.limit_price,
                o.order_id.clone(),
            )
        };

        let Some(lease) = self.aggregator.acquire_native(exchange, &native_symbol).await else {
            warn!(%exchange, symbol = %native_symbol, "twap order has no adapter for its exchange");
            let mut o = record.write();
            o.status = OrderStatus::Expired;
            return;
        };

        let key = lease.key().clone();
        info!(order_id = %order_id, %exchange, symbol = %native_symbol, slices = slice_count, "twap order started");

        for slice in 0..slice_count {
            if cancel.is_cancelled() {
                let mut o = record.write();
                if o.status == OrderStatus::Open {
                    o.status = OrderStatus::Cancelled;
                }
                break;
            }

            if slice > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(slice_interval) => {}
                    _ = cancel.cancelled() => {
                        let mut o = record.write();
                        if o.status == OrderStatus::Open {
                            o.status = OrderStatus::Cancelled;
                        }
                        break;
                    }
                }
            }

            let remaining = record.read().remaining_quantity;
            if remaining <= FILL_EPSILON {
                break;
            }

            let reference_price = self.reference_price(&key, side).await;
            let Some(reference_price) = reference_price else {
                debug!(order_id = %order_id, "no book available for slice, skipping");
                continue;
            };

            if let Some(limit) = limit_price {
                let crosses = match side {
                    OrderSide::Buy => reference_price <= limit,
                    OrderSide::Sell => reference_price >= limit,
                };
                if !crosses {
                    debug!(order_id = %order_id, reference_price, limit, "limit price not met, skipping slice");
                    continue;
                }
            }

            let executed_now = per_slice_qty.min(remaining);
            let mut o = record.write();
            o.executed_quantity += executed_now;
            o.remaining_quantity = (o.remaining_quantity - executed_now).max(0.0);
            o.execution_log.push(ExecutionLogEntry {
                timestamp: Utc::now(),
                price: reference_price,
                quantity: executed_now,
            });
            if o.remaining_quantity < FILL_EPSILON {
                o.status = OrderStatus::Filled;
                drop(o);
                break;
            }
        }

        let mut o = record.write();
        if o.status == OrderStatus::Open {
            o.status = if o.remaining_quantity < FILL_EPSILON {
                OrderStatus::Filled
            } else {
                OrderStatus::Expired
            };
        }
        info!(order_id = %order_id, status = ?o.status, "twap order finished");
        drop(o);
        drop(lease);
    }

    /// Best ask for a buy, best bid for a sell, waiting up to
    /// `FIRST_BOOK_TIMEOUT` for the cache to populate a freshly leased key.
    async fn reference_price(&self, key: &BookKey, side: OrderSide) -> Option<f64> {
        if let Some(book) = self.cache.get(key) {
            let level = match side {
                OrderSide::Buy => book.best_ask(),
                OrderSide::Sell => book.best_bid(),
            };
            if let Some(level) = level {
                return Some(level.price);
            }
        }

        let mut rx = self.cache.watch(key);
        let wait = tokio::time::timeout(FIRST_BOOK_TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Ok(book) => {
                        let level = match side {
                            OrderSide::Buy => book.best_ask(),
                            OrderSide::Sell => book.best_bid(),
                        };
                        if let Some(level) = level {
                            return Some(level.price);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await;

        wait.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{AdapterRegistry, BookUpdate, ExchangeAdapter};
    use crate::models::{Book, Candle, ExchangeId, PriceLevel};
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    struct StubAdapter {
        update_tx: broadcast::Sender<BookUpdate>,
    }

    impl StubAdapter {
        fn new() -> Arc<Self> {
            let (update_tx, _) = broadcast::channel(16);
            Arc::new(Self { update_tx })
        }

        fn push_book(&self, native_symbol: &str, bid: f64, ask: f64) {
            let book = Book {
                bids: vec![PriceLevel {
                    price: bid,
                    quantity: 10.0,
                }],
                asks: vec![PriceLevel {
                    price: ask,
                    quantity: 10.0,
                }],
                timestamp: Utc::now(),
                version: 0,
            };
            let _ = self.update_tx.send(BookUpdate {
                native_symbol: native_symbol.to_string(),
                book,
            });
        }
    }

    #[async_trait]
    impl ExchangeAdapter for StubAdapter {
        fn id(&self) -> ExchangeId {
            ExchangeId::Binance
        }

        async fn list_symbols(&self) -> Result<Vec<String>, GatewayError> {
            Ok(vec![])
        }

        async fn fetch_candles(
            &self,
            _native_symbol: &str,
            _interval: &str,
            _start_ms: i64,
            _end_ms: i64,
        ) -> Result<Vec<Candle>, GatewayError> {
            Ok(vec![])
        }

        fn request_subscribe(&self, _native_symbol: &str) {}
        fn request_unsubscribe(&self, _native_symbol: &str) {}

        fn subscribe_updates(&self) -> broadcast::Receiver<BookUpdate> {
            self.update_tx.subscribe()
        }
    }

    async fn test_engine() -> (Arc<TwapEngine>, Arc<StubAdapter>) {
        let adapter = StubAdapter::new();
        let mut map: HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> = HashMap::new();
        map.insert(ExchangeId::Binance, adapter.clone());
        let registry = AdapterRegistry::new(map);
        let cache = Arc::new(OrderBookCache::new());
        let aggregator = FeedAggregator::spawn(&registry, cache.clone());
        (TwapEngine::new(aggregator, cache), adapter)
    }

    fn order_request() -> CreateTwapOrderRequest {
        CreateTwapOrderRequest {
            order_id: Some("t1".into()),
            exchange: "binance".into(),
            symbol: "BTC-USDT".into(),
            side: OrderSide::Buy,
            total_quantity: 0.3,
            limit_price: None,
            duration_seconds: 2,
            slice_interval_seconds: 1,
        }
    }

    #[tokio::test]
    async fn submitting_duplicate_order_id_is_rejected() {
        let (engine, adapter) = test_engine().await;
        adapter.push_book("BTCUSDT", 99.0, 101.0);

        engine.submit("alice", order_request()).await.unwrap();
        let second = engine.submit("alice", order_request()).await;
        assert!(matches!(second, Err(GatewayError::DuplicateOrderId(_))));
    }

    #[tokio::test]
    async fn order_fills_across_slices_and_reaches_terminal_status() {
        let (engine, adapter) = test_engine().await;
        adapter.push_book("BTCUSDT", 99.0, 101.0);

        let order = engine.submit("alice", order_request()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        tokio::time::sleep(Duration::from_millis(2600)).await;

        let final_order = engine.get("t1").await.unwrap();
        assert_eq!(final_order.status, OrderStatus::Filled);
        assert!(final_order.balances());
        assert!(!final_order.execution_log.is_empty());
    }

    #[tokio::test]
    async fn cancel_transitions_open_order_to_cancelled() {
        let (engine, adapter) = test_engine().await;
        adapter.push_book("BTCUSDT", 99.0, 101.0);

        let mut req = order_request();
        req.duration_seconds = 20;
        req.slice_interval_seconds = 5;
        engine.submit("alice", req).await.unwrap();

        engine.cancel("t1", "alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let order = engine.get("t1").await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_by_non_owner_is_forbidden() {
        let (engine, adapter) = test_engine().await;
        adapter.push_book("BTCUSDT", 99.0, 101.0);
        engine.submit("alice", order_request()).await.unwrap();

        let result = engine.cancel("t1", "mallory").await;
        assert!(matches!(result, Err(GatewayError::Forbidden)));
    }
}
