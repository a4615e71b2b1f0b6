//! Shared application state threaded through every axum handler, grounded
//! on the teacher's `AuthState`/app-wide `Arc<...>` wiring in `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::FeedAggregator;
use crate::auth::{TokenIssuer, UserStore};
use crate::cache::OrderBookCache;
use crate::config::Config;
use crate::exchange::AdapterRegistry;
use crate::twap::TwapEngine;

pub struct AppState {
    pub registry: AdapterRegistry,
    pub aggregator: Arc<FeedAggregator>,
    pub cache: Arc<OrderBookCache>,
    pub twap: Arc<TwapEngine>,
    pub user_store: Arc<UserStore>,
    pub token_issuer: Arc<TokenIssuer>,
    pub config: Config,
    pub ws_grace_period: Duration,
}
