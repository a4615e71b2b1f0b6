//! Multi-exchange crypto market-data and TWAP execution gateway.
//!
//! Wires the Exchange Adapters (C1), Order-Book Cache (C2), Feed
//! Aggregator (C3), Subscription Hub (C4), TWAP Engine (C5), and Auth/User
//! Store (C6) into one axum service per spec §6.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    middleware as axum_mw,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bettergate::api::{routes, ws};
use bettergate::auth;
use bettergate::cache::OrderBookCache;
use bettergate::config::Config;
use bettergate::exchange::{AdapterRegistry, ExchangeAdapter};
use bettergate::middleware::request_logging_simple;
use bettergate::models::ExchangeId;
use bettergate::state::AppState;
use bettergate::twap::TwapEngine;
use bettergate::aggregator::FeedAggregator;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "bettergate=debug,tower_http=debug".into()))
        .with(fmt::layer())
        .init();
}

fn build_registry(config: &Config) -> AdapterRegistry {
    let rest_timeout = Duration::from_secs(config.rest_request_timeout_secs);
    let reconnect_cap = Duration::from_secs(config.reconnect_backoff_cap_secs);

    let mut adapters: std::collections::HashMap<ExchangeId, Arc<dyn ExchangeAdapter>> =
        std::collections::HashMap::new();

    adapters.insert(
        ExchangeId::Binance,
        bettergate::exchange::binance::BinanceAdapter::spawn(rest_timeout, reconnect_cap),
    );
    adapters.insert(
        ExchangeId::Okx,
        bettergate::exchange::okx::OkxAdapter::spawn(rest_timeout, reconnect_cap),
    );
    adapters.insert(
        ExchangeId::CoinbasePro,
        bettergate::exchange::coinbase::CoinbaseAdapter::spawn(rest_timeout, reconnect_cap),
    );
    adapters.insert(
        ExchangeId::Kraken,
        bettergate::exchange::kraken::KrakenAdapter::spawn(rest_timeout, reconnect_cap),
    );

    AdapterRegistry::new(adapters)
}

fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::api::register))
        .route("/login", post(auth::api::login))
        .route("/exchanges", get(routes::list_exchanges))
        .route("/:exchange/symbols", get(routes::list_symbols))
        .route("/klines/:exchange/:symbol", get(routes::get_klines))
        .route("/ws", get(ws::ws_upgrade));

    let protected_routes = Router::new()
        .route("/logoff", post(auth::api::logoff))
        .route("/users", get(auth::api::list_users))
        .route("/orders/twap", post(routes::submit_twap_order))
        .route("/orders", get(routes::list_orders))
        .route("/orders/:order_id", get(routes::get_order))
        .route("/orders/:order_id", delete(routes::cancel_order))
        .route_layer(axum_mw::from_fn_with_state(state.clone(), auth::auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(axum::middleware::from_fn(request_logging_simple))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    let bind_addr = format!("{}:{}", config.bind_host, config.bind_port);

    let registry = build_registry(&config);
    let cache = Arc::new(OrderBookCache::new());
    let aggregator = FeedAggregator::spawn(&registry, cache.clone());
    let twap = TwapEngine::new(aggregator.clone(), cache.clone());

    let user_store =
        Arc::new(auth::UserStore::new(&config.database_path).context("failed to open user store")?);
    let token_issuer = Arc::new(auth::TokenIssuer::new(
        config.token_secret.clone(),
        config.token_ttl_seconds,
    ));

    let ws_grace_period = Duration::from_secs(config.transport_grace_period_secs);

    let state = Arc::new(AppState {
        registry,
        aggregator,
        cache,
        twap,
        user_store,
        token_issuer,
        config,
        ws_grace_period,
    });

    let app = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "bettergate listening");

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal startup error");
        eprintln!("fatal error: {e:#}");
        std::process::exit(1);
    }
}
