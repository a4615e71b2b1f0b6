//! REST handlers (C1/C5/C6 surface), implementing the HTTP table from
//! spec §6. Grounded on the teacher's axum handler style in `main.rs`
//! (plain `State<Arc<...>>` extractors, `Json<T>` bodies/responses).

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::models::Identity;
use crate::error::{GatewayError, GatewayResult};
use crate::exchange::symbol::{denormalize_symbol, normalize_symbol};
use crate::models::{Candle, ExchangeId};
use crate::state::AppState;
use crate::twap::{CreateTwapOrderRequest, OrderStatus, TwapOrder};

#[derive(Serialize)]
pub struct ExchangesResponse {
    pub exchanges: Vec<&'static str>,
}

pub async fn list_exchanges() -> Json<ExchangesResponse> {
    Json(ExchangesResponse {
        exchanges: ExchangeId::ALL.iter().map(|e| e.as_str()).collect(),
    })
}

#[derive(Serialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<String>,
}

pub async fn list_symbols(
    State(state): State<Arc<AppState>>,
    Path(exchange): Path<String>,
) -> GatewayResult<Json<SymbolsResponse>> {
    let exchange_id = ExchangeId::from_str(&exchange).ok_or_else(|| GatewayError::UnknownExchange(exchange.clone()))?;
    let adapter = state
        .registry
        .get(exchange_id)
        .ok_or_else(|| GatewayError::UnknownExchange(exchange.clone()))?;

    let native_symbols = adapter.list_symbols().await?;
    let symbols = native_symbols
        .into_iter()
        .map(|s| denormalize_symbol(exchange_id, &s))
        .collect();

    Ok(Json(SymbolsResponse { symbols }))
}

#[derive(Deserialize)]
pub struct KlinesQuery {
    pub start_date: String,
    pub end_date: String,
    pub interval: String,
}

/// Accepts `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`, both interpreted as UTC.
fn parse_date_param(raw: &str) -> Option<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&dt).timestamp_millis());
    }
    None
}

pub async fn get_klines(
    State(state): State<Arc<AppState>>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(query): Query<KlinesQuery>,
) -> GatewayResult<Json<Vec<Candle>>> {
    let exchange_id = ExchangeId::from_str(&exchange).ok_or_else(|| GatewayError::UnknownExchange(exchange.clone()))?;
    let adapter = state
        .registry
        .get(exchange_id)
        .ok_or_else(|| GatewayError::UnknownExchange(exchange.clone()))?;

    crate::exchange::symbol::validate_canonical_symbol(&symbol)?;

    let start_ms = parse_date_param(&query.start_date).ok_or(GatewayError::InvalidRange)?;
    let end_ms = parse_date_param(&query.end_date).ok_or(GatewayError::InvalidRange)?;
    if end_ms <= start_ms {
        return Err(GatewayError::InvalidRange);
    }

    let native_symbol = normalize_symbol(exchange_id, &symbol);
    let candles = adapter
        .fetch_candles(&native_symbol, &query.interval, start_ms, end_ms)
        .await?;

    Ok(Json(candles))
}

/// Submits a batch of TWAP orders (spec §6/§8: "Submitting the same
/// `order_id` twice within one batch is rejected; submitting it across two
/// batches is rejected if the first accepted"). Duplicate `order_id`s
/// explicitly given within the batch are rejected before admitting any
/// order in the batch; the per-order duplicate check against already-open
/// orders still happens inside `TwapEngine::submit`.
pub async fn submit_twap_order(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(reqs): Json<Vec<CreateTwapOrderRequest>>,
) -> GatewayResult<(axum::http::StatusCode, Json<Vec<TwapOrder>>)> {
    let mut seen_ids = std::collections::HashSet::new();
    for req in &reqs {
        if let Some(order_id) = &req.order_id {
            if !seen_ids.insert(order_id.clone()) {
                return Err(GatewayError::DuplicateOrderId(order_id.clone()));
            }
        }
    }

    let mut orders = Vec::with_capacity(reqs.len());
    for req in reqs {
        orders.push(state.twap.submit(&identity.username, req).await?);
    }

    Ok((axum::http::StatusCode::CREATED, Json(orders)))
}

#[derive(Deserialize)]
pub struct OrdersQuery {
    pub order_id: Option<String>,
    pub order_status: Option<String>,
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<OrdersQuery>,
) -> GatewayResult<Json<Vec<TwapOrder>>> {
    if let Some(order_id) = &query.order_id {
        let order = state.twap.get(order_id).await.ok_or(GatewayError::NotFound)?;
        if order.owner != identity.username {
            return Err(GatewayError::Forbidden);
        }
        return Ok(Json(vec![order]));
    }

    let status = match query.order_status.as_deref() {
        None => None,
        Some("open") => Some(OrderStatus::Open),
        Some("filled") => Some(OrderStatus::Filled),
        Some("cancelled") => Some(OrderStatus::Cancelled),
        Some("expired") => Some(OrderStatus::Expired),
        Some(other) => return Err(GatewayError::Client(format!("unknown order_status: {other}"))),
    };

    let orders = state.twap.list(Some(&identity.username), status).await;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(order_id): Path<String>,
) -> GatewayResult<Json<TwapOrder>> {
    let order = state.twap.get(&order_id).await.ok_or(GatewayError::NotFound)?;
    if order.owner != identity.username {
        return Err(GatewayError::Forbidden);
    }
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(order_id): Path<String>,
) -> GatewayResult<Json<TwapOrder>> {
    let order = state.twap.cancel(&order_id, &identity.username).await?;
    Ok(Json(order))
}
