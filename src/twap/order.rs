//! TWAP order record, request/response wire types, and acceptance
//! validation, per spec §4.5. Grounded on the teacher's
//! `vault::execution::{OrderRequest, OrderAck}` shape, simplified since
//! this engine's fills are deterministic top-of-book reads rather than a
//! modeled paper-execution venue.

use crate::error::GatewayError;
use crate::models::ExchangeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FILL_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwapOrder {
    pub order_id: String,
    pub owner: String,
    pub exchange: ExchangeId,
    /// Exchange-native symbol, per spec §3 ("symbol (exchange-native)").
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: f64,
    pub limit_price: Option<f64>,
    pub duration_seconds: u64,
    pub slice_interval_seconds: u64,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
    pub executed_quantity: f64,
    pub remaining_quantity: f64,
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl TwapOrder {
    pub fn slice_count(&self) -> u64 {
        self.duration_seconds / self.slice_interval_seconds
    }

    pub fn per_slice_quantity(&self) -> f64 {
        self.total_quantity / self.slice_count() as f64
    }

    /// Invariant check used by tests: `executed + remaining == total`.
    pub fn balances(&self) -> bool {
        (self.executed_quantity + self.remaining_quantity - self.total_quantity).abs() < 1e-9
    }
}

/// One order within a `POST /orders/twap` batch (the endpoint accepts
/// `Vec<CreateTwapOrderRequest>`, per spec §6/§8).
#[derive(Debug, Deserialize)]
pub struct CreateTwapOrderRequest {
    pub order_id: Option<String>,
    pub exchange: String,
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: f64,
    pub limit_price: Option<f64>,
    pub duration_seconds: u64,
    pub slice_interval_seconds: u64,
}

/// Validates acceptance per spec §4.5: `duration >= slice_interval > 0`,
/// `quantity > 0`, symbol matches `^[A-Z0-9\-_.]{1,20}$`, exchange known.
pub fn validate_new_order(req: &CreateTwapOrderRequest) -> Result<ExchangeId, GatewayError> {
    let exchange = ExchangeId::from_str(&req.exchange)
        .ok_or_else(|| GatewayError::UnknownExchange(req.exchange.clone()))?;

    if req.slice_interval_seconds == 0 || req.duration_seconds < req.slice_interval_seconds {
        return Err(GatewayError::Client(
            "duration_seconds must be >= slice_interval_seconds > 0".to_string(),
        ));
    }

    if req.total_quantity <= 0.0 {
        return Err(GatewayError::Client(
            "total_quantity must be > 0".to_string(),
        ));
    }

    crate::exchange::symbol::validate_canonical_symbol(&req.symbol)?;

    Ok(exchange)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> CreateTwapOrderRequest {
        CreateTwapOrderRequest {
            order_id: None,
            exchange: "binance".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            total_quantity: 1.0,
            limit_price: None,
            duration_seconds: 30,
            slice_interval_seconds: 10,
        }
    }

    #[test]
    fn accepts_well_formed_order() {
        assert!(validate_new_order(&base_request()).is_ok());
    }

    #[test]
    fn rejects_zero_slice_interval() {
        let mut req = base_request();
        req.slice_interval_seconds = 0;
        assert!(validate_new_order(&req).is_err());
    }

    #[test]
    fn rejects_duration_shorter_than_interval() {
        let mut req = base_request();
        req.duration_seconds = 5;
        req.slice_interval_seconds = 10;
        assert!(validate_new_order(&req).is_err());
    }

    #[test]
    fn rejects_unknown_exchange() {
        let mut req = base_request();
        req.exchange = "deribit".to_string();
        assert!(validate_new_order(&req).is_err());
    }

    #[test]
    fn rejects_non_positive_quantity() {
        let mut req = base_request();
        req.total_quantity = 0.0;
        assert!(validate_new_order(&req).is_err());
    }

    #[test]
    fn slice_math_matches_spec_example() {
        let order = TwapOrder {
            order_id: "o1".into(),
            owner: "u".into(),
            exchange: ExchangeId::Binance,
            symbol: "BTCUSDT".into(),
            side: OrderSide::Buy,
            total_quantity: 1.0,
            limit_price: None,
            duration_seconds: 30,
            slice_interval_seconds: 10,
            created_at: Utc::now(),
            status: OrderStatus::Open,
            executed_quantity: 0.0,
            remaining_quantity: 1.0,
            execution_log: vec![],
        };
        assert_eq!(order.slice_count(), 3);
        assert!((order.per_slice_quantity() - 0.333_333_333).abs() < 1e-6);
    }
}
