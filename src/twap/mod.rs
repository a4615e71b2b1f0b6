//! TWAP (time-weighted average price) order execution (C5).

pub mod engine;
pub mod order;

pub use engine::TwapEngine;
pub use order::{CreateTwapOrderRequest, ExecutionLogEntry, OrderSide, OrderStatus, TwapOrder};
