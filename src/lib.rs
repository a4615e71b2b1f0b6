//! Multi-exchange crypto market-data and TWAP execution gateway.
//!
//! Exposes every module for use by the `bettergated` binary and the test
//! suite.

pub mod aggregator;
pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod exchange;
pub mod hub;
pub mod middleware;
pub mod models;
pub mod state;
pub mod twap;
