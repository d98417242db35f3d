//! Trading Operation Lifecycle Engine
//!
//! Turns incoming trade signals into per-user leveraged futures operations:
//! - Risk admission and position sizing per user
//! - Sharded order execution against exchange adapters
//! - Position monitoring with stop-loss / take-profit closes and settlement
//! - Hot-reloaded user/key directory and key validation

pub mod adapters;
pub mod config;
pub mod core;
pub mod directory;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod monitor;
pub mod risk;
pub mod sentiment;
pub mod sizing;
pub mod store;
pub mod validation;

pub use engine::{EngineDeps, SignalReport, TradingEngine};
pub use error::AppError;
