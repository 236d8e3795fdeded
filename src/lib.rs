//! Whale Sentinel
//!
//! Classifies large on-chain transfers by exchange flow direction,
//! aggregates them into rolling windows per symbol and timeframe, blends
//! the whale signal with market-wide changes into the Smart Whale
//! Sentiment Index, and fires data-driven alerts with per-key cooldowns.

pub mod aggregator;
pub mod alerts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod scorer;
pub mod store;
pub mod types;
