//! Property price estimation engine.
//!
//! Trains an ensemble of regression models over a historical sales dataset
//! and serves valuations with confidence bands and growth projections.
//!
//! ## Architecture
//!
//! ```text
//! Dataset (CSV) → DataProcessor (clean/encode/scale) → ModelTrainer (6 families)
//!                                                             ↓
//!                      ModelRegistry (persist, scan, select best by R²)
//!                                                             ↓
//!           PredictionService (band, projections, rule-based fallback) → HTTP API
//!                                     ↑
//!                    HistoricalGrowthStore (guardrailed growth rates)
//! ```

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod growth;
pub mod registry;
pub mod service;
pub mod training;
