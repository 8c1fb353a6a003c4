//! Core domain types and logic.

pub mod backtest;
pub mod config_validation;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod metrics;
pub mod ohlcv;
pub mod params;
pub mod portfolio;
pub mod position;
pub mod report;
pub mod risk;
pub mod runner;
pub mod signal;
pub mod strategy;
pub mod universe;
