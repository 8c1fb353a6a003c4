//! nexora: multi-strategy backtesting with risk-constrained portfolio simulation.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], the command surface in [`cli`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod ports;
