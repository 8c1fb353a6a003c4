#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use nexora::domain::config_validation::EngineConfig;
use nexora::domain::error::NexoraError;
pub use nexora::domain::ohlcv::Bar;
use nexora::domain::portfolio::AllocationRules;
use nexora::domain::risk::RiskLimits;
use nexora::domain::universe::MarketData;
use nexora::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, asset: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(asset.to_string(), bars);
        self
    }

    pub fn with_error(mut self, asset: &str, reason: &str) -> Self {
        self.errors.insert(asset.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(&self, asset: &str) -> Result<Vec<Bar>, NexoraError> {
        if let Some(reason) = self.errors.get(asset) {
            return Err(NexoraError::Parse {
                file: format!("{asset}.csv"),
                line: 2,
                reason: reason.clone(),
            });
        }
        self.data
            .get(asset)
            .cloned()
            .ok_or_else(|| NexoraError::NoData {
                asset: asset.to_string(),
            })
    }

    fn list_assets(&self) -> Result<Vec<String>, NexoraError> {
        let mut assets: Vec<String> = self.data.keys().cloned().collect();
        assets.sort();
        Ok(assets)
    }
}

pub fn day(n: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(n)
}

/// Daily bars with open == high == low == close.
pub fn bars_from_closes(asset: &str, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            asset: asset.to_string(),
            timestamp: day(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
        })
        .collect()
}

/// `n` bars each 1% below the last, starting at 100.
pub fn declining(n: usize) -> Vec<f64> {
    (0..n).map(|i| 100.0 * 0.99_f64.powi(i as i32)).collect()
}

/// Deterministic oscillating series, enough to trigger every strategy.
pub fn wave(n: usize, phase: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + 0.05 * t + 8.0 * (t * 0.25 + phase).sin() + 3.0 * (t * 0.07).cos()
        })
        .collect()
}

pub fn engine_config(workers: usize) -> EngineConfig {
    EngineConfig {
        initial_capital: 10_000.0,
        rules: AllocationRules::default(),
        limits: RiskLimits {
            max_drawdown_pct: 20.0,
            max_gross_exposure: 1.5,
        },
        workers,
        ..EngineConfig::default()
    }
}

pub fn market(series: &[(&str, Vec<f64>)]) -> MarketData {
    let mut data = MarketData::default();
    for (asset, closes) in series {
        data.insert(asset, bars_from_closes(asset, closes));
    }
    data
}
