//! Regime labels loaded from a CSV file with header `asset,timestamp,regime`.
//!
//! Lookups are as-of: the label in force at a timestamp is the latest one at
//! or before it. Rows may appear in any order.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use crate::domain::error::NexoraError;
use crate::domain::ohlcv::parse_timestamp;
use crate::domain::strategy::Regime;
use crate::ports::regime_port::RegimePort;

#[derive(Debug, Clone, Default)]
pub struct RegimeTable {
    labels: BTreeMap<String, BTreeMap<NaiveDateTime, Regime>>,
}

#[derive(Debug, Deserialize)]
struct RegimeRow {
    asset: String,
    timestamp: String,
    regime: String,
}

impl RegimeTable {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, NexoraError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    pub fn from_reader<R: std::io::Read>(reader: R, file: &str) -> Result<Self, NexoraError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut table = RegimeTable::default();

        for (i, result) in rdr.deserialize::<RegimeRow>().enumerate() {
            let row = result?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| NexoraError::Parse {
                file: file.to_string(),
                line: i as u64 + 2,
                reason: format!("invalid timestamp '{}'", row.timestamp),
            })?;
            let Ok(regime) = row.regime.parse::<Regime>();
            table.insert(&row.asset.to_uppercase(), timestamp, regime);
        }

        debug!(file, assets = table.labels.len(), "loaded regime table");
        Ok(table)
    }

    pub fn insert(&mut self, asset: &str, timestamp: NaiveDateTime, regime: Regime) {
        self.labels
            .entry(asset.to_string())
            .or_default()
            .insert(timestamp, regime);
    }

    pub fn len(&self) -> usize {
        self.labels.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegimePort for RegimeTable {
    fn regime_at(&self, asset: &str, timestamp: NaiveDateTime) -> Option<Regime> {
        self.labels
            .get(asset)?
            .range(..=timestamp)
            .next_back()
            .map(|(_, regime)| regime.clone())
    }
}
