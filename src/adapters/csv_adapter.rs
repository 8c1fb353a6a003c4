//! CSV file data adapter.
//!
//! One file per asset, `<dir>/<ASSET>.csv`, with the header
//! `timestamp,open,high,low,close,volume`. Rows are returned in file order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::error::NexoraError;
use crate::domain::ohlcv::{Bar, parse_timestamp};
use crate::ports::data_port::DataPort;

pub struct CsvAdapter {
    base_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn csv_path(&self, asset: &str) -> PathBuf {
        self.base_path.join(format!("{asset}.csv"))
    }
}

/// Reads bars for `asset` from any CSV source. `file` only labels errors.
pub fn read_bars<R: std::io::Read>(
    reader: R,
    asset: &str,
    file: &str,
) -> Result<Vec<Bar>, NexoraError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();

    for result in rdr.deserialize::<BarRow>() {
        let row = result?;
        let line = bars.len() as u64 + 2;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| NexoraError::Parse {
            file: file.to_string(),
            line,
            reason: format!("invalid timestamp '{}'", row.timestamp),
        })?;
        bars.push(Bar {
            asset: asset.to_string(),
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }

    Ok(bars)
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, asset: &str) -> Result<Vec<Bar>, NexoraError> {
        let path = self.csv_path(asset);
        if !path.exists() {
            return Err(NexoraError::NoData {
                asset: asset.to_string(),
            });
        }
        let file = fs::File::open(&path)?;
        read_bars(file, asset, &path.display().to_string())
    }

    fn list_assets(&self) -> Result<Vec<String>, NexoraError> {
        let mut assets = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    assets.push(stem.to_string_lossy().into_owned());
                }
            }
        }
        assets.sort();
        Ok(assets)
    }
}
