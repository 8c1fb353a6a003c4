//! CSV report adapter: `bars.csv`, `summary.csv` and `trades.csv`.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::domain::error::NexoraError;
use crate::domain::report::Report;
use crate::ports::report_port::ReportPort;

pub const BARS_FILE: &str = "bars.csv";
pub const SUMMARY_FILE: &str = "summary.csv";
pub const TRADES_FILE: &str = "trades.csv";

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvReportAdapter;

impl CsvReportAdapter {
    pub fn new() -> Self {
        CsvReportAdapter
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), NexoraError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

impl ReportPort for CsvReportAdapter {
    fn write(&self, report: &Report, output_dir: &Path) -> Result<(), NexoraError> {
        fs::create_dir_all(output_dir)?;

        let bars = report.bar_rows();
        let summary = report.summary_rows();
        let trades = report.fill_rows();

        write_rows(&output_dir.join(BARS_FILE), &bars)?;
        write_rows(&output_dir.join(SUMMARY_FILE), &summary)?;
        write_rows(&output_dir.join(TRADES_FILE), &trades)?;

        info!(
            dir = %output_dir.display(),
            bars = bars.len(),
            runs = summary.len(),
            trades = trades.len(),
            "report written"
        );
        Ok(())
    }
}
