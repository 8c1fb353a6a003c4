//! Report output port.

use std::path::Path;

use crate::domain::error::NexoraError;
use crate::domain::report::Report;

pub trait ReportPort {
    /// Writes the finished report under `output_dir`.
    fn write(&self, report: &Report, output_dir: &Path) -> Result<(), NexoraError>;
}
