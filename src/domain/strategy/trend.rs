//! Trend following: long while the short SMA sits above the long SMA.

use crate::domain::error::ComputationError;
use crate::domain::indicators::sma;
use crate::domain::params::{ParameterGrid, ParameterSet};
use crate::domain::signal::Signal;

use super::MarketView;

pub fn defaults() -> ParameterSet {
    ParameterSet::new()
        .with("short_window", 20.0)
        .with("long_window", 50.0)
}

/// short {10, 20, 30} x long {50, 100, 200}, skipping short >= long.
pub fn grid() -> ParameterGrid {
    ParameterGrid::new(defaults())
        .axis("short_window", &[10.0, 20.0, 30.0])
        .axis("long_window", &[50.0, 100.0, 200.0])
        .filter(|p| p.window("short_window", 0) < p.window("long_window", 0))
}

pub fn signal(view: &MarketView<'_>, params: &ParameterSet) -> Result<Signal, ComputationError> {
    let short = params.window("short_window", 20);
    let long = params.window("long_window", 50);

    // Warmup: not enough history for the slow average yet.
    if view.bars.len() < long.max(short) {
        return Ok(Signal::flat());
    }

    let closes = view.closes(long.max(short));
    let fast = sma(&closes, short)?;
    let slow = sma(&closes, long)?;

    if fast > slow {
        Ok(Signal::long())
    } else {
        Ok(Signal::flat())
    }
}
