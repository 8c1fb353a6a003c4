//! Mean reversion on the close z-score.

use crate::domain::error::ComputationError;
use crate::domain::indicators::zscore;
use crate::domain::params::{ParameterGrid, ParameterSet};
use crate::domain::signal::Signal;

use super::MarketView;

pub fn defaults() -> ParameterSet {
    ParameterSet::new()
        .with("lookback", 20.0)
        .with("threshold", 2.0)
}

pub fn grid() -> ParameterGrid {
    ParameterGrid::new(defaults())
        .axis("lookback", &[10.0, 20.0, 30.0])
        .axis("threshold", &[1.5, 2.0, 2.5])
}

/// z < -threshold buys, z > threshold sells short, anything in between is flat.
pub fn signal(view: &MarketView<'_>, params: &ParameterSet) -> Result<Signal, ComputationError> {
    let lookback = params.window("lookback", 20);
    let threshold = params.get_or("threshold", 2.0);

    if view.bars.len() < lookback {
        return Ok(Signal::flat());
    }

    let z = zscore(&view.closes(lookback), lookback)?;
    if z < -threshold {
        Ok(Signal::long())
    } else if z > threshold {
        Ok(Signal::short())
    } else {
        Ok(Signal::flat())
    }
}
