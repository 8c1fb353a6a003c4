//! OHLCV bar representation and series validation.

use chrono::NaiveDateTime;

use super::error::DataError;

/// One immutable OHLCV record for an asset at a fixed granularity.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub asset: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Checks the bar on its own: finite positive prices, a consistent
    /// high/low range and a non-negative volume.
    pub fn validate(&self, index: usize) -> Result<(), DataError> {
        let malformed = |reason: &str| DataError::Malformed {
            index,
            timestamp: self.timestamp,
            reason: reason.to_string(),
        };

        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(malformed(&format!("{name} must be finite and positive, got {value}")));
            }
        }
        if self.high < self.low {
            return Err(malformed("high is below low"));
        }
        if self.close > self.high || self.close < self.low {
            return Err(malformed("close is outside the high/low range"));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(malformed("volume must be finite and non-negative"));
        }
        Ok(())
    }
}

/// Checks that `bar` may follow `previous` in a series: strictly increasing
/// timestamps and, when `max_gap_secs` is set, no spacing wider than it.
pub fn validate_step(
    previous: &Bar,
    bar: &Bar,
    index: usize,
    max_gap_secs: Option<i64>,
) -> Result<(), DataError> {
    if bar.timestamp == previous.timestamp {
        return Err(DataError::DuplicateTimestamp {
            index,
            timestamp: bar.timestamp,
        });
    }
    if bar.timestamp < previous.timestamp {
        return Err(DataError::OutOfOrder {
            index,
            previous: previous.timestamp,
            timestamp: bar.timestamp,
        });
    }
    if let Some(max_gap) = max_gap_secs {
        let gap = (bar.timestamp - previous.timestamp).num_seconds();
        if gap > max_gap {
            return Err(DataError::Gap {
                index,
                previous: previous.timestamp,
                timestamp: bar.timestamp,
                max_gap_secs: max_gap,
            });
        }
    }
    Ok(())
}

/// Parses `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` (also accepting a `T`
/// separator). Date-only values resolve to midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(ts);
        }
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
