//! Window statistics used by the built-in strategies.
//!
//! Every function works on the trailing slice it is given and nothing else, so
//! a signal can always be recomputed from the visible window alone.
//! Standard deviations are population deviations (divide by n).

use super::error::ComputationError;

fn finite(indicator: &'static str, value: f64) -> Result<f64, ComputationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ComputationError::NonFinite { indicator, value })
    }
}

fn trailing<'a>(
    indicator: &'static str,
    values: &'a [f64],
    period: usize,
) -> Result<&'a [f64], ComputationError> {
    if period == 0 || values.len() < period {
        return Err(ComputationError::DegenerateWindow {
            indicator,
            reason: format!("need {period} values, have {}", values.len()),
        });
    }
    Ok(&values[values.len() - period..])
}

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Result<f64, ComputationError> {
    let window = trailing("SMA", values, period)?;
    finite("SMA", window.iter().sum::<f64>() / period as f64)
}

/// Mean and population standard deviation of the last `period` values.
pub fn mean_stddev(values: &[f64], period: usize) -> Result<(f64, f64), ComputationError> {
    let window = trailing("STDDEV", values, period)?;
    let n = period as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Ok((finite("MEAN", mean)?, finite("STDDEV", variance.sqrt())?))
}

/// Z-score of the latest value against the last `period` values.
pub fn zscore(values: &[f64], period: usize) -> Result<f64, ComputationError> {
    let (mean, stddev) = mean_stddev(values, period)?;
    if stddev == 0.0 {
        return Err(ComputationError::DegenerateWindow {
            indicator: "ZSCORE",
            reason: "zero variance".into(),
        });
    }
    let last = values[values.len() - 1];
    finite("ZSCORE", (last - mean) / stddev)
}

/// Ordinary least squares slope of `y` on `x` over the last `period` pairs.
pub fn ols_beta(x: &[f64], y: &[f64], period: usize) -> Result<f64, ComputationError> {
    let x = trailing("OLS", x, period)?;
    let y = trailing("OLS", y, period)?;
    let n = period as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        cov += (xi - mean_x) * (yi - mean_y);
        var_x += (xi - mean_x).powi(2);
    }
    if var_x == 0.0 {
        return Err(ComputationError::DegenerateWindow {
            indicator: "OLS",
            reason: "regressor has zero variance".into(),
        });
    }
    finite("OLS", cov / var_x)
}

/// Pearson correlation over the last `period` pairs.
pub fn correlation(x: &[f64], y: &[f64], period: usize) -> Result<f64, ComputationError> {
    let x = trailing("CORR", x, period)?;
    let y = trailing("CORR", y, period)?;
    let n = period as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        cov += (xi - mean_x) * (yi - mean_y);
        var_x += (xi - mean_x).powi(2);
        var_y += (yi - mean_y).powi(2);
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return Err(ComputationError::DegenerateWindow {
            indicator: "CORR",
            reason: "zero variance".into(),
        });
    }
    finite("CORR", cov / denom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sma_uses_trailing_window() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(sma(&values, 3).unwrap(), 4.0);
        assert_relative_eq!(sma(&values, 5).unwrap(), 3.0);
    }

    #[test]
    fn sma_short_window_is_degenerate() {
        assert!(matches!(
            sma(&[1.0, 2.0], 3),
            Err(ComputationError::DegenerateWindow { .. })
        ));
        assert!(sma(&[1.0], 0).is_err());
    }

    #[test]
    fn sma_propagating_nan_is_reported() {
        let values = [1.0, f64::NAN, 3.0];
        assert!(matches!(
            sma(&values, 3),
            Err(ComputationError::NonFinite { indicator: "SMA", .. })
        ));
    }

    #[test]
    fn population_stddev() {
        // mean 5, squared deviations 9+1+1+9 = 20, /4 = 5
        let (mean, sd) = mean_stddev(&[2.0, 4.0, 6.0, 8.0], 4).unwrap();
        assert_relative_eq!(mean, 5.0);
        assert_relative_eq!(sd, 5.0_f64.sqrt());
    }

    #[test]
    fn zscore_of_constant_series_is_degenerate() {
        assert!(zscore(&[3.0; 10], 5).is_err());
    }

    #[test]
    fn zscore_sign() {
        let values = [10.0, 10.0, 10.0, 10.0, 14.0];
        assert!(zscore(&values, 5).unwrap() > 0.0);
        let values = [10.0, 10.0, 10.0, 10.0, 6.0];
        assert!(zscore(&values, 5).unwrap() < 0.0);
    }

    #[test]
    fn ols_recovers_exact_slope() {
        let x: Vec<f64> = (1..=20).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 3.0 + 2.5 * v).collect();
        assert_relative_eq!(ols_beta(&x, &y, 20).unwrap(), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn correlation_of_linear_series_is_one() {
        let x: Vec<f64> = (1..=10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 4.0 * v - 1.0).collect();
        assert_relative_eq!(correlation(&x, &y, 10).unwrap(), 1.0, epsilon = 1e-12);
        let inv: Vec<f64> = x.iter().map(|v| -v).collect();
        assert_relative_eq!(correlation(&x, &inv, 10).unwrap(), -1.0, epsilon = 1e-12);
    }
}
