//! Configuration loading and validation.
//!
//! Every option is checked before the first run starts; any violation aborts
//! the batch with a [`ConfigError`] naming the offending section and key.

use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::error::ConfigError;
use crate::domain::execution::CommissionModel;
use crate::domain::metrics::MetricsConfig;
use crate::domain::portfolio::AllocationRules;
use crate::domain::risk::RiskLimits;
use crate::domain::strategy::Strategy;
use crate::domain::universe::{AssetSpec, parse_assets};
use crate::ports::config_port::ConfigPort;

/// Everything a run needs besides its job and its data.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub rules: AllocationRules,
    pub limits: RiskLimits,
    /// Close every position on the bar the drawdown limit is hit.
    pub liquidate_on_halt: bool,
    pub metrics: MetricsConfig,
    pub workers: usize,
    pub timeout_secs: Option<u64>,
    pub max_gap_secs: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_capital: 100_000.0,
            rules: AllocationRules::default(),
            limits: RiskLimits::default(),
            liquidate_on_halt: true,
            metrics: MetricsConfig::default(),
            workers: default_workers(),
            timeout_secs: None,
            max_gap_secs: None,
        }
    }
}

impl EngineConfig {
    /// Same checks as [`validate_engine_config`], for configs built in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_initial_capital(self.initial_capital)?;
        check_position_size(self.rules.position_size, self.rules.allow_margin)?;
        check_costs(&self.rules.costs)?;
        check_limits(&self.limits)?;
        check_metrics(&self.metrics)?;
        check_runner(self.workers, self.timeout_secs, self.max_gap_secs)?;
        Ok(())
    }
}

/// What to run: the strategy x asset cross product and where the data lives.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub strategies: Vec<Strategy>,
    pub assets: Vec<AssetSpec>,
    pub sweep: bool,
    pub data_dir: PathBuf,
    pub regime_file: Option<PathBuf>,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.strategies.is_empty() {
            return Err(ConfigError::Missing {
                section: "batch".into(),
                key: "strategies".into(),
            });
        }
        if self.assets.is_empty() {
            return Err(ConfigError::Missing {
                section: "batch".into(),
                key: "assets".into(),
            });
        }
        let runnable = self.strategies.iter().any(|s| {
            self.assets
                .iter()
                .any(|a| a.is_pair() == s.requires_pair())
        });
        if !runnable {
            return Err(ConfigError::invalid(
                "batch",
                "assets",
                "no asset matches any strategy (paired strategies need A/B assets)",
            ));
        }
        Ok(())
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<EngineConfig, ConfigError> {
    let defaults = EngineConfig::default();

    let initial_capital = read(config, "capital", "initial_capital", defaults.initial_capital)?;
    check_initial_capital(initial_capital)?;

    let allow_shorting = read_bool(config, "capital", "allow_shorting", defaults.rules.allow_shorting)?;
    let allow_margin = read_bool(config, "capital", "allow_margin", defaults.rules.allow_margin)?;
    let position_size = read(config, "capital", "position_size", defaults.rules.position_size)?;
    check_position_size(position_size, allow_margin)?;

    let costs = CommissionModel {
        per_trade: read(config, "costs", "commission_per_trade", 0.0)?,
        pct: read(config, "costs", "commission_pct", 0.0)?,
        slippage_pct: read(config, "costs", "slippage_pct", 0.0)?,
    };
    check_costs(&costs)?;

    let limits = RiskLimits {
        max_drawdown_pct: read(config, "risk", "max_drawdown_pct", defaults.limits.max_drawdown_pct)?,
        max_gross_exposure: read(
            config,
            "risk",
            "max_gross_exposure",
            defaults.limits.max_gross_exposure,
        )?,
    };
    check_limits(&limits)?;
    let liquidate_on_halt = read_bool(config, "risk", "liquidate_on_halt", defaults.liquidate_on_halt)?;

    let metrics = MetricsConfig {
        annualization_factor: read(
            config,
            "metrics",
            "annualization_factor",
            defaults.metrics.annualization_factor,
        )?,
        risk_free_rate: read(config, "metrics", "risk_free_rate", defaults.metrics.risk_free_rate)?,
    };
    check_metrics(&metrics)?;

    let workers = read(config, "runner", "workers", defaults.workers)?;
    let timeout_secs = read_opt(config, "runner", "timeout_secs")?;
    let max_gap_secs = read_opt(config, "runner", "max_gap_secs")?;
    check_runner(workers, timeout_secs, max_gap_secs)?;

    Ok(EngineConfig {
        initial_capital,
        rules: AllocationRules {
            position_size,
            allow_shorting,
            allow_margin,
            costs,
        },
        limits,
        liquidate_on_halt,
        metrics,
        workers,
        timeout_secs,
        max_gap_secs,
    })
}

/// Reads `[batch]` and `[data]`. Empty lists are allowed here because the
/// command line may still supply them; call [`BatchConfig::validate`] once
/// overrides are applied.
pub fn load_batch_config(config: &dyn ConfigPort) -> Result<BatchConfig, ConfigError> {
    let strategies = parse_strategies(&config.get_list("batch", "strategies"))?;

    let assets = match config.get_string("batch", "assets") {
        Some(raw) if !raw.trim().is_empty() => parse_assets(&raw)?,
        _ => Vec::new(),
    };

    Ok(BatchConfig {
        strategies,
        assets,
        sweep: read_bool(config, "batch", "sweep", false)?,
        data_dir: config
            .get_string("data", "dir")
            .map_or_else(|| PathBuf::from("./data"), PathBuf::from),
        regime_file: config
            .get_string("data", "regime_file")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from),
    })
}

/// Parses strategy names in order. Unknown names and repeats are errors.
pub fn parse_strategies<S: AsRef<str>>(names: &[S]) -> Result<Vec<Strategy>, ConfigError> {
    let mut strategies = Vec::with_capacity(names.len());
    for name in names {
        let strategy = name.as_ref().parse::<Strategy>()?;
        if strategies.contains(&strategy) {
            return Err(ConfigError::invalid(
                "batch",
                "strategies",
                format!("duplicate strategy {}", strategy.name()),
            ));
        }
        strategies.push(strategy);
    }
    Ok(strategies)
}

fn read<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(read_opt(config, section, key)?.unwrap_or(default))
}

fn read_opt<T: FromStr>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(section, key, format!("cannot parse '{raw}'"))),
    }
}

fn read_bool(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match config.get_string(section, key) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(
                section,
                key,
                format!("'{raw}' is not a boolean"),
            )),
        },
    }
}

fn check_initial_capital(value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(
            "capital",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    Ok(())
}

fn check_position_size(value: f64, allow_margin: bool) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(
            "capital",
            "position_size",
            "position_size must be positive",
        ));
    }
    if value > 1.0 && !allow_margin {
        return Err(ConfigError::invalid(
            "capital",
            "position_size",
            "position_size above 1 requires allow_margin",
        ));
    }
    Ok(())
}

fn check_costs(costs: &CommissionModel) -> Result<(), ConfigError> {
    if !costs.per_trade.is_finite() || costs.per_trade < 0.0 {
        return Err(ConfigError::invalid(
            "costs",
            "commission_per_trade",
            "commission_per_trade must be non-negative",
        ));
    }
    if !costs.pct.is_finite() || costs.pct < 0.0 {
        return Err(ConfigError::invalid(
            "costs",
            "commission_pct",
            "commission_pct must be non-negative",
        ));
    }
    if !(0.0..100.0).contains(&costs.slippage_pct) {
        return Err(ConfigError::invalid(
            "costs",
            "slippage_pct",
            "slippage_pct must be in [0, 100)",
        ));
    }
    Ok(())
}

fn check_limits(limits: &RiskLimits) -> Result<(), ConfigError> {
    if !(limits.max_drawdown_pct > 0.0 && limits.max_drawdown_pct <= 100.0) {
        return Err(ConfigError::invalid(
            "risk",
            "max_drawdown_pct",
            "max_drawdown_pct must be in (0, 100]",
        ));
    }
    if !(limits.max_gross_exposure > 0.0 && limits.max_gross_exposure.is_finite()) {
        return Err(ConfigError::invalid(
            "risk",
            "max_gross_exposure",
            "max_gross_exposure must be positive",
        ));
    }
    Ok(())
}

fn check_metrics(metrics: &MetricsConfig) -> Result<(), ConfigError> {
    if !(metrics.annualization_factor > 0.0 && metrics.annualization_factor.is_finite()) {
        return Err(ConfigError::invalid(
            "metrics",
            "annualization_factor",
            "annualization_factor must be positive",
        ));
    }
    if !(0.0..1.0).contains(&metrics.risk_free_rate) {
        return Err(ConfigError::invalid(
            "metrics",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}

fn check_runner(
    workers: usize,
    timeout_secs: Option<u64>,
    max_gap_secs: Option<i64>,
) -> Result<(), ConfigError> {
    if workers == 0 {
        return Err(ConfigError::invalid("runner", "workers", "workers must be at least 1"));
    }
    if timeout_secs == Some(0) {
        return Err(ConfigError::invalid(
            "runner",
            "timeout_secs",
            "timeout_secs must be positive",
        ));
    }
    if max_gap_secs.is_some_and(|g| g <= 0) {
        return Err(ConfigError::invalid(
            "runner",
            "max_gap_secs",
            "max_gap_secs must be positive",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MockConfig {
        values: HashMap<(String, String), String>,
    }

    impl MockConfig {
        fn new(entries: &[(&str, &str, &str)]) -> Self {
            MockConfig {
                values: entries
                    .iter()
                    .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                    .collect(),
            }
        }
    }

    impl ConfigPort for MockConfig {
        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.values
                .get(&(section.to_string(), key.to_string()))
                .cloned()
        }
    }

    fn assert_invalid(result: Result<EngineConfig, ConfigError>, section: &str, key: &str) {
        match result {
            Err(ConfigError::Invalid {
                section: s, key: k, ..
            }) => {
                assert_eq!(s, section);
                assert_eq!(k, key);
            }
            other => panic!("expected invalid [{section}] {key}, got {other:?}"),
        }
    }

    #[test]
    fn empty_config_gives_defaults() {
        let config = validate_engine_config(&MockConfig::new(&[])).unwrap();
        assert!((config.initial_capital - 100_000.0).abs() < f64::EPSILON);
        assert!((config.limits.max_drawdown_pct - 20.0).abs() < f64::EPSILON);
        assert!((config.metrics.annualization_factor - 252.0).abs() < f64::EPSILON);
        assert!(config.rules.allow_shorting);
        assert!(!config.rules.allow_margin);
        assert!(config.liquidate_on_halt);
        assert_eq!(config.rules.costs, CommissionModel::free());
        assert!(config.workers >= 1);
        assert_eq!(config.timeout_secs, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_config_is_read() {
        let config = validate_engine_config(&MockConfig::new(&[
            ("capital", "initial_capital", "50000"),
            ("capital", "allow_shorting", "false"),
            ("capital", "position_size", "0.5"),
            ("risk", "max_drawdown_pct", "15"),
            ("risk", "max_gross_exposure", "2.0"),
            ("risk", "liquidate_on_halt", "no"),
            ("costs", "commission_per_trade", "1.5"),
            ("costs", "commission_pct", "0.1"),
            ("costs", "slippage_pct", "0.05"),
            ("metrics", "annualization_factor", "365"),
            ("metrics", "risk_free_rate", "0.02"),
            ("runner", "workers", "3"),
            ("runner", "timeout_secs", "60"),
            ("runner", "max_gap_secs", "86400"),
        ]))
        .unwrap();
        assert!((config.initial_capital - 50_000.0).abs() < f64::EPSILON);
        assert!(!config.rules.allow_shorting);
        assert!(!config.liquidate_on_halt);
        assert!((config.rules.costs.per_trade - 1.5).abs() < f64::EPSILON);
        assert!((config.limits.max_gross_exposure - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.workers, 3);
        assert_eq!(config.timeout_secs, Some(60));
        assert_eq!(config.max_gap_secs, Some(86_400));
    }

    #[test]
    fn negative_capital_rejected() {
        let result = validate_engine_config(&MockConfig::new(&[(
            "capital",
            "initial_capital",
            "-5",
        )]));
        assert_invalid(result, "capital", "initial_capital");
    }

    #[test]
    fn unparsable_number_rejected() {
        let result = validate_engine_config(&MockConfig::new(&[(
            "risk",
            "max_drawdown_pct",
            "lots",
        )]));
        assert_invalid(result, "risk", "max_drawdown_pct");
    }

    #[test]
    fn drawdown_above_hundred_rejected() {
        let result =
            validate_engine_config(&MockConfig::new(&[("risk", "max_drawdown_pct", "150")]));
        assert_invalid(result, "risk", "max_drawdown_pct");
    }

    #[test]
    fn zero_exposure_rejected() {
        let result =
            validate_engine_config(&MockConfig::new(&[("risk", "max_gross_exposure", "0")]));
        assert_invalid(result, "risk", "max_gross_exposure");
    }

    #[test]
    fn leverage_needs_margin() {
        let result =
            validate_engine_config(&MockConfig::new(&[("capital", "position_size", "2.0")]));
        assert_invalid(result, "capital", "position_size");

        let ok = validate_engine_config(&MockConfig::new(&[
            ("capital", "position_size", "2.0"),
            ("capital", "allow_margin", "true"),
        ]));
        assert!(ok.is_ok());
    }

    #[test]
    fn negative_commission_rejected() {
        let result =
            validate_engine_config(&MockConfig::new(&[("costs", "commission_pct", "-0.1")]));
        assert_invalid(result, "costs", "commission_pct");
    }

    #[test]
    fn infinite_commission_rejected() {
        let result =
            validate_engine_config(&MockConfig::new(&[("costs", "commission_per_trade", "inf")]));
        assert_invalid(result, "costs", "commission_per_trade");
    }

    #[test]
    fn bad_boolean_rejected() {
        let result =
            validate_engine_config(&MockConfig::new(&[("capital", "allow_margin", "maybe")]));
        assert_invalid(result, "capital", "allow_margin");
    }

    #[test]
    fn zero_workers_rejected() {
        let result = validate_engine_config(&MockConfig::new(&[("runner", "workers", "0")]));
        assert_invalid(result, "runner", "workers");
    }

    #[test]
    fn batch_lists_are_parsed() {
        let batch = load_batch_config(&MockConfig::new(&[
            ("batch", "strategies", "trend, stat_arb"),
            ("batch", "assets", "BTC, ETH/BTC"),
            ("batch", "sweep", "true"),
            ("data", "dir", "/tmp/bars"),
        ]))
        .unwrap();
        assert_eq!(
            batch.strategies,
            vec![Strategy::TrendFollowing, Strategy::StatisticalArbitrage]
        );
        assert_eq!(batch.assets.len(), 2);
        assert!(batch.sweep);
        assert_eq!(batch.data_dir, PathBuf::from("/tmp/bars"));
        assert_eq!(batch.regime_file, None);
        assert!(batch.validate().is_ok());
    }

    #[test]
    fn unknown_strategy_rejected() {
        let result = load_batch_config(&MockConfig::new(&[("batch", "strategies", "momentum")]));
        assert!(matches!(result, Err(ConfigError::UnknownStrategy(_))));
    }

    #[test]
    fn repeated_strategy_rejected() {
        let result = load_batch_config(&MockConfig::new(&[(
            "batch",
            "strategies",
            "trend, flat, trend",
        )]));
        match result {
            Err(ConfigError::Invalid { section, key, reason }) => {
                assert_eq!((section.as_str(), key.as_str()), ("batch", "strategies"));
                assert!(reason.contains("duplicate strategy trend"));
            }
            other => panic!("expected duplicate strategy error, got {other:?}"),
        }
    }

    #[test]
    fn empty_batch_fails_validation() {
        let batch = load_batch_config(&MockConfig::new(&[])).unwrap();
        assert!(matches!(batch.validate(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn pair_strategy_without_pairs_fails_validation() {
        let batch = load_batch_config(&MockConfig::new(&[
            ("batch", "strategies", "stat_arb"),
            ("batch", "assets", "BTC"),
        ]))
        .unwrap();
        assert!(matches!(batch.validate(), Err(ConfigError::Invalid { .. })));
    }
}
