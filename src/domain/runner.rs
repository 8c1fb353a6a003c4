//! Batch scheduling: expands a plan into jobs and runs them on a worker pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::time::Duration;

use tracing::{debug, error, info};

use super::backtest::{CancelToken, Job, run_job};
use super::config_validation::{BatchConfig, EngineConfig};
use super::error::{ConfigError, NexoraError};
use super::params::ParameterSet;
use super::report::{Report, RunResult, RunStatus};
use super::strategy::Strategy;
use super::universe::{AssetSpec, MarketData};
use crate::ports::regime_port::RegimePort;

/// The strategy x asset (x parameter grid) cross product of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    pub strategies: Vec<Strategy>,
    pub assets: Vec<AssetSpec>,
    /// Run every grid point instead of the default parameters.
    pub sweep: bool,
}

impl JobPlan {
    pub fn from_batch(batch: &BatchConfig) -> Self {
        JobPlan {
            strategies: batch.strategies.clone(),
            assets: batch.assets.clone(),
            sweep: batch.sweep,
        }
    }

    /// Jobs in plan order, generated lazily. Paired strategies only get pair
    /// assets and the others only single assets.
    pub fn jobs(&self) -> impl Iterator<Item = Job> + '_ {
        self.strategies
            .iter()
            .flat_map(move |&strategy| {
                self.assets
                    .iter()
                    .filter(move |asset| {
                        let fits = asset.is_pair() == strategy.requires_pair();
                        if !fits {
                            debug!(%strategy, %asset, "skipping incompatible asset");
                        }
                        fits
                    })
                    .flat_map(move |asset| {
                        let params: Box<dyn Iterator<Item = ParameterSet>> = if self.sweep {
                            Box::new(strategy.parameter_grid().into_iter())
                        } else {
                            Box::new(std::iter::once(strategy.default_params()))
                        };
                        params.map(move |p| (strategy, asset.clone(), p))
                    })
            })
            .enumerate()
            .map(|(id, (strategy, asset, params))| Job {
                id,
                strategy,
                asset,
                params,
            })
    }

    pub fn job_count(&self) -> usize {
        self.jobs().count()
    }
}

/// Runs jobs on a private thread pool and merges their results.
pub struct Runner {
    config: EngineConfig,
}

impl Runner {
    /// Fails if the engine config is invalid, before anything runs.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Runner { config })
    }

    /// Runs the whole plan with the configured timeout.
    pub fn run(
        &self,
        plan: &JobPlan,
        data: &MarketData,
        regimes: Option<&dyn RegimePort>,
    ) -> Result<Report, NexoraError> {
        let cancel = CancelToken::with_timeout(self.config.timeout_secs.map(Duration::from_secs));
        self.run_with_cancel(plan, data, regimes, &cancel)
    }

    /// Runs the whole plan. Results are merged into the report as each run
    /// finishes; the call returns once every run has finished. Cancelling
    /// `cancel` stops runs at their next bar.
    pub fn run_with_cancel(
        &self,
        plan: &JobPlan,
        data: &MarketData,
        regimes: Option<&dyn RegimePort>,
        cancel: &CancelToken,
    ) -> Result<Report, NexoraError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("nexora-worker-{i}"))
            .build()
            .map_err(|e| NexoraError::WorkerPool {
                reason: e.to_string(),
            })?;

        let total = plan.job_count();
        info!(jobs = total, workers = self.config.workers, "batch started");

        let config = &self.config;
        let (tx, rx) = mpsc::channel::<RunResult>();

        let report = pool.in_place_scope(|scope| {
            for job in plan.jobs() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let result = run_contained(&job, data, regimes, config, cancel);
                    if tx.send(result).is_err() {
                        error!(job = job.id, "result channel closed");
                    }
                });
            }
            drop(tx);

            let mut report = Report::new();
            for (done, result) in rx.into_iter().enumerate() {
                debug!(run = %result.key, done = done + 1, total, "run merged");
                report.insert(result);
            }
            report
        });

        info!(
            runs = report.len(),
            completed = report.count_by_status(RunStatus::Completed),
            halted = report.count_by_status(RunStatus::Halted),
            failed = report.count_by_status(RunStatus::Failed),
            "batch finished"
        );
        Ok(report)
    }
}

/// A panicking strategy fails its own run, not the batch.
fn run_contained(
    job: &Job,
    data: &MarketData,
    regimes: Option<&dyn RegimePort>,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> RunResult {
    catch_unwind(AssertUnwindSafe(|| run_job(job, data, regimes, config, cancel))).unwrap_or_else(
        |_| {
            error!(run = %job.key(), "run panicked");
            RunResult::failed(job.key(), config.initial_capital, "run panicked")
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::test_support::bars_from_closes;

    fn plan(strategies: &[Strategy], assets: &str, sweep: bool) -> JobPlan {
        JobPlan {
            strategies: strategies.to_vec(),
            assets: crate::domain::universe::parse_assets(assets).unwrap(),
            sweep,
        }
    }

    #[test]
    fn default_params_give_one_job_per_compatible_pair() {
        let plan = plan(
            &[Strategy::TrendFollowing, Strategy::StatisticalArbitrage],
            "BTC,ETH,ETH/BTC",
            false,
        );
        let jobs: Vec<Job> = plan.jobs().collect();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[2].strategy, Strategy::StatisticalArbitrage);
        assert_eq!(jobs[2].asset.to_string(), "ETH/BTC");
        let ids: Vec<usize> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn sweep_expands_grids() {
        let plan = plan(&[Strategy::TrendFollowing, Strategy::MeanReversion], "BTC", true);
        assert_eq!(plan.job_count(), 9 + 9);
    }

    #[test]
    fn job_generation_is_restartable() {
        let plan = plan(&[Strategy::MeanReversion], "BTC,ETH", true);
        let first: Vec<Job> = plan.jobs().collect();
        let second: Vec<Job> = plan.jobs().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(Runner::new(config).is_err());
    }

    #[test]
    fn runs_every_job_into_the_report() {
        let mut data = MarketData::default();
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.3).sin() * 10.0).collect();
        data.insert("BTC", bars_from_closes("BTC", &closes));
        data.insert("ETH", bars_from_closes("ETH", &closes));
        let runner = Runner::new(EngineConfig {
            workers: 2,
            ..EngineConfig::default()
        })
        .unwrap();
        let plan = plan(&[Strategy::MeanReversion, Strategy::Flat], "BTC,ETH", false);
        let report = runner.run(&plan, &data, None).unwrap();
        assert_eq!(report.len(), 4);
        assert!(!report.any_failed());
        assert!(report.is_consistent(1e-9));
    }
}
