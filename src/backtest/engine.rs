use crate::backtest::loader::PolicyLoader;
use crate::backtest::resolver::{resolve, ArchitectureRequest};
use crate::backtest::{metrics, runner};
use crate::config::Config;
use crate::env::{MarketEnvironment, SimulatedMarketEnv};
use crate::errors::{BacktestError, Result};
use crate::models::BacktestBundle;
use crate::storage::ResultsStore;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// One backtest run: resolve the policy shape, load it, drive the episode,
/// compute metrics and hand the bundle to the results store.
pub struct BacktestEngine {
    config: Config,
}

impl BacktestEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the backtest against the configured environment.
    pub async fn run(&self) -> Result<BacktestBundle> {
        let mut env = self.build_environment()?;
        self.run_with_env(&mut env).await
    }

    /// Run the backtest against a caller-provided environment.
    pub async fn run_with_env(&self, env: &mut dyn MarketEnvironment) -> Result<BacktestBundle> {
        let start_time = Utc::now();
        let run_id = Uuid::new_v4();

        info!(
            "Starting backtest {} for {} (data length {}, initial balance ${:.2})",
            run_id,
            self.config.general.symbol,
            env.data_length(),
            env.initial_balance()
        );

        // Resolution and loading happen before any simulation work.
        let observation = env.reset();
        let loader = PolicyLoader::new(&self.config.model.checkpoint_path);
        let saved = loader.read_policy_config()?;
        let request = ArchitectureRequest::from(&self.config.model);

        // The checkpoint policy always carries the resize capability.
        let resolution = resolve(&observation, &saved, &request, true)?;
        let policy = loader.load(&resolution, &saved)?;

        let trace = runner::run_episode(&policy, env)?;

        let computed = match metrics::compute(&trace) {
            Ok(m) => Some(m),
            Err(BacktestError::InsufficientTraceData(n)) => {
                warn!("Only {} portfolio samples, skipping metrics", n);
                None
            }
            Err(e) => return Err(e),
        };

        self.log_benchmark(&trace);

        let end_time = Utc::now();
        let bundle = BacktestBundle {
            run_id,
            symbol: self.config.general.symbol.clone(),
            checkpoint: self.config.model.checkpoint_path.clone(),
            architecture: resolution.architecture,
            metrics: computed,
            trace_summary: trace.summary(),
            start_time,
            end_time,
        };

        let store = ResultsStore::new(&self.config.output.results_dir);
        let saved_trace = self.config.output.save_trace.then_some(&trace);
        match store.store(&bundle, saved_trace) {
            Ok(path) => info!("Results saved to {}", path.display()),
            Err(e) => {
                if self.config.output.skip_on_error {
                    warn!("Persistence failed ({}), continuing", e);
                } else {
                    return Err(BacktestError::PersistenceFailure(e.to_string()));
                }
            }
        }

        info!(
            "Backtest {} complete in {}s, total return {:.2}%",
            run_id,
            (end_time - start_time).num_seconds(),
            bundle.trace_summary.total_return
        );

        Ok(bundle)
    }

    fn build_environment(&self) -> Result<SimulatedMarketEnv> {
        let env_config = &self.config.environment;
        match &env_config.data_file {
            Some(path) => SimulatedMarketEnv::from_json_file(
                path,
                env_config.window_size,
                env_config.initial_balance,
                env_config.transaction_fee_percent,
            ),
            None => SimulatedMarketEnv::generate(
                env_config.data_length,
                env_config.window_size,
                env_config.initial_balance,
                env_config.transaction_fee_percent,
            ),
        }
    }

    /// Compare the policy against buy-and-hold over the same price path.
    fn log_benchmark(&self, trace: &crate::models::EpisodeTrace) {
        let records = trace.records();
        let (first, last) = match (records.first(), records.last()) {
            (Some(f), Some(l)) if records.len() > 1 => (f.price, l.price),
            _ => return,
        };

        let buy_hold_return = (last - first) / first * 100.0;
        let policy_return = trace.summary().total_return;
        info!(
            "Benchmark: policy {:.2}% vs buy-and-hold {:.2}%",
            policy_return, buy_hold_return
        );
    }
}
