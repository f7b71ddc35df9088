use crate::env::MarketEnvironment;
use crate::errors::{BacktestError, Result};
use crate::models::{EpisodeTrace, StepRecord};
use crate::policy::Policy;
use tracing::info;

/// Drive one full evaluation episode and collect its trace.
///
/// The loop queries the policy for a deterministic action, applies it to
/// the environment and appends one record per step. It stops when the
/// environment reports done or when the step counter reaches
/// `data_length - 1`; the last index has no next state. Nothing is retried
/// in here: any policy or environment error aborts the run and the partial
/// trace is dropped with it.
pub fn run_episode(
    policy: &dyn Policy,
    env: &mut dyn MarketEnvironment,
) -> Result<EpisodeTrace> {
    let data_length = env.data_length();
    let mut trace = EpisodeTrace::with_capacity(data_length, env.initial_balance());

    let mut observation = env.reset();
    let mut done = false;
    let mut step = 0;

    while !done && step + 1 < data_length {
        let action = policy
            .select_action(&observation, true)
            .map_err(|e| BacktestError::SimulationFailure {
                step,
                reason: e.to_string(),
            })?;

        let outcome = env
            .step(action)
            .map_err(|e| BacktestError::SimulationFailure {
                step,
                reason: e.to_string(),
            })?;

        trace.push(StepRecord {
            action,
            reward: outcome.reward,
            portfolio_value: outcome.info.portfolio_value,
            price: outcome.info.current_price,
            position: outcome.info.position,
            balance: outcome.info.balance,
            shares_held: outcome.info.shares_held,
        });

        observation = outcome.observation;
        done = outcome.done;
        step += 1;

        if step % 100 == 0 {
            info!(
                "Step {}: portfolio ${:.2}, price ${:.2}, position {}",
                step,
                outcome.info.portfolio_value,
                outcome.info.current_price,
                outcome.info.position
            );
        }
    }

    let summary = trace.summary();
    info!(
        "Episode finished after {} steps, final portfolio ${:.2}",
        summary.total_steps, summary.final_value
    );

    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Observation, StepInfo, StepOutcome};
    use crate::models::{Architecture, PositionLabel};
    use ndarray::Array1;
    use std::path::Path;

    struct ConstantPolicy(f64);

    impl Policy for ConstantPolicy {
        fn architecture(&self) -> Architecture {
            Architecture::Mlp
        }

        fn select_action(&self, _observation: &Observation, _evaluate: bool) -> Result<f64> {
            Ok(self.0)
        }

        fn load(&mut self, _checkpoint_dir: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct FailingPolicy;

    impl Policy for FailingPolicy {
        fn architecture(&self) -> Architecture {
            Architecture::Mlp
        }

        fn select_action(&self, _observation: &Observation, _evaluate: bool) -> Result<f64> {
            Err(BacktestError::EnvironmentError("nan state".to_string()))
        }

        fn load(&mut self, _checkpoint_dir: &Path) -> Result<()> {
            Ok(())
        }
    }

    /// Scripted environment that terminates after a fixed number of steps.
    struct ScriptedEnv {
        length: usize,
        terminate_after: Option<usize>,
        steps: usize,
    }

    impl ScriptedEnv {
        fn new(length: usize, terminate_after: Option<usize>) -> Self {
            Self {
                length,
                terminate_after,
                steps: 0,
            }
        }
    }

    impl MarketEnvironment for ScriptedEnv {
        fn reset(&mut self) -> Observation {
            self.steps = 0;
            Observation::Flat(Array1::zeros(4))
        }

        fn step(&mut self, action: f64) -> Result<StepOutcome> {
            self.steps += 1;
            let done = self
                .terminate_after
                .map(|n| self.steps >= n)
                .unwrap_or(false);
            Ok(StepOutcome {
                observation: Observation::Flat(Array1::zeros(4)),
                reward: 0.0,
                done,
                info: StepInfo {
                    portfolio_value: 10_000.0 + self.steps as f64,
                    current_price: 100.0,
                    position: if action > 0.1 {
                        PositionLabel::Buy
                    } else {
                        PositionLabel::Hold
                    },
                    balance: 10_000.0,
                    shares_held: 0.0,
                },
            })
        }

        fn data_length(&self) -> usize {
            self.length
        }

        fn initial_balance(&self) -> f64 {
            10_000.0
        }

        fn feature_dim(&self) -> usize {
            4
        }
    }

    #[test]
    fn test_runs_to_data_length_bound() {
        let mut env = ScriptedEnv::new(10, None);
        let trace = run_episode(&ConstantPolicy(0.0), &mut env).unwrap();
        // The last index is never steppable.
        assert_eq!(trace.len(), 9);
    }

    #[test]
    fn test_done_flag_stops_early() {
        let mut env = ScriptedEnv::new(100, Some(7));
        let trace = run_episode(&ConstantPolicy(0.5), &mut env).unwrap();
        assert_eq!(trace.len(), 7);
        assert_eq!(trace.records()[0].position, PositionLabel::Buy);
    }

    #[test]
    fn test_immediate_termination_yields_empty_trace() {
        let mut env = ScriptedEnv::new(1, None);
        let trace = run_episode(&ConstantPolicy(0.0), &mut env).unwrap();
        assert!(trace.is_empty());

        let summary = trace.summary();
        assert_eq!(summary.total_return, 0.0);
        assert_eq!(summary.initial_value, 10_000.0);
    }

    #[test]
    fn test_policy_error_aborts_as_simulation_failure() {
        let mut env = ScriptedEnv::new(10, None);
        let err = run_episode(&FailingPolicy, &mut env).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::SimulationFailure { step: 0, .. }
        ));
    }

    #[test]
    fn test_records_follow_environment_info() {
        let mut env = ScriptedEnv::new(5, None);
        let trace = run_episode(&ConstantPolicy(0.0), &mut env).unwrap();
        let values: Vec<f64> = trace.portfolio_values();
        assert_eq!(values, vec![10_001.0, 10_002.0, 10_003.0, 10_004.0]);
    }
}
