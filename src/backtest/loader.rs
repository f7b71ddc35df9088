use crate::backtest::resolver::Resolution;
use crate::errors::{BacktestError, Result};
use crate::models::{CompatAction, PolicyConfig};
use crate::policy::{CheckpointPolicy, Policy};
use std::path::PathBuf;
use tracing::{info, warn};

/// Constructs the policy implied by a shape resolution and loads its
/// persisted parameters, honoring the compatibility plan.
pub struct PolicyLoader {
    checkpoint_dir: PathBuf,
}

impl PolicyLoader {
    pub fn new<P: Into<PathBuf>>(checkpoint_dir: P) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
        }
    }

    /// Read the persisted policy descriptor.
    pub fn read_policy_config(&self) -> Result<PolicyConfig> {
        CheckpointPolicy::read_config(&self.checkpoint_dir)
    }

    /// Build the resolved policy and load its weights.
    ///
    /// The load plan was decided by the resolver: `ResizeLoad` goes
    /// straight to the adaptation path, `Proceed` tries a direct load with
    /// one resize retry on shape failure, `Reject` fails outright. Either
    /// a fully loaded policy comes back or an error does.
    pub fn load(&self, resolution: &Resolution, saved: &PolicyConfig) -> Result<CheckpointPolicy> {
        info!(
            "Loading {} policy from {}",
            resolution.architecture,
            self.checkpoint_dir.display()
        );

        let mut policy = CheckpointPolicy::new(
            resolution.architecture,
            resolution.state_dim,
            saved.action_dim,
            saved.hidden_dim,
            resolution.input_shape,
        );

        match resolution.report.action {
            CompatAction::Reject => Err(BacktestError::LoadIncompatible(
                "persisted shape disagrees with the environment and no resize path exists"
                    .to_string(),
            )),
            CompatAction::ResizeLoad => {
                if !policy.supports_resize() {
                    return Err(BacktestError::LoadIncompatible(
                        "resize load planned but the policy does not support it".to_string(),
                    ));
                }
                policy.load_with_resize(&self.checkpoint_dir)?;
                info!("Policy loaded via resize adaptation");
                Ok(policy)
            }
            CompatAction::Proceed => match policy.load(&self.checkpoint_dir) {
                Ok(()) => {
                    info!("Policy loaded");
                    Ok(policy)
                }
                Err(e) if policy.supports_resize() => {
                    // One retry through the resize path, then give up.
                    warn!("Direct load failed ({}), retrying with resize", e);
                    policy.load_with_resize(&self.checkpoint_dir)?;
                    info!("Policy loaded via resize adaptation after retry");
                    Ok(policy)
                }
                Err(e) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::resolver::{resolve, ArchitectureRequest};
    use crate::env::Observation;
    use crate::models::Architecture;
    use ndarray::{Array1, Array2};
    use serde_json::json;
    use std::fs;
    use std::path::Path;

    fn write_checkpoint(dir: &Path, config: &PolicyConfig, state_dim: usize) {
        fs::write(
            dir.join(crate::policy::checkpoint::CONFIG_FILE),
            serde_json::to_string(config).unwrap(),
        )
        .unwrap();
        let weight: Vec<f64> = (0..state_dim).map(|i| (i as f64) * 0.01).collect();
        fs::write(
            dir.join(crate::policy::checkpoint::WEIGHTS_FILE),
            json!({ "weight": [weight], "bias": [0.0] }).to_string(),
        )
        .unwrap();
    }

    fn structured_obs(window: usize, features: usize, portfolio_dim: usize) -> Observation {
        Observation::Structured {
            market: Array2::zeros((window, features)),
            portfolio: Array1::zeros(portfolio_dim),
        }
    }

    #[test]
    fn test_direct_load_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PolicyConfig {
            use_cnn: true,
            input_shape: Some((10, 3)),
            ..Default::default()
        };
        write_checkpoint(dir.path(), &saved, 10 * 3 + 3);

        let obs = structured_obs(10, 3, 3);
        let resolution =
            resolve(&obs, &saved, &ArchitectureRequest::default(), true).unwrap();
        let policy = PolicyLoader::new(dir.path()).load(&resolution, &saved).unwrap();

        assert_eq!(policy.architecture(), Architecture::Cnn);
        assert_eq!(policy.state_dim(), 33);
        assert_eq!(policy.hidden_dim(), 256);
        assert_eq!(policy.input_shape(), Some((10, 3)));
    }

    #[test]
    fn test_planned_resize_load_on_feature_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PolicyConfig {
            use_cnn: true,
            input_shape: Some((10, 5)),
            ..Default::default()
        };
        // Weights match the persisted 10x5 shape.
        write_checkpoint(dir.path(), &saved, 10 * 5 + 3);

        // Live environment has 3 features, not 5.
        let obs = structured_obs(10, 3, 3);
        let resolution =
            resolve(&obs, &saved, &ArchitectureRequest::default(), true).unwrap();
        assert_eq!(resolution.report.action, CompatAction::ResizeLoad);

        let policy = PolicyLoader::new(dir.path()).load(&resolution, &saved).unwrap();
        assert_eq!(policy.state_dim(), 10 * 5 + 3);
    }

    #[test]
    fn test_direct_load_failure_retries_with_resize() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PolicyConfig {
            state_dim: Some(20),
            ..Default::default()
        };
        // Weights persisted with a different width than the descriptor says.
        write_checkpoint(dir.path(), &saved, 24);

        let obs = Observation::Flat(Array1::zeros(20));
        let resolution =
            resolve(&obs, &saved, &ArchitectureRequest::default(), true).unwrap();
        assert_eq!(resolution.report.action, CompatAction::Proceed);

        // Direct load fails on shape, resize retry truncates to 20.
        let policy = PolicyLoader::new(dir.path()).load(&resolution, &saved).unwrap();
        assert_eq!(policy.state_dim(), 20);
    }

    #[test]
    fn test_missing_checkpoint_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PolicyConfig::default();

        let obs = Observation::Flat(Array1::zeros(8));
        let resolution =
            resolve(&obs, &saved, &ArchitectureRequest::default(), true).unwrap();
        let err = PolicyLoader::new(dir.path())
            .load(&resolution, &saved)
            .unwrap_err();
        assert!(matches!(err, BacktestError::LoadCorrupt(_)));
    }

    #[test]
    fn test_reject_maps_to_load_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PolicyConfig {
            use_lstm: true,
            input_shape: Some((10, 5)),
            ..Default::default()
        };
        write_checkpoint(dir.path(), &saved, 10 * 5 + 3);

        let obs = structured_obs(10, 3, 3);
        let resolution =
            resolve(&obs, &saved, &ArchitectureRequest::default(), false).unwrap();
        assert_eq!(resolution.report.action, CompatAction::Reject);

        let err = PolicyLoader::new(dir.path())
            .load(&resolution, &saved)
            .unwrap_err();
        assert!(matches!(err, BacktestError::LoadIncompatible(_)));
    }
}
