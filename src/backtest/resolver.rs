use crate::config::ModelConfig;
use crate::env::Observation;
use crate::errors::{BacktestError, Result};
use crate::models::{
    Architecture, CompatAction, CompatibilityReport, ObservationVariant, PolicyConfig,
};
use tracing::{error, info, warn};

/// Architecture flags requested on the command line or in the run config.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArchitectureRequest {
    pub use_cnn: bool,
    pub use_lstm: bool,
    pub use_state_space: bool,
    pub use_transformer: bool,
}

impl From<&ModelConfig> for ArchitectureRequest {
    fn from(model: &ModelConfig) -> Self {
        Self {
            use_cnn: model.use_cnn,
            use_lstm: model.use_lstm,
            use_state_space: model.use_state_space,
            use_transformer: model.use_transformer,
        }
    }
}

impl ArchitectureRequest {
    fn flag_count(&self) -> usize {
        [
            self.use_cnn,
            self.use_lstm,
            self.use_state_space,
            self.use_transformer,
        ]
        .iter()
        .filter(|&&f| f)
        .count()
    }
}

/// Outcome of shape resolution: everything the loader needs to construct
/// the policy and plan the load.
#[derive(Clone, Copy, Debug)]
pub struct Resolution {
    pub variant: ObservationVariant,
    pub architecture: Architecture,
    /// Authoritative state dimension the policy is built with.
    pub state_dim: usize,
    /// Authoritative (window, features), persisted shape preferred.
    pub input_shape: Option<(usize, usize)>,
    pub report: CompatibilityReport,
}

/// Classify the reset observation into its shape variant.
pub fn observation_variant(observation: &Observation) -> ObservationVariant {
    match observation {
        Observation::Flat(v) => ObservationVariant::Flat { dim: v.len() },
        Observation::Structured { market, portfolio } => ObservationVariant::Structured {
            window: market.nrows(),
            features: market.ncols(),
            portfolio_dim: portfolio.len(),
        },
    }
}

/// Resolve the active architecture and the compatibility of the persisted
/// policy config against the live observation shape.
///
/// `resize_available` states whether the policy type that will be
/// constructed can adapt mismatched weight tensors.
pub fn resolve(
    observation: &Observation,
    saved: &PolicyConfig,
    requested: &ArchitectureRequest,
    resize_available: bool,
) -> Result<Resolution> {
    if requested.flag_count() > 1 {
        return Err(BacktestError::ArchitectureConflict(
            "only one of CNN, LSTM, StateSpace and Transformer may be requested".to_string(),
        ));
    }

    let variant = observation_variant(observation);

    // Requested flags merge with the persisted ones; the priority order
    // Transformer > StateSpace > LSTM > CNN > MLP picks the winner.
    let architecture = Architecture::from_flags(
        requested.use_transformer || saved.use_transformer,
        requested.use_state_space || saved.use_state_space,
        requested.use_lstm || saved.use_lstm,
        requested.use_cnn || saved.use_cnn,
    );

    let mut report = CompatibilityReport {
        feature_dim_match: true,
        window_dim_match: true,
        state_dim_match: true,
        action: CompatAction::Proceed,
    };

    let (state_dim, input_shape) = match variant {
        ObservationVariant::Structured {
            window,
            features,
            portfolio_dim,
        } => {
            if architecture.is_windowed() {
                if let Some(saved_features) = saved.saved_features() {
                    if saved_features != features {
                        error!(
                            "Feature dimension mismatch: checkpoint has {}, environment has {}",
                            saved_features, features
                        );
                        report.feature_dim_match = false;
                        report.action = if resize_available {
                            info!("Resize loading available, planning adapted load");
                            CompatAction::ResizeLoad
                        } else {
                            CompatAction::Reject
                        };
                    }
                }

                if let Some(saved_window) = saved.saved_window() {
                    if saved_window != window {
                        // Window mismatch is handled adaptively downstream.
                        warn!(
                            "Window size mismatch: checkpoint has {}, environment has {}",
                            saved_window, window
                        );
                        report.window_dim_match = false;
                    }
                }
            }

            // The learned weights are shape-locked to the persisted input
            // shape, so it wins over the live one.
            let shape = saved.input_shape.unwrap_or((window, features));
            (shape.0 * shape.1 + portfolio_dim, Some(shape))
        }
        ObservationVariant::Flat { dim } => {
            if architecture.is_windowed() {
                match saved.input_shape {
                    Some(shape) => (shape.0 * shape.1, Some(shape)),
                    None => {
                        return Err(BacktestError::ConfigError(format!(
                            "{} requires a windowed observation or a persisted input shape",
                            architecture
                        )));
                    }
                }
            } else {
                let state_dim = match saved.state_dim {
                    Some(saved_dim) if saved_dim != dim => {
                        warn!(
                            "State dimension mismatch: checkpoint has {}, environment has {}; \
                             using the persisted dimension",
                            saved_dim, dim
                        );
                        report.state_dim_match = false;
                        saved_dim
                    }
                    Some(saved_dim) => saved_dim,
                    None => dim,
                };
                (state_dim, None)
            }
        }
    };

    info!(
        "Resolved {} policy, state dim {}, compatibility {:?}",
        architecture, state_dim, report.action
    );

    Ok(Resolution {
        variant,
        architecture,
        state_dim,
        input_shape,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn structured_obs(window: usize, features: usize, portfolio_dim: usize) -> Observation {
        Observation::Structured {
            market: Array2::zeros((window, features)),
            portfolio: Array1::zeros(portfolio_dim),
        }
    }

    fn flat_obs(dim: usize) -> Observation {
        Observation::Flat(Array1::zeros(dim))
    }

    #[test]
    fn test_structured_variant_and_state_dim() {
        let obs = structured_obs(30, 12, 3);
        let resolution = resolve(
            &obs,
            &PolicyConfig::default(),
            &ArchitectureRequest::default(),
            true,
        )
        .unwrap();

        assert_eq!(
            resolution.variant,
            ObservationVariant::Structured {
                window: 30,
                features: 12,
                portfolio_dim: 3
            }
        );
        assert_eq!(resolution.variant.effective_state_dim(), 363);
    }

    #[test]
    fn test_conflicting_request_rejected() {
        let request = ArchitectureRequest {
            use_cnn: true,
            use_lstm: true,
            ..Default::default()
        };
        let err = resolve(&flat_obs(10), &PolicyConfig::default(), &request, true).unwrap_err();
        assert!(matches!(err, BacktestError::ArchitectureConflict(_)));
    }

    #[test]
    fn test_requested_transformer_wins_over_saved_cnn() {
        let saved = PolicyConfig {
            use_cnn: true,
            input_shape: Some((30, 12)),
            ..Default::default()
        };
        let request = ArchitectureRequest {
            use_transformer: true,
            ..Default::default()
        };
        let resolution = resolve(&structured_obs(30, 12, 3), &saved, &request, true).unwrap();
        assert_eq!(resolution.architecture, Architecture::Transformer);
    }

    #[test]
    fn test_feature_mismatch_plans_resize_load() {
        let saved = PolicyConfig {
            use_cnn: true,
            input_shape: Some((30, 8)),
            ..Default::default()
        };
        let resolution = resolve(
            &structured_obs(30, 12, 3),
            &saved,
            &ArchitectureRequest::default(),
            true,
        )
        .unwrap();

        assert!(!resolution.report.feature_dim_match);
        assert_eq!(resolution.report.action, CompatAction::ResizeLoad);
        // The persisted shape stays authoritative.
        assert_eq!(resolution.input_shape, Some((30, 8)));
        assert_eq!(resolution.state_dim, 30 * 8 + 3);
    }

    #[test]
    fn test_feature_mismatch_without_resize_rejects() {
        let saved = PolicyConfig {
            use_lstm: true,
            input_shape: Some((30, 8)),
            ..Default::default()
        };
        let resolution = resolve(
            &structured_obs(30, 12, 3),
            &saved,
            &ArchitectureRequest::default(),
            false,
        )
        .unwrap();
        assert_eq!(resolution.report.action, CompatAction::Reject);
    }

    #[test]
    fn test_window_mismatch_is_warning_only() {
        let saved = PolicyConfig {
            use_cnn: true,
            input_shape: Some((20, 12)),
            ..Default::default()
        };
        let resolution = resolve(
            &structured_obs(30, 12, 3),
            &saved,
            &ArchitectureRequest::default(),
            true,
        )
        .unwrap();

        assert!(!resolution.report.window_dim_match);
        assert!(resolution.report.feature_dim_match);
        assert_eq!(resolution.report.action, CompatAction::Proceed);
        assert_eq!(resolution.state_dim, 20 * 12 + 3);
    }

    #[test]
    fn test_flat_mismatch_prefers_persisted_dim() {
        let saved = PolicyConfig {
            state_dim: Some(48),
            ..Default::default()
        };
        let resolution = resolve(
            &flat_obs(40),
            &saved,
            &ArchitectureRequest::default(),
            true,
        )
        .unwrap();

        assert!(!resolution.report.state_dim_match);
        assert_eq!(resolution.report.action, CompatAction::Proceed);
        assert_eq!(resolution.state_dim, 48);
    }

    #[test]
    fn test_windowed_arch_on_flat_obs_needs_persisted_shape() {
        let saved = PolicyConfig {
            use_cnn: true,
            ..Default::default()
        };
        let err = resolve(
            &flat_obs(40),
            &saved,
            &ArchitectureRequest::default(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::ConfigError(_)));
    }

    #[test]
    fn test_selection_is_idempotent() {
        let obs = structured_obs(30, 12, 3);
        let saved = PolicyConfig {
            use_lstm: true,
            input_shape: Some((30, 12)),
            ..Default::default()
        };
        let request = ArchitectureRequest {
            use_transformer: true,
            ..Default::default()
        };

        let first = resolve(&obs, &saved, &request, true).unwrap();
        let second = resolve(&obs, &saved, &request, true).unwrap();
        assert_eq!(first.architecture, Architecture::Transformer);
        assert_eq!(second.architecture, first.architecture);
        assert_eq!(second.state_dim, first.state_dim);
    }
}
