use crate::env::Observation;
use crate::errors::{BacktestError, Result};
use crate::models::{Architecture, PolicyConfig};
use crate::policy::Policy;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "weights.json";

/// Persisted weight tensors of the evaluation head.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointWeights {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

/// Deterministic evaluation policy restored from a checkpoint directory.
///
/// The architecture tag and input shape follow the persisted config; the
/// action is a bounded linear head over the flattened observation. The
/// state dimension is fixed at construction, so direct loads verify shapes
/// and resize loads truncate or zero-pad to fit.
#[derive(Debug)]
pub struct CheckpointPolicy {
    architecture: Architecture,
    state_dim: usize,
    action_dim: usize,
    hidden_dim: usize,
    input_shape: Option<(usize, usize)>,
    weight: Array2<f64>,
    bias: Array1<f64>,
}

impl CheckpointPolicy {
    pub fn new(
        architecture: Architecture,
        state_dim: usize,
        action_dim: usize,
        hidden_dim: usize,
        input_shape: Option<(usize, usize)>,
    ) -> Self {
        Self {
            architecture,
            state_dim,
            action_dim,
            hidden_dim,
            input_shape,
            weight: Array2::zeros((action_dim, state_dim)),
            bias: Array1::zeros(action_dim),
        }
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub fn input_shape(&self) -> Option<(usize, usize)> {
        self.input_shape
    }

    /// Read the persisted policy descriptor from a checkpoint directory.
    /// A missing descriptor degrades to defaults; an unreadable one is a
    /// corrupt checkpoint.
    pub fn read_config(checkpoint_dir: &Path) -> Result<PolicyConfig> {
        let path = checkpoint_dir.join(CONFIG_FILE);
        if !path.exists() {
            warn!(
                "No policy config at {}, using defaults",
                path.display()
            );
            return Ok(PolicyConfig::default());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| BacktestError::LoadCorrupt(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| BacktestError::LoadCorrupt(format!("{}: {}", path.display(), e)))
    }

    fn read_weights(checkpoint_dir: &Path) -> Result<CheckpointWeights> {
        let path = checkpoint_dir.join(WEIGHTS_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|e| BacktestError::LoadCorrupt(format!("{}: {}", path.display(), e)))?;
        let weights: CheckpointWeights = serde_json::from_str(&content)
            .map_err(|e| BacktestError::LoadCorrupt(format!("{}: {}", path.display(), e)))?;

        let cols = weights.weight.first().map(|r| r.len()).unwrap_or(0);
        if weights.weight.iter().any(|r| r.len() != cols) {
            return Err(BacktestError::LoadCorrupt(format!(
                "{}: ragged weight matrix",
                path.display()
            )));
        }

        Ok(weights)
    }
}

impl Policy for CheckpointPolicy {
    fn architecture(&self) -> Architecture {
        self.architecture
    }

    fn select_action(&self, observation: &Observation, _evaluate: bool) -> Result<f64> {
        let flat = observation.flatten();

        // Window mismatches are handled adaptively: align the state vector
        // to the trained dimension, padding missing entries with zeros.
        let mut x = Array1::zeros(self.state_dim);
        for (i, v) in flat.iter().take(self.state_dim).enumerate() {
            x[i] = *v;
        }

        let y = self.weight.dot(&x) + &self.bias;
        Ok(y[0].tanh())
    }

    fn load(&mut self, checkpoint_dir: &Path) -> Result<()> {
        let weights = Self::read_weights(checkpoint_dir)?;

        let rows = weights.weight.len();
        let cols = weights.weight.first().map(|r| r.len()).unwrap_or(0);
        if rows != self.action_dim || cols != self.state_dim || weights.bias.len() != self.action_dim
        {
            return Err(BacktestError::LoadIncompatible(format!(
                "checkpoint weights are {}x{}, policy expects {}x{}",
                rows, cols, self.action_dim, self.state_dim
            )));
        }

        let flat: Vec<f64> = weights.weight.into_iter().flatten().collect();
        self.weight = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| BacktestError::LoadCorrupt(e.to_string()))?;
        self.bias = Array1::from_vec(weights.bias);

        Ok(())
    }

    fn supports_resize(&self) -> bool {
        true
    }

    fn load_with_resize(&mut self, checkpoint_dir: &Path) -> Result<()> {
        let weights = Self::read_weights(checkpoint_dir)?;

        let rows = weights.weight.len();
        let cols = weights.weight.first().map(|r| r.len()).unwrap_or(0);
        warn!(
            "Resizing checkpoint weights from {}x{} to {}x{}",
            rows, cols, self.action_dim, self.state_dim
        );

        let mut weight = Array2::zeros((self.action_dim, self.state_dim));
        for (i, row) in weights.weight.iter().take(self.action_dim).enumerate() {
            for (j, v) in row.iter().take(self.state_dim).enumerate() {
                weight[[i, j]] = *v;
            }
        }

        let mut bias = Array1::zeros(self.action_dim);
        for (i, v) in weights.bias.iter().take(self.action_dim).enumerate() {
            bias[i] = *v;
        }

        self.weight = weight;
        self.bias = bias;

        Ok(())
    }
}
