pub mod checkpoint;

pub use checkpoint::CheckpointPolicy;

use crate::env::Observation;
use crate::errors::{BacktestError, Result};
use crate::models::Architecture;
use std::path::Path;

/// Trained policy collaborator queried by the episode runner.
///
/// Resize support is an explicit capability on the type, not a probe: a
/// policy that cannot adapt persisted weights to a different shape reports
/// `supports_resize() == false` and the default `load_with_resize` fails.
pub trait Policy {
    fn architecture(&self) -> Architecture;

    /// Select an action for the observation. With `evaluate` set the
    /// action is deterministic (no exploration noise).
    fn select_action(&self, observation: &Observation, evaluate: bool) -> Result<f64>;

    /// Load persisted parameters; shapes must match exactly.
    fn load(&mut self, checkpoint_dir: &Path) -> Result<()>;

    fn supports_resize(&self) -> bool {
        false
    }

    /// Load persisted parameters, adapting mismatched weight tensors to
    /// this policy's shape.
    fn load_with_resize(&mut self, _checkpoint_dir: &Path) -> Result<()> {
        Err(BacktestError::LoadIncompatible(
            "policy does not support resize loading".to_string(),
        ))
    }
}
