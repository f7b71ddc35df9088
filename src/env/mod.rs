pub mod sim;

pub use sim::SimulatedMarketEnv;

use crate::errors::Result;
use crate::models::PositionLabel;
use ndarray::{Array1, Array2};

/// Observation handed to the policy at each step.
///
/// Windowed environments emit a 2-D market block plus a 1-D portfolio
/// state; flat environments emit a single vector.
#[derive(Clone, Debug)]
pub enum Observation {
    Flat(Array1<f64>),
    Structured {
        market: Array2<f64>,
        portfolio: Array1<f64>,
    },
}

impl Observation {
    /// Flatten into a single state vector (market block row-major, then
    /// portfolio state).
    pub fn flatten(&self) -> Array1<f64> {
        match self {
            Observation::Flat(v) => v.clone(),
            Observation::Structured { market, portfolio } => {
                let mut out = Vec::with_capacity(market.len() + portfolio.len());
                out.extend(market.iter().copied());
                out.extend(portfolio.iter().copied());
                Array1::from_vec(out)
            }
        }
    }
}

/// Info bundle returned with every environment step.
#[derive(Clone, Copy, Debug)]
pub struct StepInfo {
    pub portfolio_value: f64,
    pub current_price: f64,
    pub position: PositionLabel,
    pub balance: f64,
    pub shares_held: f64,
}

#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    pub info: StepInfo,
}

/// Market environment collaborator driven by the episode runner.
pub trait MarketEnvironment {
    /// Reset to the start of the data and return the first observation.
    fn reset(&mut self) -> Observation;

    /// Apply an action and advance one step.
    fn step(&mut self, action: f64) -> Result<StepOutcome>;

    fn data_length(&self) -> usize;

    fn initial_balance(&self) -> f64;

    fn feature_dim(&self) -> usize;
}
