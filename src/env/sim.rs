use crate::env::{MarketEnvironment, Observation, StepInfo, StepOutcome};
use crate::errors::{BacktestError, Result};
use crate::models::PositionLabel;
use ndarray::{s, Array1, Array2};
use std::fs;
use std::path::Path;
use tracing::info;

/// Actions below this magnitude are treated as hold.
const ACTION_THRESHOLD: f64 = 0.1;

/// Deterministic single-symbol trading environment over a price series.
///
/// Emits structured (window x features + portfolio) observations when
/// `window_size > 1`, flat vectors otherwise. Execution is long-only: a
/// positive action buys with a fraction of cash, a negative action sells a
/// fraction of holdings, both net of a transaction fee.
pub struct SimulatedMarketEnv {
    prices: Vec<f64>,
    features: Array2<f64>,
    window_size: usize,
    initial_balance: f64,
    transaction_fee_percent: f64,
    balance: f64,
    shares_held: f64,
    index: usize,
    prev_value: f64,
    done: bool,
}

impl SimulatedMarketEnv {
    pub fn new(
        prices: Vec<f64>,
        window_size: usize,
        initial_balance: f64,
        transaction_fee_percent: f64,
    ) -> Result<Self> {
        if prices.len() <= window_size {
            return Err(BacktestError::EnvironmentError(format!(
                "price series of {} points cannot fill a window of {}",
                prices.len(),
                window_size
            )));
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(BacktestError::EnvironmentError(
                "price series must be strictly positive".to_string(),
            ));
        }

        let features = Self::build_features(&prices);

        Ok(Self {
            prices,
            features,
            window_size,
            initial_balance,
            transaction_fee_percent,
            balance: initial_balance,
            shares_held: 0.0,
            index: window_size,
            prev_value: initial_balance,
            done: false,
        })
    }

    /// Load a price series from a JSON array file.
    pub fn from_json_file<P: AsRef<Path>>(
        path: P,
        window_size: usize,
        initial_balance: f64,
        transaction_fee_percent: f64,
    ) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let prices: Vec<f64> = serde_json::from_str(&content)?;
        info!(
            "Loaded {} price points from {}",
            prices.len(),
            path.as_ref().display()
        );
        Self::new(prices, window_size, initial_balance, transaction_fee_percent)
    }

    /// Generate a deterministic price series for dry runs and tests.
    pub fn generate(
        length: usize,
        window_size: usize,
        initial_balance: f64,
        transaction_fee_percent: f64,
    ) -> Result<Self> {
        let prices: Vec<f64> = (0..length)
            .map(|i| {
                let t = i as f64;
                100.0 * (1.0 + 0.0005 * t) + 3.0 * (t * 0.25).sin()
            })
            .collect();
        Self::new(prices, window_size, initial_balance, transaction_fee_percent)
    }

    /// Per-row market features: normalized price, one-step return, distance
    /// from the 5-point moving average.
    fn build_features(prices: &[f64]) -> Array2<f64> {
        let n = prices.len();
        let base = prices[0];
        let mut features = Array2::zeros((n, 3));

        for i in 0..n {
            features[[i, 0]] = prices[i] / base - 1.0;
            features[[i, 1]] = if i > 0 {
                (prices[i] - prices[i - 1]) / prices[i - 1]
            } else {
                0.0
            };
            let lo = i.saturating_sub(4);
            let sma: f64 = prices[lo..=i].iter().sum::<f64>() / (i - lo + 1) as f64;
            features[[i, 2]] = prices[i] / sma - 1.0;
        }

        features
    }

    fn portfolio_state(&self) -> Array1<f64> {
        let price = self.prices[self.index];
        Array1::from_vec(vec![
            self.balance / self.initial_balance,
            self.shares_held * price / self.initial_balance,
            if self.shares_held > 0.0 { 1.0 } else { 0.0 },
        ])
    }

    fn observation(&self) -> Observation {
        let market = self
            .features
            .slice(s![self.index - self.window_size..self.index, ..])
            .to_owned();

        if self.window_size > 1 {
            Observation::Structured {
                market,
                portfolio: self.portfolio_state(),
            }
        } else {
            let mut flat: Vec<f64> = market.iter().copied().collect();
            flat.extend(self.portfolio_state().iter().copied());
            Observation::Flat(Array1::from_vec(flat))
        }
    }
}

impl MarketEnvironment for SimulatedMarketEnv {
    fn reset(&mut self) -> Observation {
        self.balance = self.initial_balance;
        self.shares_held = 0.0;
        self.index = self.window_size;
        self.prev_value = self.initial_balance;
        self.done = false;
        self.observation()
    }

    fn step(&mut self, action: f64) -> Result<StepOutcome> {
        if self.done {
            return Err(BacktestError::EnvironmentError(
                "step called on a terminal environment".to_string(),
            ));
        }

        let price = self.prices[self.index];
        let action = action.clamp(-1.0, 1.0);

        let position = if action > ACTION_THRESHOLD && self.balance > 0.0 {
            let spend = self.balance * action;
            self.shares_held += spend * (1.0 - self.transaction_fee_percent) / price;
            self.balance -= spend;
            PositionLabel::Buy
        } else if action < -ACTION_THRESHOLD && self.shares_held > 0.0 {
            let sold = self.shares_held * (-action);
            self.balance += sold * price * (1.0 - self.transaction_fee_percent);
            self.shares_held -= sold;
            PositionLabel::Sell
        } else {
            PositionLabel::Hold
        };

        let portfolio_value = self.balance + self.shares_held * price;
        let reward = (portfolio_value / self.prev_value).ln();
        self.prev_value = portfolio_value;

        self.index += 1;
        // The last index has no successor and is never steppable.
        self.done = self.index + 1 >= self.prices.len();

        Ok(StepOutcome {
            observation: self.observation(),
            reward,
            done: self.done,
            info: StepInfo {
                portfolio_value,
                current_price: price,
                position,
                balance: self.balance,
                shares_held: self.shares_held,
            },
        })
    }

    fn data_length(&self) -> usize {
        self.prices.len()
    }

    fn initial_balance(&self) -> f64 {
        self.initial_balance
    }

    fn feature_dim(&self) -> usize {
        self.features.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_structured_observation_shape() {
        let mut env = SimulatedMarketEnv::generate(60, 10, 10_000.0, 0.001).unwrap();
        match env.reset() {
            Observation::Structured { market, portfolio } => {
                assert_eq!(market.nrows(), 10);
                assert_eq!(market.ncols(), 3);
                assert_eq!(portfolio.len(), 3);
            }
            Observation::Flat(_) => panic!("expected structured observation"),
        }
    }

    #[test]
    fn test_flat_observation_shape() {
        let mut env = SimulatedMarketEnv::generate(60, 1, 10_000.0, 0.001).unwrap();
        match env.reset() {
            Observation::Flat(v) => assert_eq!(v.len(), 3 + 3),
            Observation::Structured { .. } => panic!("expected flat observation"),
        }
    }

    #[test]
    fn test_buy_moves_cash_into_shares() {
        let mut env = SimulatedMarketEnv::generate(60, 5, 10_000.0, 0.0).unwrap();
        env.reset();

        let outcome = env.step(0.5).unwrap();
        assert_eq!(outcome.info.position, PositionLabel::Buy);
        assert_relative_eq!(outcome.info.balance, 5_000.0);
        assert!(outcome.info.shares_held > 0.0);
        // Without fees the portfolio value is unchanged by the trade itself.
        assert_relative_eq!(outcome.info.portfolio_value, 10_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_small_action_is_hold() {
        let mut env = SimulatedMarketEnv::generate(60, 5, 10_000.0, 0.001).unwrap();
        env.reset();

        let outcome = env.step(0.05).unwrap();
        assert_eq!(outcome.info.position, PositionLabel::Hold);
        assert_relative_eq!(outcome.info.balance, 10_000.0);
    }

    #[test]
    fn test_terminates_before_last_index() {
        let mut env = SimulatedMarketEnv::generate(12, 5, 10_000.0, 0.001).unwrap();
        env.reset();

        let mut steps = 0;
        loop {
            let outcome = env.step(0.0).unwrap();
            steps += 1;
            if outcome.done {
                break;
            }
        }
        // index runs from 5 to 10; index 11 is the unsteppable last row
        assert_eq!(steps, 6);
        assert!(env.step(0.0).is_err());
    }

    #[test]
    fn test_window_larger_than_series_rejected() {
        assert!(SimulatedMarketEnv::generate(10, 10, 10_000.0, 0.001).is_err());
    }
}
