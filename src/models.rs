use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Policy network architecture selected for a run.
///
/// Exactly one architecture is active per run; when several flags are set
/// across the persisted config and the CLI request, priority is
/// Transformer > StateSpace > Lstm > Cnn > Mlp.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Mlp,
    Cnn,
    Lstm,
    StateSpace,
    Transformer,
}

impl Architecture {
    /// Select the active architecture from merged flags, first true flag wins.
    pub fn from_flags(transformer: bool, state_space: bool, lstm: bool, cnn: bool) -> Self {
        if transformer {
            Architecture::Transformer
        } else if state_space {
            Architecture::StateSpace
        } else if lstm {
            Architecture::Lstm
        } else if cnn {
            Architecture::Cnn
        } else {
            Architecture::Mlp
        }
    }

    /// Whether this architecture consumes the 2-D windowed observation.
    pub fn is_windowed(&self) -> bool {
        !matches!(self, Architecture::Mlp)
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Architecture::Mlp => write!(f, "MLP"),
            Architecture::Cnn => write!(f, "CNN"),
            Architecture::Lstm => write!(f, "LSTM"),
            Architecture::StateSpace => write!(f, "StateSpace"),
            Architecture::Transformer => write!(f, "Transformer"),
        }
    }
}

/// Shape of the environment's reset observation, resolved once per run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationVariant {
    Flat {
        dim: usize,
    },
    Structured {
        window: usize,
        features: usize,
        portfolio_dim: usize,
    },
}

impl ObservationVariant {
    /// Flattened state dimension of this observation shape.
    pub fn effective_state_dim(&self) -> usize {
        match self {
            ObservationVariant::Flat { dim } => *dim,
            ObservationVariant::Structured {
                window,
                features,
                portfolio_dim,
            } => window * features + portfolio_dim,
        }
    }
}

fn default_action_dim() -> usize {
    1
}

fn default_hidden_dim() -> usize {
    256
}

/// Persisted policy descriptor, read from `config.json` in the checkpoint
/// directory. Every field is defaulted so a partial or missing config
/// degrades instead of failing the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub state_dim: Option<usize>,
    #[serde(default = "default_action_dim")]
    pub action_dim: usize,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
    #[serde(default)]
    pub use_cnn: bool,
    #[serde(default)]
    pub use_lstm: bool,
    #[serde(default)]
    pub use_state_space: bool,
    #[serde(default)]
    pub use_transformer: bool,
    /// (window, features) the weights were trained against.
    #[serde(default)]
    pub input_shape: Option<(usize, usize)>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            state_dim: None,
            action_dim: default_action_dim(),
            hidden_dim: default_hidden_dim(),
            use_cnn: false,
            use_lstm: false,
            use_state_space: false,
            use_transformer: false,
            input_shape: None,
        }
    }
}

impl PolicyConfig {
    pub fn saved_window(&self) -> Option<usize> {
        self.input_shape.map(|(w, _)| w)
    }

    pub fn saved_features(&self) -> Option<usize> {
        self.input_shape.map(|(_, f)| f)
    }
}

/// How the loader should treat the checkpoint, decided once by the resolver.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompatAction {
    Proceed,
    ResizeLoad,
    Reject,
}

/// Result of comparing a persisted policy config against the live
/// observation shape.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub feature_dim_match: bool,
    pub window_dim_match: bool,
    pub state_dim_match: bool,
    pub action: CompatAction,
}

/// Position taken by the environment at a step.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionLabel {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for PositionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionLabel::Buy => write!(f, "buy"),
            PositionLabel::Sell => write!(f, "sell"),
            PositionLabel::Hold => write!(f, "hold"),
        }
    }
}

/// One simulation step as recorded by the episode runner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub action: f64,
    pub reward: f64,
    pub portfolio_value: f64,
    pub price: f64,
    pub position: PositionLabel,
    pub balance: f64,
    pub shares_held: f64,
}

/// Append-only record of a completed episode.
///
/// Sized up-front to the environment's step bound; owned by the runner
/// until it is handed to the metrics calculator.
#[derive(Clone, Debug)]
pub struct EpisodeTrace {
    records: Vec<StepRecord>,
    initial_balance: f64,
}

impl EpisodeTrace {
    pub fn with_capacity(capacity: usize, initial_balance: f64) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            initial_balance,
        }
    }

    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn portfolio_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.portfolio_value).collect()
    }

    /// Runner-level summary; an empty trace falls back to the initial
    /// balance and reports a zero return.
    pub fn summary(&self) -> TraceSummary {
        let initial_value = self
            .records
            .first()
            .map(|r| r.portfolio_value)
            .unwrap_or(self.initial_balance);
        let final_value = self
            .records
            .last()
            .map(|r| r.portfolio_value)
            .unwrap_or(self.initial_balance);
        let total_return = (final_value - initial_value) / initial_value * 100.0;

        TraceSummary {
            initial_value,
            final_value,
            total_return,
            total_steps: self.records.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TraceSummary {
    pub initial_value: f64,
    pub final_value: f64,
    pub total_return: f64,
    pub total_steps: usize,
}

/// Performance indicators computed once from a completed trace.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub cumulative_return: f64,
    pub annual_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub buy_trades: usize,
    pub sell_trades: usize,
    pub winning_trades: usize,
    pub win_rate: f64,
    pub hit_rate: f64,
    pub total_hits: usize,
    pub total_predictions: usize,
    pub total_steps: usize,
}

/// Everything a run hands to the persistence / plotting collaborators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BacktestBundle {
    pub run_id: Uuid,
    pub symbol: String,
    pub checkpoint: String,
    pub architecture: Architecture,
    /// `None` means the trace had too few samples for metrics.
    pub metrics: Option<BacktestMetrics>,
    pub trace_summary: TraceSummary,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl BacktestBundle {
    pub fn format_report(&self) -> String {
        let metrics_block = match &self.metrics {
            Some(m) => format!(
                r#"║ Annual Return:       {:>39.2}% ║
║ Volatility:          {:>39.2}% ║
║ Sharpe Ratio:        {:>40.2} ║
║ Max Drawdown:        {:>39.2}% ║
╠══════════════════════════════════════════════════════════════╣
║ Total Trades:        {:>40} ║
║ Buy Trades:          {:>40} ║
║ Sell Trades:         {:>40} ║
║ Win Rate:            {:>39.2}% ║
║ Hit Rate:            {:>39.2}% ║
║ Hits / Predictions:  {:>40} ║"#,
                m.annual_return,
                m.volatility,
                m.sharpe_ratio,
                m.max_drawdown,
                m.total_trades,
                m.buy_trades,
                m.sell_trades,
                m.win_rate,
                m.hit_rate,
                format!("{}/{}", m.total_hits, m.total_predictions),
            ),
            None => {
                "║ Metrics:             insufficient trace data                 ║".to_string()
            }
        };

        format!(
            r#"
╔══════════════════════════════════════════════════════════════╗
║              BACKTEST RESULTS                                ║
╠══════════════════════════════════════════════════════════════╣
║ Symbol:              {:>40} ║
║ Architecture:        {:>40} ║
║ Total Steps:         {:>40} ║
╠══════════════════════════════════════════════════════════════╣
║ Initial Value:       {:>40.2} ║
║ Final Value:         {:>40.2} ║
║ Total Return:        {:>39.2}% ║
╠══════════════════════════════════════════════════════════════╣
{}
╚══════════════════════════════════════════════════════════════╝
"#,
            self.symbol,
            self.architecture.to_string(),
            self.trace_summary.total_steps,
            self.trace_summary.initial_value,
            self.trace_summary.final_value,
            self.trace_summary.total_return,
            metrics_block,
        )
    }
}
