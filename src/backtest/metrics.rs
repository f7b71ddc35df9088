use crate::errors::{BacktestError, Result};
use crate::models::{BacktestMetrics, EpisodeTrace, PositionLabel};

/// Trading days per year used for annualization.
const TRADING_DAYS: f64 = 252.0;

/// Actions at or below this magnitude count as hold for the hit rate.
const ACTION_THRESHOLD: f64 = 0.1;

/// Compute the full metrics set from a completed trace.
///
/// Fewer than two portfolio samples cannot produce returns; the caller
/// must treat that as "insufficient data", not a zeroed report.
pub fn compute(trace: &EpisodeTrace) -> Result<BacktestMetrics> {
    let values = trace.portfolio_values();
    if values.len() < 2 {
        return Err(BacktestError::InsufficientTraceData(values.len()));
    }

    let returns = step_returns(&values);
    let summary = trace.summary();

    let total_return = summary.total_return;
    let cumulative_return = (summary.final_value / summary.initial_value - 1.0) * 100.0;

    let num_days = values.len() as f64;
    let annual_return =
        ((summary.final_value / summary.initial_value).powf(TRADING_DAYS / num_days) - 1.0) * 100.0;

    let volatility = population_std(&returns) * TRADING_DAYS.sqrt() * 100.0;

    let sharpe_ratio = if volatility > 0.0 {
        annual_return / volatility
    } else {
        0.0
    };

    let max_drawdown = max_drawdown(&values);

    let positions: Vec<PositionLabel> = trace.records().iter().map(|r| r.position).collect();
    let buy_trades = positions.iter().filter(|p| **p == PositionLabel::Buy).count();
    let sell_trades = positions.iter().filter(|p| **p == PositionLabel::Sell).count();
    let total_trades = buy_trades + sell_trades;

    let (winning_trades, win_rate) = win_rate(&positions, &values);
    let (hit_rate, total_hits, total_predictions) = hit_rate(trace, &returns);

    Ok(BacktestMetrics {
        total_return,
        cumulative_return,
        annual_return,
        volatility,
        sharpe_ratio,
        max_drawdown,
        total_trades,
        buy_trades,
        sell_trades,
        winning_trades,
        win_rate,
        hit_rate,
        total_hits,
        total_predictions,
        total_steps: trace.len(),
    })
}

/// Per-step returns r[i] = (V[i+1] - V[i]) / V[i].
fn step_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Most negative peak-to-trough decline as a percentage; 0 for a
/// non-decreasing series.
fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;

    for &v in values {
        if v > peak {
            peak = v;
        }
        let dd = (v - peak) / peak * 100.0;
        if dd < max_dd {
            max_dd = dd;
        }
    }

    max_dd
}

/// Each sell is matched against the nearest earlier buy; a sell with no
/// earlier buy is excluded from both numerator and denominator. Buys are
/// not consumed by a match, so one buy can back several later sells;
/// kept as-is pending product clarification.
fn win_rate(positions: &[PositionLabel], values: &[f64]) -> (usize, f64) {
    let mut winning = 0;
    let mut matched_sells = 0;

    for (i, pos) in positions.iter().enumerate() {
        if *pos != PositionLabel::Sell {
            continue;
        }
        for j in (0..i).rev() {
            if positions[j] == PositionLabel::Buy {
                matched_sells += 1;
                if values[i] > values[j] {
                    winning += 1;
                }
                break;
            }
        }
    }

    let rate = if matched_sells > 0 {
        winning as f64 / matched_sells as f64 * 100.0
    } else {
        0.0
    };

    (winning, rate)
}

/// Directional accuracy: does the sign of each above-threshold action match
/// the sign of the realized next-step return? The threshold is strict, an
/// action of exactly 0.1 counts as hold.
fn hit_rate(trace: &EpisodeTrace, returns: &[f64]) -> (f64, usize, usize) {
    let mut hits = 0;
    let mut predictions = 0;

    for (i, &next_return) in returns.iter().enumerate() {
        let action = trace.records()[i].action;
        if action.abs() > ACTION_THRESHOLD {
            predictions += 1;
            if (action > 0.0 && next_return > 0.0) || (action < 0.0 && next_return < 0.0) {
                hits += 1;
            }
        }
    }

    let rate = if predictions > 0 {
        hits as f64 / predictions as f64 * 100.0
    } else {
        0.0
    };

    (rate, hits, predictions)
}
