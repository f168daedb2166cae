//! Behavioral risk heuristics.
//!
//! These are probabilistic signals, not limits: they never block a wager.
//! Whatever they raise is queued as a `RiskFlag` for offline review.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::Severity;
use crate::wagers::WagerStats;

#[derive(Debug, Clone)]
pub struct HeuristicConfig {
    /// Win rate above which a player is flagged
    pub win_rate_threshold: f64,
    /// Completed wagers required before win rate is meaningful
    pub win_rate_min_wagers: u64,
    pub max_wagers_per_hour: usize,
    /// Number of recent wins / intervals inspected for uniformity
    pub uniformity_sample: usize,
    /// Coefficient of variation below which a series counts as uniform
    pub uniformity_cv_threshold: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            win_rate_threshold: 0.75,
            win_rate_min_wagers: 20,
            max_wagers_per_hour: 120,
            uniformity_sample: 10,
            uniformity_cv_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    HighWinRate,
    HighFrequency,
    UniformWinAmounts,
    UniformTiming,
    Chargeback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignal {
    pub kind: SignalKind,
    pub reason: String,
    pub severity: Severity,
}

/// Behavioral history the heuristics look at
#[derive(Debug, Clone, Copy)]
pub struct BehaviorSample<'a> {
    pub stats: &'a WagerStats,
    /// Creation times of the user's recent wagers, oldest first
    pub recent_wager_times: &'a [DateTime<Utc>],
    /// Payouts of the user's recent wins, oldest first
    pub recent_win_amounts: &'a [Decimal],
}

pub fn assess(config: &HeuristicConfig, sample: &BehaviorSample<'_>, now: DateTime<Utc>) -> Vec<RiskSignal> {
    let mut signals = Vec::new();

    let stats = sample.stats;
    if stats.total_wagers >= config.win_rate_min_wagers && stats.win_rate > config.win_rate_threshold {
        signals.push(RiskSignal {
            kind: SignalKind::HighWinRate,
            reason: format!(
                "win rate {:.2} over {} wagers exceeds {:.2}",
                stats.win_rate, stats.total_wagers, config.win_rate_threshold
            ),
            severity: if stats.win_rate > 0.9 { Severity::High } else { Severity::Medium },
        });
    }

    // The wager being evaluated counts toward the hour
    let hour_ago = now - Duration::hours(1);
    let last_hour = sample.recent_wager_times.iter().filter(|t| **t >= hour_ago).count() + 1;
    if last_hour > config.max_wagers_per_hour {
        signals.push(RiskSignal {
            kind: SignalKind::HighFrequency,
            reason: format!("{} wagers in the last hour (max {})", last_hour, config.max_wagers_per_hour),
            severity: Severity::Medium,
        });
    }

    let n = config.uniformity_sample;
    if n >= 2 && sample.recent_win_amounts.len() >= n {
        let wins: Vec<f64> = sample.recent_win_amounts[sample.recent_win_amounts.len() - n..]
            .iter()
            .filter_map(|d| d.to_f64())
            .collect();
        if let Some(cv) = coefficient_of_variation(&wins) {
            if cv < config.uniformity_cv_threshold {
                signals.push(RiskSignal {
                    kind: SignalKind::UniformWinAmounts,
                    reason: format!("last {} win amounts nearly identical (cv {:.4})", n, cv),
                    severity: Severity::High,
                });
            }
        }
    }

    let times = sample.recent_wager_times;
    if n >= 2 && times.len() > n {
        let tail = &times[times.len() - (n + 1)..];
        let intervals: Vec<f64> = tail
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        if let Some(cv) = coefficient_of_variation(&intervals) {
            if cv < config.uniformity_cv_threshold {
                signals.push(RiskSignal {
                    kind: SignalKind::UniformTiming,
                    reason: format!("last {} wager intervals nearly identical (cv {:.4})", n, cv),
                    severity: Severity::High,
                });
            }
        }
    }

    signals
}

fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().mean();
    if !mean.is_finite() || mean <= 0.0 {
        return None;
    }
    let std_dev = values.iter().std_dev();
    std_dev.is_finite().then(|| std_dev / mean)
}
