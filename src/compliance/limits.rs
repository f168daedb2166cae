// Per-user regulatory limits and compliance state

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// PERIODS
// ============================================================================

/// Rolling window used by deposit and loss limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    /// Checked in this order; the first violated period is reported
    pub const ALL: [Period; 3] = [Period::Daily, Period::Weekly, Period::Monthly];

    pub fn window(&self) -> Duration {
        match self {
            Period::Daily => Duration::hours(24),
            Period::Weekly => Duration::days(7),
            Period::Monthly => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodLimits {
    #[serde(default)]
    pub daily: Option<Decimal>,
    #[serde(default)]
    pub weekly: Option<Decimal>,
    #[serde(default)]
    pub monthly: Option<Decimal>,
}

impl PeriodLimits {
    pub fn get(&self, period: Period) -> Option<Decimal> {
        match period {
            Period::Daily => self.daily,
            Period::Weekly => self.weekly,
            Period::Monthly => self.monthly,
        }
    }
}

/// Limits for one user. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    #[serde(default)]
    pub deposit: PeriodLimits,
    #[serde(default)]
    pub loss: PeriodLimits,
    #[serde(default)]
    pub session_minutes: Option<i64>,
    #[serde(default)]
    pub daily_play_minutes: Option<i64>,
}

// ============================================================================
// COMPLIANCE STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaySession {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl PlaySession {
    /// Portion of the session that falls inside `[from, to]`
    fn overlap(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
        let start = self.started_at.max(from);
        let end = self.ended_at.min(to);
        if end > start { end - start } else { Duration::zero() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceState {
    #[serde(default)]
    pub self_excluded_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cooling_off_until: Option<DateTime<Utc>>,
    /// Supplied by the external KYC/risk service; never recomputed here
    #[serde(default = "default_eligible")]
    pub eligible: bool,
    /// Set by a chargeback, cleared only by an operator
    #[serde(default)]
    pub chargeback_hold: bool,
    /// User-specific limits; configuration defaults apply when unset
    #[serde(default)]
    pub limits: Option<RiskLimits>,
    #[serde(default)]
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sessions: Vec<PlaySession>,
}

fn default_eligible() -> bool {
    true
}

impl Default for ComplianceState {
    fn default() -> Self {
        Self {
            self_excluded_until: None,
            cooling_off_until: None,
            eligible: true,
            chargeback_hold: false,
            limits: None,
            session_started_at: None,
            sessions: Vec::new(),
        }
    }
}

impl ComplianceState {
    pub fn effective_limits(&self, defaults: &RiskLimits) -> RiskLimits {
        self.limits.unwrap_or(*defaults)
    }

    pub fn is_self_excluded(&self, now: DateTime<Utc>) -> bool {
        self.self_excluded_until.map_or(false, |until| now < until)
    }

    pub fn is_cooling_off(&self, now: DateTime<Utc>) -> bool {
        self.cooling_off_until.map_or(false, |until| now < until)
    }

    /// Elapsed time of the open session, if any
    pub fn session_elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.session_started_at.map(|start| now - start)
    }

    /// Play time inside the last 24h, including the open session
    pub fn play_time_last_day(&self, now: DateTime<Utc>) -> Duration {
        let from = now - Duration::hours(24);
        let closed = self
            .sessions
            .iter()
            .fold(Duration::zero(), |acc, s| acc + s.overlap(from, now));
        let open = self
            .session_started_at
            .map(|start| PlaySession { started_at: start, ended_at: now }.overlap(from, now))
            .unwrap_or_else(Duration::zero);
        closed + open
    }

    pub fn start_session(&mut self, now: DateTime<Utc>) {
        if self.session_started_at.is_none() {
            self.session_started_at = Some(now);
        }
    }

    /// Close the open session; returns its length
    pub fn end_session(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let started_at = self.session_started_at.take()?;
        self.sessions.push(PlaySession { started_at, ended_at: now });
        // Nothing older than the longest window is ever read
        let horizon = now - Period::Monthly.window();
        self.sessions.retain(|s| s.ended_at >= horizon);
        Some(now - started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_time_counts_only_last_day() {
        let now = Utc::now();
        let mut state = ComplianceState::default();
        state.sessions.push(PlaySession {
            started_at: now - Duration::hours(26),
            ended_at: now - Duration::hours(23),
        });
        state.start_session(now - Duration::minutes(30));
        assert_eq!(state.play_time_last_day(now), Duration::hours(1) + Duration::minutes(30));
    }

    #[test]
    fn test_end_session_records_length() {
        let now = Utc::now();
        let mut state = ComplianceState::default();
        state.start_session(now - Duration::minutes(45));
        assert_eq!(state.end_session(now), Some(Duration::minutes(45)));
        assert!(state.session_started_at.is_none());
        assert_eq!(state.end_session(now), None);
    }

    #[test]
    fn test_exclusion_windows() {
        let now = Utc::now();
        let state = ComplianceState {
            self_excluded_until: Some(now + Duration::days(30)),
            cooling_off_until: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(state.is_self_excluded(now));
        assert!(!state.is_cooling_off(now));
    }
}
