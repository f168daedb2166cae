/// Background jobs
///
/// Two periodic loops run next to the API:
/// - reconciliation on `audit.interval`
/// - exchange-rate refresh on `rates.ttl`
///
/// Each job keeps its status and last run so operators can see it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::CrossCheckStatus;
use crate::service::WageringService;

/// Floor for configured periods; `tokio::time::interval` rejects zero
const MIN_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// JOB STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Reconciliation,
    RateRefresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Idle,
    Running,
    /// Last run failed, next tick retries
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub interval_secs: u64,
    pub status: JobStatus,
    pub runs: u64,
    pub last_run: Option<JobRun>,
}

impl JobState {
    fn new(interval: Duration) -> Self {
        Self {
            interval_secs: interval.as_secs(),
            status: JobStatus::Idle,
            runs: 0,
            last_run: None,
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

#[derive(Clone)]
pub struct Scheduler {
    service: WageringService,
    jobs: Arc<RwLock<BTreeMap<JobKind, JobState>>>,
}

impl Scheduler {
    pub fn new(service: WageringService) -> Self {
        let mut jobs = BTreeMap::new();
        jobs.insert(JobKind::Reconciliation, JobState::new(service.config().audit.interval));
        jobs.insert(JobKind::RateRefresh, JobState::new(service.config().rates.ttl));
        Self {
            service,
            jobs: Arc::new(RwLock::new(jobs)),
        }
    }

    pub fn status(&self) -> BTreeMap<JobKind, JobState> {
        self.jobs.read().clone()
    }

    /// Spawn both loops. The first reconciliation waits one full interval;
    /// rates are fetched immediately so the cache starts warm.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(
            audit_interval_secs = self.service.config().audit.interval.as_secs(),
            rate_ttl_secs = self.service.config().rates.ttl.as_secs(),
            "⏱️ background jobs started"
        );

        let audit = self.clone();
        let reconcile_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(audit.service.config().audit.interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                audit.run_reconciliation().await;
            }
        });

        let rates = self.clone();
        let rate_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(rates.service.config().rates.ttl.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                rates.run_rate_refresh().await;
            }
        });

        vec![reconcile_loop, rate_loop]
    }

    pub async fn run_reconciliation(&self) -> JobRun {
        let started_at = self.begin(JobKind::Reconciliation);
        let service = self.service.clone();

        let run = match tokio::task::spawn_blocking(move || service.reconcile()).await {
            Ok(report) => {
                let summary = format!(
                    "{} wallets, {} escrow accounts, {} discrepancies{}",
                    report.wallets_checked,
                    report.escrow_accounts_checked,
                    report.discrepancies.len(),
                    if report.cross_check == CrossCheckStatus::SkippedUnstable {
                        ", cross-check skipped"
                    } else {
                        ""
                    }
                );
                JobRun { success: true, started_at, finished_at: Utc::now(), summary }
            }
            Err(e) => {
                error!(error = %e, "❌ reconciliation task panicked");
                JobRun { success: false, started_at, finished_at: Utc::now(), summary: e.to_string() }
            }
        };
        self.finish(JobKind::Reconciliation, run)
    }

    pub async fn run_rate_refresh(&self) -> JobRun {
        let started_at = self.begin(JobKind::RateRefresh);
        let timeout = self.service.config().rates.fetch_timeout;

        let run = match tokio::time::timeout(timeout, self.service.rates.refresh()).await {
            Ok(Ok(count)) => JobRun {
                success: true,
                started_at,
                finished_at: Utc::now(),
                summary: format!("{} rates stored", count),
            },
            Ok(Err(e)) => {
                warn!(error = %e, "⚠️ scheduled rate refresh failed, keeping cached rates");
                JobRun { success: false, started_at, finished_at: Utc::now(), summary: e.to_string() }
            }
            Err(_) => {
                warn!("⏳ scheduled rate refresh timed out, keeping cached rates");
                JobRun {
                    success: false,
                    started_at,
                    finished_at: Utc::now(),
                    summary: "timed out".to_string(),
                }
            }
        };
        self.finish(JobKind::RateRefresh, run)
    }

    fn begin(&self, kind: JobKind) -> DateTime<Utc> {
        if let Some(job) = self.jobs.write().get_mut(&kind) {
            job.status = JobStatus::Running;
        }
        Utc::now()
    }

    fn finish(&self, kind: JobKind, run: JobRun) -> JobRun {
        if let Some(job) = self.jobs.write().get_mut(&kind) {
            job.runs += 1;
            job.status = if run.success {
                JobStatus::Idle
            } else {
                JobStatus::Error(run.summary.clone())
            };
            job.last_run = Some(run.clone());
        }
        run
    }
}
