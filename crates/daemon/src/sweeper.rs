//! Periodic sweep
//!
//! Owns the two time-driven transitions nothing else triggers: suspending
//! demo servers past their expiry, and re-running install setup for jobs
//! that stalled (process restart, budget exhausted while the node was slow).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use craftcloud_common::{Database, PanelApi, Provisioner, Result};

use crate::config::SweepConfig;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub suspend_failures: usize,
    pub resumed: usize,
    pub resume_failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Sweeper {
    db: Database,
    panel: Arc<dyn PanelApi>,
    provisioner: Arc<Provisioner>,
    cfg: SweepConfig,
}

impl Sweeper {
    pub fn new(
        db: Database,
        panel: Arc<dyn PanelApi>,
        provisioner: Arc<Provisioner>,
        cfg: SweepConfig,
    ) -> Self {
        Self {
            db,
            panel,
            provisioner,
            cfg,
        }
    }

    /// Run the sweep loop
    pub async fn run(&self) {
        info!(
            "Sweeper started (every {}s, resume after {}s, max {} attempts)",
            self.cfg.interval_secs, self.cfg.resume_after_secs, self.cfg.max_resume_attempts
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep_once(Utc::now()).await {
                Ok(report) if report.is_empty() => debug!("Sweep: nothing to do"),
                Ok(report) => info!(
                    "Sweep: {} expired ({} suspend failures), {} resumed ({} failed)",
                    report.expired, report.suspend_failures, report.resumed, report.resume_failures
                ),
                Err(e) => error!("Sweep error: {}", e),
            }
        }
    }

    /// One pass of every sweep task, as of `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let (expired, suspend_failures) = self.expire_demos(now).await?;
        report.expired = expired;
        report.suspend_failures = suspend_failures;

        let (resumed, resume_failures) = self.resume_stalled_jobs(now).await?;
        report.resumed = resumed;
        report.resume_failures = resume_failures;

        let pruned = self.db.delete_expired_sessions(now)?;
        if pruned > 0 {
            debug!("Pruned {} expired sessions", pruned);
        }

        Ok(report)
    }

    /// Suspend unsuspended demo servers whose expiry has passed.
    /// A failed suspension is left for the next sweep.
    pub async fn expire_demos(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let mut expired = 0;
        let mut failures = 0;

        for server in self.db.list_expired_demos(now)? {
            match self.panel.suspend(server.external_server_id).await {
                Ok(()) => {
                    self.db.mark_suspended(server.id, now)?;
                    info!(
                        "Suspended expired demo {} ({})",
                        server.external_identifier, server.name
                    );
                    expired += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to suspend expired demo {}: {}",
                        server.external_identifier, e
                    );
                    failures += 1;
                }
            }
        }

        Ok((expired, failures))
    }

    /// Re-run setup for jobs stuck after server creation.
    pub async fn resume_stalled_jobs(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let stale_before = now - ChronoDuration::seconds(self.cfg.resume_after_secs as i64);
        let jobs = self
            .db
            .list_resumable_jobs(stale_before, self.cfg.max_resume_attempts)?;
        if jobs.is_empty() {
            return Ok((0, 0));
        }

        info!("Resuming {} stalled provisioning jobs", jobs.len());
        let results = futures::future::join_all(jobs.into_iter().map(|job| {
            let provisioner = self.provisioner.clone();
            async move {
                let email = job.owner_email.clone();
                let attempt = job.attempts + 1;
                match provisioner.resume(job).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Resume attempt {} for {} failed: {}", attempt, email, e);
                        false
                    }
                }
            }
        }))
        .await;

        let resumed = results.iter().filter(|ok| **ok).count();
        Ok((resumed, results.len() - resumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use craftcloud_common::panel::testing::{FakeFailure, FakePanel, PanelCall};
    use craftcloud_common::{
        PlanType, PowerAction, ProvisionConfig, ProvisioningJob, ProvisioningState, ServerInstance,
    };
    use uuid::Uuid;

    fn setup() -> (Sweeper, Arc<FakePanel>, Database) {
        let db = Database::open_memory().unwrap();
        let panel = Arc::new(FakePanel::new());
        let provisioner = Arc::new(Provisioner::new(
            db.clone(),
            panel.clone(),
            ProvisionConfig::default(),
        ));
        let sweeper = Sweeper::new(db.clone(), panel.clone(), provisioner, SweepConfig::default());
        (sweeper, panel, db)
    }

    fn demo_server(db: &Database, email: &str, upstream_id: u64, expires_at: DateTime<Utc>) -> ServerInstance {
        let user = db.create_user(email, "demo", "x", Some(1), None).unwrap();
        let server = ServerInstance {
            id: Uuid::new_v4(),
            owner_user_id: user.id,
            external_server_id: upstream_id,
            external_identifier: format!("srv{}", upstream_id),
            name: "demo's Demo Server".to_string(),
            plan_type: PlanType::Demo,
            is_demo: true,
            demo_expires_at: Some(expires_at),
            suspended_at: None,
            created_at: expires_at - ChronoDuration::hours(24),
        };
        db.create_server(&server).unwrap();
        server
    }

    fn stalled_job(db: &Database, email: &str, state: ProvisioningState, attempts: u32) -> ProvisioningJob {
        let mut job = db.claim_job(email).unwrap();
        job.upstream_user_id = Some(1);
        job.external_server_id = Some(9);
        job.external_identifier = Some(format!("{}-srv", email.split('@').next().unwrap()));
        job.state = state;
        job.attempts = attempts;
        db.update_job(&mut job).unwrap();
        job
    }

    #[tokio::test]
    async fn test_expired_demos_are_suspended_once() {
        let (sweeper, panel, db) = setup();
        let now = Utc::now();
        let expired = demo_server(&db, "old@b.com", 11, now - ChronoDuration::minutes(1));
        demo_server(&db, "new@b.com", 12, now + ChronoDuration::hours(3));

        let report = sweeper.sweep_once(now).await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.suspend_failures, 0);
        assert_eq!(panel.calls(), vec![PanelCall::Suspend(11)]);

        let stored = db
            .get_server_for_owner(&expired.external_identifier, expired.owner_user_id)
            .unwrap()
            .unwrap();
        assert!(stored.suspended_at.is_some());

        // Already suspended: nothing more to do
        let report = sweeper.sweep_once(now).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(panel.count(|c| matches!(c, PanelCall::Suspend(_))), 1);
    }

    #[tokio::test]
    async fn test_suspend_failure_retried_next_sweep() {
        let (sweeper, panel, db) = setup();
        let now = Utc::now();
        let server = demo_server(&db, "old@b.com", 11, now - ChronoDuration::minutes(1));
        panel.script(|s| s.suspend_failures.push_back(FakeFailure::Status(503)));

        let (expired, failures) = sweeper.expire_demos(now).await.unwrap();
        assert_eq!((expired, failures), (0, 1));
        let stored = db
            .get_server_for_owner(&server.external_identifier, server.owner_user_id)
            .unwrap()
            .unwrap();
        assert!(stored.suspended_at.is_none());

        let (expired, failures) = sweeper.expire_demos(now).await.unwrap();
        assert_eq!((expired, failures), (1, 0));
        assert_eq!(panel.count(|c| matches!(c, PanelCall::Suspend(11))), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_job_is_resumed() {
        let (sweeper, panel, db) = setup();
        let job = stalled_job(&db, "slow@b.com", ProvisioningState::Failed, 1);

        // Fresh jobs are left alone
        let (resumed, failed) = sweeper.resume_stalled_jobs(Utc::now()).await.unwrap();
        assert_eq!((resumed, failed), (0, 0));
        assert!(panel.calls().is_empty());

        let later = Utc::now() + ChronoDuration::minutes(10);
        let report = sweeper.sweep_once(later).await.unwrap();
        assert_eq!(report.resumed, 1);
        assert_eq!(report.resume_failures, 0);

        let stored = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.state, ProvisioningState::Done);
        assert_eq!(
            panel.count(|c| matches!(c, PanelCall::Power { action: PowerAction::Start, .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_resume_counts_attempt() {
        let (sweeper, panel, db) = setup();
        let job = stalled_job(&db, "gone@b.com", ProvisioningState::AwaitingInstall, 0);
        panel.script(|s| s.write_failures.push_back(FakeFailure::Status(403)));

        let later = Utc::now() + ChronoDuration::minutes(10);
        let (resumed, failed) = sweeper.resume_stalled_jobs(later).await.unwrap();
        assert_eq!((resumed, failed), (0, 1));

        let stored = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.state, ProvisioningState::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_and_finished_jobs_are_skipped() {
        let (sweeper, panel, db) = setup();
        stalled_job(&db, "tired@b.com", ProvisioningState::Failed, 3);
        stalled_job(&db, "done@b.com", ProvisioningState::Done, 0);

        let later = Utc::now() + ChronoDuration::minutes(10);
        let (resumed, failed) = sweeper.resume_stalled_jobs(later).await.unwrap();
        assert_eq!((resumed, failed), (0, 0));
        assert!(panel.calls().is_empty());
    }
}
