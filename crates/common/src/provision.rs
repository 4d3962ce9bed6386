//! Provisioning workflow
//!
//! Creates the upstream account, optionally a demo server, then (detached
//! from the triggering request) waits for the install to finish, writes the
//! EULA and sends the first start signal.
//!
//! Every step is recorded in a `provisioning_jobs` row keyed by owner email
//! before it runs, so a retried registration skips upstream creation calls
//! that already succeeded instead of duplicating them.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::FailureClass;
use crate::panel::{CreatedServer, Credential, PanelApi, ServerBlueprint};
use crate::types::*;
use crate::{Error, Result};

pub const EULA_PATH: &str = "/eula.txt";
pub const EULA_CONTENTS: &str = "eula=true";

/// Timing knobs for the install wait
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Budget for EULA write plus first start
    pub setup_budget: Duration,
    /// Budget for the EULA-only variant
    pub eula_budget: Duration,
    /// Delay between attempts
    pub retry_delay: Duration,
    /// Pause between a successful EULA write and the start signal
    pub settle_delay: Duration,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            setup_budget: Duration::from_secs(120),
            eula_budget: Duration::from_secs(60),
            retry_delay: Duration::from_secs(2),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// Input to `Provisioner::register`
#[derive(Debug, Clone)]
pub struct Registration {
    /// Already normalised with `normalize_email`
    pub email: String,
    pub password: String,
    pub password_hash: String,
    pub demo: bool,
}

/// What a registration produced
#[derive(Debug)]
pub struct RegistrationOutcome {
    pub user: UserRecord,
    pub server: Option<ServerInstance>,
    /// Background setup, when a server was created
    pub setup: Option<JoinHandle<()>>,
}

/// Releases the in-flight claim for an email on drop.
pub struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    email: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.email);
    }
}

pub struct Provisioner {
    db: Database,
    panel: Arc<dyn PanelApi>,
    cfg: ProvisionConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Provisioner {
    pub fn new(db: Database, panel: Arc<dyn PanelApi>, cfg: ProvisionConfig) -> Self {
        Self {
            db,
            panel,
            cfg,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.cfg
    }

    /// Full registration: upstream account, local user, optional demo server.
    ///
    /// Upstream account failure is returned. Demo server failure is logged and
    /// leaves `server` empty; the account still counts as created.
    pub async fn register(self: &Arc<Self>, reg: Registration) -> Result<RegistrationOutcome> {
        if self.db.get_user_by_email(&reg.email)?.is_some() {
            return Err(Error::AlreadyExists {
                kind: "user".to_string(),
                id: reg.email,
            });
        }

        let _guard = self.claim(&reg.email)?;
        let mut job = self.db.claim_job(&reg.email)?;
        let username = derive_username(&reg.email, Utc::now().timestamp_millis());

        let upstream_id = self
            .ensure_account(&mut job, &reg.email, &username, &reg.password)
            .await?;

        let user = self
            .db
            .create_user(&reg.email, &username, &reg.password_hash, Some(upstream_id), None)?;
        job.user_id = Some(user.id);
        self.db.update_job(&mut job)?;
        info!("Registered {} (panel user {})", user.email, upstream_id);

        if !reg.demo {
            self.transition(&mut job, ProvisioningState::Done)?;
            return Ok(RegistrationOutcome {
                user,
                server: None,
                setup: None,
            });
        }

        let blueprint = ServerBlueprint {
            name: format!("{}-demo", username),
            user_id: upstream_id,
            limits: ServerLimits::DEMO,
        };

        let created = match self.ensure_server(&mut job, &blueprint).await {
            Ok(created) => created,
            Err(e) => {
                warn!("Demo server creation failed for {}: {}", user.email, e);
                return Ok(RegistrationOutcome {
                    user,
                    server: None,
                    setup: None,
                });
            }
        };

        let created_at = Utc::now();
        let server = ServerInstance {
            id: Uuid::new_v4(),
            owner_user_id: user.id,
            external_server_id: created.id,
            external_identifier: created.identifier.clone(),
            name: format!("{}'s Demo Server", username),
            plan_type: PlanType::Demo,
            is_demo: true,
            demo_expires_at: Some(ServerInstance::demo_expiry_for(created_at)),
            suspended_at: None,
            created_at,
        };
        self.db.create_server(&server)?;

        let setup = self.spawn_setup(job);

        Ok(RegistrationOutcome {
            user,
            server: Some(server),
            setup: Some(setup),
        })
    }

    /// Reserve `email` for the duration of one registration.
    pub fn claim(&self, email: &str) -> Result<InFlightGuard> {
        let mut set = self.in_flight.lock();
        if !set.insert(email.to_string()) {
            return Err(Error::Validation(
                "A registration for this email is already in progress".to_string(),
            ));
        }
        Ok(InFlightGuard {
            set: self.in_flight.clone(),
            email: email.to_string(),
        })
    }

    /// Create the upstream account unless the job already has one.
    pub async fn ensure_account(
        &self,
        job: &mut ProvisioningJob,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<u64> {
        if let Some(id) = job.upstream_user_id {
            debug!("Reusing upstream account {} for {}", id, email);
            return Ok(id);
        }

        self.transition(job, ProvisioningState::AccountCreating)?;
        match self.panel.create_account(email, username, password).await {
            Ok(account) => {
                job.upstream_user_id = Some(account.id);
                self.transition(job, ProvisioningState::AccountCreated)?;
                Ok(account.id)
            }
            Err(e) => {
                self.fail(job, &e)?;
                Err(e)
            }
        }
    }

    /// Create the upstream server unless the job already has one.
    pub async fn ensure_server(
        &self,
        job: &mut ProvisioningJob,
        blueprint: &ServerBlueprint,
    ) -> Result<CreatedServer> {
        if let (Some(id), Some(identifier)) = (job.external_server_id, job.external_identifier.clone()) {
            debug!("Reusing upstream server {} for {}", identifier, job.owner_email);
            return Ok(CreatedServer {
                id,
                identifier,
                uuid: String::new(),
                name: blueprint.name.clone(),
            });
        }

        self.transition(job, ProvisioningState::ServerCreating)?;
        match self.panel.create_server(blueprint).await {
            Ok(created) => {
                job.external_server_id = Some(created.id);
                job.external_identifier = Some(created.identifier.clone());
                self.transition(job, ProvisioningState::ServerCreated)?;
                info!("Created server {} for {}", created.identifier, job.owner_email);
                Ok(created)
            }
            Err(e) => {
                self.fail(job, &e)?;
                Err(e)
            }
        }
    }

    /// Run `setup_and_start` in the background. Failures are logged only.
    pub fn spawn_setup(self: &Arc<Self>, mut job: ProvisioningJob) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.setup_and_start(&mut job).await {
                warn!("Background setup abandoned for {}: {}", job.owner_email, e);
            }
        })
    }

    /// Wait for the install to finish, write the EULA, then start the server.
    pub async fn setup_and_start(&self, job: &mut ProvisioningJob) -> Result<()> {
        let identifier = job.external_identifier.clone().ok_or_else(|| {
            Error::Internal(format!("job {} has no server identifier", job.id))
        })?;

        match self.run_setup(job, &identifier).await {
            Ok(()) => {
                job.last_error = None;
                self.transition(job, ProvisioningState::Done)?;
                info!("Server {} started", identifier);
                Ok(())
            }
            Err(e) => {
                job.attempts += 1;
                self.fail(job, &e)?;
                Err(e)
            }
        }
    }

    async fn run_setup(&self, job: &mut ProvisioningJob, identifier: &str) -> Result<()> {
        let deadline = Instant::now() + self.cfg.setup_budget;
        let cred = Credential::ServiceAccount;
        let panel = &self.panel;

        self.transition(job, ProvisioningState::AwaitingInstall)?;
        self.retry_until(deadline, self.cfg.setup_budget, identifier, "write EULA", || {
            panel.write_file(&cred, identifier, EULA_PATH, EULA_CONTENTS)
        })
        .await?;
        info!("EULA written for server {}", identifier);

        self.transition(job, ProvisioningState::EulaWriting)?;
        tokio::time::sleep(self.cfg.settle_delay).await;

        self.transition(job, ProvisioningState::Starting)?;
        self.retry_until(deadline, self.cfg.setup_budget, identifier, "start", || {
            panel.send_power(&cred, identifier, PowerAction::Start)
        })
        .await
    }

    /// EULA-only variant: accept the EULA without starting the server.
    /// Backs the owner-facing re-accept route.
    pub async fn accept_eula(&self, identifier: &str) -> Result<()> {
        let deadline = Instant::now() + self.cfg.eula_budget;
        let cred = Credential::ServiceAccount;
        let panel = &self.panel;

        self.retry_until(deadline, self.cfg.eula_budget, identifier, "write EULA", || {
            panel.write_file(&cred, identifier, EULA_PATH, EULA_CONTENTS)
        })
        .await?;
        info!("EULA accepted for server {}", identifier);
        Ok(())
    }

    /// Re-run setup for a job the sweeper found stalled.
    pub async fn resume(&self, mut job: ProvisioningJob) -> Result<()> {
        if !job.state.is_resumable() {
            return Err(Error::Internal(format!(
                "job {} in state {} cannot be resumed",
                job.id, job.state
            )));
        }
        self.setup_and_start(&mut job).await
    }

    /// Call `op` until it succeeds, a fatal error occurs, or `deadline` passes.
    async fn retry_until<F, Fut>(
        &self,
        deadline: Instant,
        budget: Duration,
        identifier: &str,
        what: &str,
        mut op: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) => match e.failure_class() {
                    FailureClass::Fatal => {
                        return Err(Error::ProvisioningIncomplete {
                            identifier: identifier.to_string(),
                            reason: format!("{} failed: {}", what, e),
                        });
                    }
                    FailureClass::Installing => {
                        debug!("{} attempt {} for {}: still installing", what, attempt, identifier);
                    }
                    FailureClass::Transient => {
                        debug!("{} attempt {} for {} failed: {}", what, attempt, identifier, e);
                    }
                },
            }

            tokio::time::sleep(self.cfg.retry_delay).await;
            if Instant::now() >= deadline {
                return Err(Error::ProvisioningIncomplete {
                    identifier: identifier.to_string(),
                    reason: format!(
                        "{} did not succeed within {}s ({} attempts)",
                        what,
                        budget.as_secs(),
                        attempt
                    ),
                });
            }
        }
    }

    fn transition(&self, job: &mut ProvisioningJob, state: ProvisioningState) -> Result<()> {
        debug!("Job {} ({}): {} -> {}", job.id, job.owner_email, job.state, state);
        job.state = state;
        self.db.update_job(job)
    }

    fn fail(&self, job: &mut ProvisioningJob, e: &Error) -> Result<()> {
        job.last_error = Some(e.to_string());
        self.transition(job, ProvisioningState::Failed)
    }
}

/// Lowercase and trim, so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Upstream username: the email's local part reduced to ASCII alphanumerics,
/// suffixed with the last four digits of `now_millis`.
pub fn derive_username(email: &str, now_millis: i64) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let mut base: String = local.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if base.is_empty() {
        base.push_str("user");
    }
    format!("{}{:04}", base, now_millis.rem_euclid(10_000))
}
