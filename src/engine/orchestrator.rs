//! Rotation orchestrator: one run over every member of the group.

use super::cancel::CancelSignal;
use super::reconciler::Reconciler;
use super::report::{RotationOutcome, RunReport};
use super::waiter::PollPolicy;
use crate::clients::{Identity, IdentityProvider, SecretStore};
use crate::config::Config;
use crate::error::{Result, RotationError};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Tunables for a run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub group_id: String,
    pub concurrency: usize,
    /// Delay between starting consecutive identities.
    pub pacing: Duration,
    pub deadline: Option<Duration>,
    pub poll: PollPolicy,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            group_id: config.identity_provider.group_id.clone(),
            concurrency: config.rotation.concurrency.max(1),
            pacing: Duration::from_millis(config.rotation.pacing_ms),
            deadline: config.rotation.deadline(),
            poll: PollPolicy::from(&config.rotation),
        }
    }
}

/// What a run would do for one identity, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    pub identity: Identity,
    pub action: PlanKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Create,
    Rotate,
    LookupFailed,
}

pub struct Orchestrator {
    idp: Arc<dyn IdentityProvider>,
    store: Arc<dyn SecretStore>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(idp: Arc<dyn IdentityProvider>, store: Arc<dyn SecretStore>, settings: RunSettings) -> Self {
        Self { idp, store, settings }
    }

    /// List the group and check the vault is reachable. Any error here is
    /// run-fatal and happens before the first mutation.
    async fn prepare(&self) -> Result<Vec<Identity>> {
        let members = self
            .idp
            .list_group_members(&self.settings.group_id)
            .await
            .map_err(|e| {
                error!("Cannot list members of group {}: {}", self.settings.group_id, e);
                e
            })?;

        self.store.verify_access().await.map_err(|e| {
            error!("Secret store {} is not accessible: {}", self.store.name(), e);
            e
        })?;

        Ok(dedupe(members))
    }

    /// Reconcile every group member. Per-identity failures land in the
    /// report; only listing or access failures return `Err`.
    pub async fn run(&self, cancel: &CancelSignal) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let deadline_timer = self.settings.deadline.map(|d| cancel.cancel_after(d));

        let result = self.run_inner(run_id, cancel).await;

        if let Some(timer) = deadline_timer {
            timer.abort();
        }

        let outcomes = result?;
        let report = RunReport::new(run_id, started_at, outcomes);
        let s = report.summary();
        info!(
            "Run {} finished: {} created, {} rotated, {} failed, {} cancelled",
            run_id, s.created, s.rotated, s.failed, s.cancelled
        );
        Ok(report)
    }

    async fn run_inner(&self, run_id: Uuid, cancel: &CancelSignal) -> Result<Vec<RotationOutcome>> {
        if cancel.is_cancelled() {
            return Err(RotationError::Cancelled);
        }
        let identities = self.prepare().await?;
        info!(
            "Run {}: reconciling {} identities (concurrency {})",
            run_id,
            identities.len(),
            self.settings.concurrency
        );

        let reconciler = Arc::new(Reconciler::new(
            self.store.clone(),
            self.idp.clone(),
            self.settings.poll.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut join_set: JoinSet<(usize, RotationOutcome)> = JoinSet::new();
        let mut slots: Vec<Option<RotationOutcome>> = vec![None; identities.len()];

        for (index, identity) in identities.iter().enumerate() {
            if index > 0 && !self.settings.pacing.is_zero() {
                cancel.run_until_cancelled(tokio::time::sleep(self.settings.pacing)).await;
            }

            // Wait for a free slot, collecting finished work meanwhile.
            let permit = loop {
                while let Some(joined) = join_set.try_join_next() {
                    record_joined(joined, &mut slots, cancel);
                }
                if cancel.is_cancelled() {
                    break None;
                }
                if let Ok(permit) = semaphore.clone().try_acquire_owned() {
                    break Some(permit);
                }
                // Every permit is held by a task in `join_set`.
                tokio::select! {
                    Some(joined) = join_set.join_next() => {
                        record_joined(joined, &mut slots, cancel);
                    }
                    _ = cancel.cancelled() => {}
                }
            };
            let Some(permit) = permit else {
                break;
            };

            let reconciler = reconciler.clone();
            let identity = identity.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = permit;
                // Inner task so a panic still maps back to this identity.
                let task_identity = identity.clone();
                let task = tokio::spawn(async move { reconciler.reconcile(&task_identity, &cancel).await });
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("{}: reconciliation task failed: {}", identity.id, e);
                        let reason = if e.is_panic() {
                            "reconciliation panicked"
                        } else {
                            "reconciliation task was aborted"
                        };
                        RotationOutcome::aborted(identity, reason)
                    }
                };
                (index, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            record_joined(joined, &mut slots, cancel);
        }

        // Anything never started was cut off by cancellation.
        Ok(slots
            .into_iter()
            .zip(identities)
            .map(|(slot, identity)| slot.unwrap_or_else(|| RotationOutcome::cancelled(identity)))
            .collect())
    }

    /// Dry run: report whether each identity would be created or rotated.
    pub async fn plan(&self) -> Result<Vec<PlannedAction>> {
        let identities = self.prepare().await?;
        let mut planned = Vec::with_capacity(identities.len());

        for identity in identities {
            let (action, item_id) = match self.store.find_record(&identity.id).await {
                Ok(Some(record)) => (PlanKind::Rotate, Some(record.item_id)),
                Ok(None) => (PlanKind::Create, None),
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: lookup failed: {}", identity.id, e);
                    (PlanKind::LookupFailed, None)
                }
            };
            planned.push(PlannedAction {
                identity,
                action,
                item_id,
            });
        }

        Ok(planned)
    }
}

fn record_joined(
    joined: std::result::Result<(usize, RotationOutcome), tokio::task::JoinError>,
    slots: &mut [Option<RotationOutcome>],
    cancel: &CancelSignal,
) {
    match joined {
        Ok((index, outcome)) => {
            if outcome.run_fatal && !cancel.is_cancelled() {
                error!(
                    "{}: credentials rejected, cancelling remaining identities",
                    outcome.identity.id
                );
                cancel.cancel();
            }
            slots[index] = Some(outcome);
        }
        Err(e) => error!("Reconciliation task panicked: {}", e),
    }
}

/// Drop repeated identities, keeping the first occurrence.
fn dedupe(members: Vec<Identity>) -> Vec<Identity> {
    let mut seen = HashSet::new();
    members
        .into_iter()
        .filter(|identity| {
            let fresh = seen.insert(identity.id.clone());
            if !fresh {
                warn!("Group lists {} more than once; reconciling it once", identity.id);
            }
            fresh
        })
        .collect()
}
