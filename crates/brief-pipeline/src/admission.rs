//! Admission controller: spawns one worker task per accepted run and
//! gates heavy work behind a bounded semaphore.
//!
//! A worker queues for a permit first and only then marks its run
//! `processing`, so the number of processing runs never exceeds the
//! concurrency bound; queued runs stay `pending` in the store. Batches
//! share a batch-local semaphore sized from the admission-time snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use brief_config::ConfigRegistry;
use brief_store::{Store, StoreError};
use brief_types::{AuditStatus, RunStatus, Webhook, WebhookError};

use crate::engine::{Clients, Orchestrator, PublishTarget};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{0}")]
    Invalid(#[from] WebhookError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Construction parameters beyond the shared collaborators.
#[derive(Debug, Clone, Default)]
pub struct AdmissionConfig {
    pub publish: PublishTarget,
}

struct RunHandle {
    cancel: CancellationToken,
    batch_id: Option<i64>,
}

pub struct AdmissionController {
    store: Store,
    registry: Arc<ConfigRegistry>,
    clients: Clients,
    publish: PublishTarget,
    semaphore: Arc<Semaphore>,
    active: Arc<RwLock<HashMap<i64, RunHandle>>>,
}

impl AdmissionController {
    /// Build the controller and size the process-wide semaphore from the
    /// current config. Later edits to `max_concurrent_runs` apply to
    /// batch submissions and future processes, not this gate.
    pub async fn new(
        store: Store,
        registry: Arc<ConfigRegistry>,
        clients: Clients,
        config: AdmissionConfig,
    ) -> Result<Self, StoreError> {
        store.init()?;
        let capacity = registry.snapshot().await.max_concurrent_runs.max(1) as usize;
        Ok(Self {
            store,
            registry,
            clients,
            publish: config.publish,
            semaphore: Arc::new(Semaphore::new(capacity)),
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConfigRegistry> {
        &self.registry
    }

    /// Accept one webhook: insert the pending stub, spawn a worker, and
    /// return the run id immediately.
    pub async fn submit(&self, webhook: Webhook) -> Result<i64, SubmitError> {
        webhook.validate()?;
        let snapshot = self.registry.snapshot().await;
        let run_id = self.store.insert_run_stub(&webhook, None)?;
        self.spawn_worker(run_id, None, webhook, snapshot, self.semaphore.clone())
            .await;
        Ok(run_id)
    }

    /// Accept a batch: one monotonically assigned batch id, stubs for all
    /// members, and workers sharing a batch-local semaphore sized from
    /// the admission snapshot.
    pub async fn submit_batch(
        &self,
        webhooks: Vec<Webhook>,
    ) -> Result<(i64, Vec<i64>), SubmitError> {
        for webhook in &webhooks {
            webhook.validate()?;
        }

        let snapshot = self.registry.snapshot().await;
        let batch_id = self.store.next_batch_id()?;
        let batch_semaphore = Arc::new(Semaphore::new(snapshot.max_concurrent_runs.max(1) as usize));

        let mut members = Vec::with_capacity(webhooks.len());
        for webhook in webhooks {
            let run_id = self.store.insert_run_stub(&webhook, Some(batch_id))?;
            members.push((run_id, webhook));
        }

        let mut run_ids = Vec::with_capacity(members.len());
        for (run_id, webhook) in members {
            run_ids.push(run_id);
            self.spawn_worker(
                run_id,
                Some(batch_id),
                webhook,
                snapshot.clone(),
                batch_semaphore.clone(),
            )
            .await;
        }

        tracing::info!(batch_id, runs = run_ids.len(), "batch admitted");
        Ok((batch_id, run_ids))
    }

    async fn spawn_worker(
        &self,
        run_id: i64,
        batch_id: Option<i64>,
        webhook: Webhook,
        snapshot: brief_config::PipelineConfig,
        semaphore: Arc<Semaphore>,
    ) {
        let orchestrator = Orchestrator::new(
            webhook,
            snapshot,
            self.store.clone(),
            self.clients.clone(),
            self.publish.clone(),
        );
        let cancel = orchestrator.cancel_token();

        // Register before spawning so an instantly finishing worker can
        // never race its own deregistration.
        self.active.write().await.insert(
            run_id,
            RunHandle {
                cancel: cancel.clone(),
                batch_id,
            },
        );

        let store = self.store.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            // Queue for a slot. A kill while queued cancels the run
            // without it ever entering processing.
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    if let Err(error) = store.update_run_cancelled(run_id) {
                        tracing::error!(run_id, error = %error, "failed to cancel queued run");
                    }
                    store.log_step(
                        run_id,
                        "pipeline_cancelled",
                        AuditStatus::Warning,
                        Some("cancelled while queued"),
                        None,
                        None,
                    );
                    active.write().await.remove(&run_id);
                    return;
                }
            };
            let Ok(_permit) = permit else {
                active.write().await.remove(&run_id);
                return;
            };

            if let Err(error) = store.mark_run_processing(run_id) {
                tracing::error!(run_id, error = %error, "failed to mark run processing");
            }

            let outcome = orchestrator.execute(Some(run_id)).await;
            tracing::info!(run_id, status = outcome.status_label(), "worker finished");
            active.write().await.remove(&run_id);
        });
    }

    /// Signal cancellation for one run. Live workers get their token
    /// fired; a stale pending/processing row with no worker is cancelled
    /// directly. Returns whether anything was signalled.
    pub async fn kill(&self, run_id: i64) -> Result<bool, StoreError> {
        if let Some(handle) = self.active.read().await.get(&run_id) {
            handle.cancel.cancel();
            tracing::info!(run_id, "kill signal sent");
            return Ok(true);
        }

        match self.store.get_run_status(run_id)? {
            Some(RunStatus::Pending) | Some(RunStatus::Processing) => {
                self.store.update_run_cancelled(run_id)?;
                self.store.log_step(
                    run_id,
                    "pipeline_cancelled",
                    AuditStatus::Warning,
                    Some("cancelled without live worker"),
                    None,
                    None,
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Fire cancellation on every live worker in a batch. Returns how
    /// many workers were signalled.
    pub async fn kill_batch(&self, batch_id: i64) -> usize {
        let active = self.active.read().await;
        let mut signalled = 0;
        for handle in active.values() {
            if handle.batch_id == Some(batch_id) {
                handle.cancel.cancel();
                signalled += 1;
            }
        }
        tracing::info!(batch_id, signalled, "batch kill signal sent");
        signalled
    }

    pub async fn is_active(&self, run_id: i64) -> bool {
        self.active.read().await.contains_key(&run_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}
