//! Reconciler for maintaining desired state.
//!
//! This module ties the diff engine and the plan executor together: it
//! computes plans from a validated document and the state store, applies
//! them with one worker per resource, imports existing objects, and checks
//! recorded state against the remote API for drift.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, ResourceAddress, Settings, ValidatedConfig};
use crate::error::{HcloudError, Result};
use crate::hcloud::CloudApi;
use crate::planner::{
    DiffEngine, DiffResult, DriftRecord, DriftStatus, OperationStatus, OperationType, Plan,
    PlanExecutor, ResourceOutcome, RetryPolicy,
};
use crate::state::{ResourceState, StateStore, generate_holder_id};

/// Default number of resources reconciled at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Reconciler for maintaining desired state.
pub struct Reconciler {
    /// State store.
    store: Arc<dyn StateStore>,
    /// Executor shared by all workers.
    executor: Arc<PlanExecutor>,
    /// Diff engine.
    diff_engine: DiffEngine,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Maximum resources in flight.
    concurrency: usize,
}

/// Result of applying a plan.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Per-resource outcomes, in plan order.
    pub outcomes: Vec<ResourceOutcome>,
    /// Worker failures that produced no outcome.
    pub worker_errors: Vec<String>,
}

/// Operation counts of an apply, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ApplySummary {
    /// Applied creates.
    pub created: usize,
    /// Applied updates.
    pub updated: usize,
    /// Applied deletes.
    pub deleted: usize,
    /// Applied imports.
    pub imported: usize,
    /// Failed operations.
    pub failed: usize,
    /// Operations skipped after a failure or cancellation.
    pub not_run: usize,
}

/// Report of drift detection.
#[derive(Debug, serde::Serialize)]
pub struct DriftReport {
    /// One record per state entry.
    pub records: Vec<DriftRecord>,
    /// Resources that still need changes after the refresh.
    pub pending: Vec<ResourceAddress>,
}

impl Reconciler {
    /// Creates a new reconciler with default settings.
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>, store: Arc<dyn StateStore>) -> Self {
        Self {
            executor: Arc::new(PlanExecutor::new(api, Arc::clone(&store))),
            store,
            diff_engine: DiffEngine::new(),
            hasher: ConfigHasher::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Creates a reconciler using the document settings.
    #[must_use]
    pub fn with_settings(api: Arc<dyn CloudApi>, store: Arc<dyn StateStore>, settings: &Settings) -> Self {
        let executor = PlanExecutor::new(api, Arc::clone(&store)).with_retry(RetryPolicy::from(&settings.retry));
        Self {
            executor: Arc::new(executor),
            store,
            diff_engine: DiffEngine::new(),
            hasher: ConfigHasher::new(),
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Sets the maximum number of resources reconciled at once.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the configured concurrency.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Computes the diff between the document and recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read.
    pub async fn diff(&self, config: &ValidatedConfig) -> Result<DiffResult> {
        let state = self.store.list().await?;
        let diff = self.diff_engine.compute(config, &state);

        info!(
            "Diff: {} creates, {} updates, {} replaces, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );
        Ok(diff)
    }

    /// Computes the plan for a document.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store cannot be read.
    pub async fn plan(&self, config: &ValidatedConfig) -> Result<Plan> {
        let diff = self.diff(config).await?;
        let config_hash = self.hasher.hash_config(config);

        if !diff.has_changes() {
            info!("No changes required, state is converged");
            return Ok(Plan::empty(&config_hash));
        }
        Ok(Plan::from_diff(&diff, &config_hash))
    }

    /// Applies a plan, one worker per resource, holding the state lock.
    ///
    /// Failures are reported per resource in the returned report.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan is inconsistent or the state lock cannot
    /// be taken or released.
    pub async fn apply(&self, plan: &Plan, cancel: &CancellationToken) -> Result<ApplyReport> {
        plan.validate()?;

        if plan.is_empty() {
            return Ok(ApplyReport::default());
        }

        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        debug!("Acquired state lock {}", lock.lock_id);

        let report = self.run(plan, cancel).await;

        self.store.release_lock(&lock.lock_id).await?;
        Ok(report)
    }

    async fn run(&self, plan: &Plan, cancel: &CancellationToken) -> ApplyReport {
        info!(
            "Applying plan: {} resources, concurrency {}",
            plan.resources.len(),
            self.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for (index, resource) in plan.resources.iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let operations = resource.operations.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                // Never closed.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, executor.execute_resource(&operations, &cancel).await)
            });
        }

        let mut finished: Vec<(usize, ResourceOutcome)> = Vec::with_capacity(plan.resources.len());
        let mut report = ApplyReport::default();

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(entry) => finished.push(entry),
                Err(err) => {
                    error!("Worker failed: {err}");
                    report.worker_errors.push(err.to_string());
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        report.outcomes = finished.into_iter().map(|(_, outcome)| outcome).collect();

        let summary = report.summary();
        info!(
            "Apply finished: {} created, {} updated, {} deleted, {} failed",
            summary.created, summary.updated, summary.deleted, summary.failed
        );
        report
    }

    /// Computes and applies the plan for a document.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::plan`] and [`Reconciler::apply`].
    pub async fn reconcile(
        &self,
        config: &ValidatedConfig,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        let plan = self.plan(config).await?;
        self.apply(&plan, cancel).await
    }

    /// Adopts an existing remote object into state without creating it.
    ///
    /// # Errors
    ///
    /// Returns `ImportMismatch` when the object is of another kind or cannot
    /// be decoded, `Rejected` when it does not exist, or any store error.
    pub async fn import(&self, address: &ResourceAddress, id: u64) -> Result<ResourceState> {
        info!("Importing {address} from id {id}");

        let plan = Plan::import(self.diff_engine.import(address, id));
        let report = self.apply(&plan, &CancellationToken::new()).await?;

        let outcome = report
            .outcomes
            .into_iter()
            .next()
            .ok_or_else(|| HcloudError::internal("import produced no outcome"))?;
        outcome.into_result()?;

        self.store
            .get(address)
            .await?
            .ok_or_else(|| HcloudError::internal(format!("{address} missing after import")))
    }

    /// Refreshes every state entry from the remote API, then diffs the
    /// document against the refreshed state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a remote read fails.
    pub async fn check_drift(&self, config: &ValidatedConfig) -> Result<DriftReport> {
        info!("Checking for drift");

        let mut records = Vec::new();
        for (address, _) in self.store.list().await? {
            if let Some(record) = self.executor.refresh(&address).await? {
                if record.status != DriftStatus::InSync {
                    warn!("{address}: {}", record.status);
                }
                records.push(record);
            }
        }

        let diff = self.diff(config).await?;
        let pending = diff
            .actionable_diffs()
            .into_iter()
            .map(|d| d.address.clone())
            .collect();

        Ok(DriftReport { records, pending })
    }

    /// Deletes every object recorded in state.
    ///
    /// # Errors
    ///
    /// See [`Reconciler::apply`].
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<ApplyReport> {
        let state = self.store.list().await?;
        info!("Destroying {} resources", state.len());

        let diff = self.diff_engine.destroy(&state);
        let plan = Plan::from_diff(&diff, "");
        self.apply(&plan, cancel).await
    }
}

impl ApplyReport {
    /// Returns true if every resource was applied without error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.worker_errors.is_empty() && self.outcomes.iter().all(ResourceOutcome::is_success)
    }

    /// Returns true if any resource was stopped by cancellation.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.outcomes.iter().any(ResourceOutcome::was_cancelled)
    }

    /// Outcomes that ended in an error.
    #[must_use]
    pub fn failures(&self) -> Vec<&ResourceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    /// Counts applied operations by type.
    #[must_use]
    pub fn summary(&self) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for result in self.outcomes.iter().flat_map(|o| &o.results) {
            match result.status {
                OperationStatus::Applied => match result.operation.op_type() {
                    OperationType::Create => summary.created += 1,
                    OperationType::Update => summary.updated += 1,
                    OperationType::Delete => summary.deleted += 1,
                    OperationType::Import => summary.imported += 1,
                },
                OperationStatus::Failed => summary.failed += 1,
                OperationStatus::Cancelled | OperationStatus::Skipped => summary.not_run += 1,
            }
        }
        summary
    }
}

impl DriftReport {
    /// Returns true if any remote object differed from recorded state.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.records.iter().any(|r| r.status != DriftStatus::InSync)
    }

    /// Returns true if the state is converged (no drift, nothing pending).
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift() && self.pending.is_empty()
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_converged() {
            return write!(f, "No drift detected, state is converged");
        }

        if self.has_drift() {
            writeln!(f, "Drift detected:")?;
            for record in self.records.iter().filter(|r| r.status != DriftStatus::InSync) {
                writeln!(f, "  - {} ({})", record.address, record.status)?;
                for change in &record.changes {
                    writeln!(f, "      {change}")?;
                }
            }
        }

        if !self.pending.is_empty() {
            writeln!(f, "Pending changes:")?;
            for address in &self.pending {
                writeln!(f, "  - {address}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted",
            self.created, self.updated, self.deleted
        )?;
        if self.imported > 0 {
            write!(f, ", {} imported", self.imported)?;
        }
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.not_run > 0 {
            write!(f, ", {} not run", self.not_run)?;
        }
        Ok(())
    }
}
