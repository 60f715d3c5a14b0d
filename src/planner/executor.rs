//! Plan executor for applying operations against the remote API.
//!
//! This module runs one resource's operations in order, retries transient
//! failures with exponential backoff, honours cancellation, and writes the
//! state store after every successful remote call.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, ResourceAddress, ResourceIntent, ResourceKind, RetrySettings};
use crate::error::{ApiError, HcloudError, ReconcileError, Result};
use crate::hcloud::CloudApi;
use crate::state::{ResourceState, StateStore};

use super::diff::{FieldChange, Operation, field_changes};

/// Backoff policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

/// Executor for reconciliation operations.
pub struct PlanExecutor {
    /// Remote API.
    api: Arc<dyn CloudApi>,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Retry policy.
    retry: RetryPolicy,
    /// Hasher for recorded attributes.
    hasher: ConfigHasher,
}

/// Final status of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// The remote call succeeded and state was written.
    Applied,
    /// The operation failed.
    Failed,
    /// Cancellation stopped the worker before the operation ran.
    Cancelled,
    /// An earlier operation of the same resource failed.
    Skipped,
}

/// Result of executing a single operation.
#[derive(Debug, Clone)]
pub struct OperationResult {
    /// Operation that was executed.
    pub operation: Operation,
    /// Final status.
    pub status: OperationStatus,
    /// Remote calls made.
    pub attempts: u32,
    /// Error message (if failed).
    pub error: Option<String>,
}

/// Result of executing one resource's operation list.
#[derive(Debug)]
pub struct ResourceOutcome {
    /// Resource address.
    pub address: ResourceAddress,
    /// Per-operation results, in execution order.
    pub results: Vec<OperationResult>,
    /// The error that stopped the list, if any.
    pub error: Option<HcloudError>,
}

/// What a refresh found for one state entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    /// Remote matches the recorded attributes.
    InSync,
    /// Remote differs; state was rewritten from the remote object.
    Drifted,
    /// Remote object no longer exists; the entry was removed.
    Gone,
}

/// Result of refreshing one state entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DriftRecord {
    /// Resource address.
    pub address: ResourceAddress,
    /// Remote identifier.
    pub id: u64,
    /// What was found.
    pub status: DriftStatus,
    /// Differences between recorded and observed attributes.
    pub changes: Vec<FieldChange>,
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(
            settings.max_attempts.max(1),
            Duration::from_millis(settings.base_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
        )
    }
}

impl PlanExecutor {
    /// Creates a new plan executor.
    #[must_use]
    pub fn new(api: Arc<dyn CloudApi>, store: Arc<dyn StateStore>) -> Self {
        Self {
            api,
            store,
            retry: RetryPolicy::default(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Applies one resource's operations sequentially.
    ///
    /// The first fatal error stops the list; later operations are reported
    /// as skipped. Once `cancel` fires no new remote call is started and the
    /// remaining operations are reported as cancelled.
    pub async fn execute_resource(
        &self,
        operations: &[Operation],
        cancel: &CancellationToken,
    ) -> ResourceOutcome {
        let address = operations
            .first()
            .map(|op| op.address().clone())
            .unwrap_or_else(|| ResourceAddress::new(ResourceKind::Firewall, ""));

        let mut outcome = ResourceOutcome {
            address,
            results: Vec::with_capacity(operations.len()),
            error: None,
        };

        for operation in operations {
            if outcome.error.is_some() {
                outcome.push(operation, OperationStatus::Skipped, 0, None);
                continue;
            }

            info!("Executing {operation}");
            let (result, attempts) = self.execute_operation(operation, cancel).await;

            match result {
                Ok(()) => outcome.push(operation, OperationStatus::Applied, attempts, None),
                Err(err) => {
                    let status = if matches!(
                        err,
                        HcloudError::Reconcile(ReconcileError::Cancelled { .. })
                    ) {
                        warn!("{operation} cancelled");
                        OperationStatus::Cancelled
                    } else {
                        error!("{operation} failed: {err}");
                        OperationStatus::Failed
                    };
                    outcome.push(operation, status, attempts, Some(err.to_string()));
                    outcome.error = Some(err);
                }
            }
        }

        // Operations after a cancellation were never started either.
        if outcome.was_cancelled() {
            for result in &mut outcome.results {
                if result.status == OperationStatus::Skipped {
                    result.status = OperationStatus::Cancelled;
                }
            }
        }

        outcome
    }

    async fn execute_operation(
        &self,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> (Result<()>, u32) {
        match operation {
            Operation::Create { address, intent } => self.create(operation, address, intent, cancel).await,
            Operation::Update {
                address, id, target, ..
            } => self.update(operation, address, *id, target, cancel).await,
            Operation::Delete { address, kind, id } => {
                self.delete(operation, address, *kind, *id, cancel).await
            }
            Operation::Import { address, kind, id } => {
                self.import(operation, address, *kind, *id, cancel).await
            }
        }
    }

    async fn create(
        &self,
        operation: &Operation,
        address: &ResourceAddress,
        intent: &ResourceIntent,
        cancel: &CancellationToken,
    ) -> (Result<()>, u32) {
        let api = self.api.as_ref();
        let (result, attempts) = self
            .retry_call(operation, cancel, create_is_retryable, move || api.create(intent))
            .await;

        let outcome = match result {
            Ok(remote) => {
                info!("Created {address} (id {})", remote.id());
                let state = ResourceState::new(remote.id(), intent.clone(), self.hasher.hash_intent(intent));
                self.store.put(address, state).await
            }
            Err(err) => Err(err),
        };
        (outcome, attempts)
    }

    async fn update(
        &self,
        operation: &Operation,
        address: &ResourceAddress,
        id: u64,
        target: &ResourceIntent,
        cancel: &CancellationToken,
    ) -> (Result<()>, u32) {
        let api = self.api.as_ref();
        let (result, attempts) = self
            .retry_call(operation, cancel, HcloudError::is_transient, move || {
                api.update(id, target)
            })
            .await;

        let outcome = match result {
            Ok(_) => {
                info!("Updated {address} (id {id})");
                let hash = self.hasher.hash_intent(target);
                match self.store.get(address).await {
                    Ok(Some(existing)) if existing.id == id => {
                        self.store
                            .put(address, existing.with_attributes(target.clone(), hash))
                            .await
                    }
                    Ok(_) => {
                        self.store
                            .put(address, ResourceState::new(id, target.clone(), hash))
                            .await
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err.not_found_as_rejected()),
        };
        (outcome, attempts)
    }

    async fn delete(
        &self,
        operation: &Operation,
        address: &ResourceAddress,
        kind: ResourceKind,
        id: u64,
        cancel: &CancellationToken,
    ) -> (Result<()>, u32) {
        let api = self.api.as_ref();
        let (result, attempts) = self
            .retry_call(operation, cancel, HcloudError::is_transient, move || {
                api.delete(kind, id)
            })
            .await;

        let outcome = match result {
            Ok(()) => {
                info!("Deleted {address} (id {id})");
                self.store.delete(address).await.map(|_| ())
            }
            Err(err) if err.is_not_found() => {
                info!("{address} (id {id}) was already deleted");
                self.store.delete(address).await.map(|_| ())
            }
            Err(err) => Err(err),
        };
        (outcome, attempts)
    }

    async fn import(
        &self,
        operation: &Operation,
        address: &ResourceAddress,
        kind: ResourceKind,
        id: u64,
        cancel: &CancellationToken,
    ) -> (Result<()>, u32) {
        let api = self.api.as_ref();
        let (result, attempts) = self
            .retry_call(operation, cancel, HcloudError::is_transient, move || api.read(kind, id))
            .await;

        let remote = match result {
            Ok(remote) => remote,
            Err(err) => return (Err(err.not_found_as_rejected()), attempts),
        };

        let mismatch = |found: String| {
            HcloudError::Reconcile(ReconcileError::ImportMismatch {
                address: address.to_string(),
                id,
                expected: kind.type_name().to_string(),
                found,
            })
        };

        if remote.kind() != kind {
            return (Err(mismatch(remote.kind().type_name().to_string())), attempts);
        }

        let intent = match remote.to_intent() {
            Ok(intent) => intent,
            Err(reason) => return (Err(mismatch(reason)), attempts),
        };

        info!("Imported {address} (id {id})");
        let state = ResourceState::new(id, intent.clone(), self.hasher.hash_intent(&intent));
        (self.store.put(address, state).await, attempts)
    }

    /// Reads the remote object behind a state entry and records what it finds.
    ///
    /// Returns `None` when the address has no state entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails for any reason other than the
    /// object being gone, or if the store cannot be written.
    pub async fn refresh(&self, address: &ResourceAddress) -> Result<Option<DriftRecord>> {
        let Some(recorded) = self.store.get(address).await? else {
            return Ok(None);
        };

        let api = self.api.as_ref();
        let kind = recorded.kind;
        let id = recorded.id;
        let (result, _) = self
            .retry_call_uncancellable(move || api.read(kind, id))
            .await;

        let remote = match result {
            Ok(remote) => remote,
            Err(err) if err.is_not_found() => {
                warn!("{address} (id {id}) no longer exists remotely");
                self.store.delete(address).await?;
                return Ok(Some(DriftRecord {
                    address: address.clone(),
                    id,
                    status: DriftStatus::Gone,
                    changes: vec![],
                }));
            }
            Err(err) => return Err(err),
        };

        let observed = remote.to_intent().map_err(|message| {
            HcloudError::Api(ApiError::InvalidResponse {
                message: format!("{address} (id {id}): {message}"),
            })
        })?;

        let hash = self.hasher.hash_intent(&observed);
        if ConfigHasher::hashes_match(&recorded.config_hash, &hash) {
            debug!("{address} is in sync");
            return Ok(Some(DriftRecord {
                address: address.clone(),
                id,
                status: DriftStatus::InSync,
                changes: vec![],
            }));
        }

        let changes = field_changes(&recorded.attributes, &observed);
        warn!("{address} drifted ({} fields)", changes.len());
        self.store
            .put(address, recorded.with_attributes(observed, hash))
            .await?;

        Ok(Some(DriftRecord {
            address: address.clone(),
            id,
            status: DriftStatus::Drifted,
            changes,
        }))
    }

    async fn retry_call_uncancellable<T, F, Fut>(&self, call: F) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_loop(None, None, HcloudError::is_transient, call)
            .await
    }

    async fn retry_call<T, F, Fut>(
        &self,
        operation: &Operation,
        cancel: &CancellationToken,
        retryable: fn(&HcloudError) -> bool,
        call: F,
    ) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_loop(Some(operation), Some(cancel), retryable, call)
            .await
    }

    /// Calls `call` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. Returns the result and the number of calls made.
    async fn retry_loop<T, F, Fut>(
        &self,
        operation: Option<&Operation>,
        cancel: Option<&CancellationToken>,
        retryable: fn(&HcloudError) -> bool,
        mut call: F,
    ) -> (Result<T>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let cancelled = || {
            HcloudError::Reconcile(ReconcileError::Cancelled {
                address: operation.map_or_else(String::new, |op| op.address().to_string()),
                operation: operation.map_or_else(String::new, |op| op.op_type().to_string()),
            })
        };

        let mut attempt = 0;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return (Err(cancelled()), attempt);
            }

            attempt += 1;
            let err = match call().await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };

            if !retryable(&err) {
                return (Err(err), attempt);
            }

            if attempt >= self.retry.max_attempts {
                let what = operation.map_or_else(|| String::from("read"), ToString::to_string);
                return (
                    Err(HcloudError::Reconcile(ReconcileError::RetriesExhausted {
                        operation: what,
                        attempts: attempt,
                        last_error: err.to_string(),
                    })),
                    attempt,
                );
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                "Attempt {attempt}/{} failed: {err}; retrying in {delay:?}",
                self.retry.max_attempts
            );

            match cancel {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => return (Err(cancelled()), attempt),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// A create is only repeated when the remote cannot have created the object.
fn create_is_retryable(err: &HcloudError) -> bool {
    matches!(
        err,
        HcloudError::Api(ApiError::Transient {
            status: None | Some(429 | 503),
            ..
        })
    )
}

impl ResourceOutcome {
    fn push(
        &mut self,
        operation: &Operation,
        status: OperationStatus,
        attempts: u32,
        error: Option<String>,
    ) {
        self.results.push(OperationResult {
            operation: operation.clone(),
            status,
            attempts,
            error,
        });
    }

    /// Returns true if every operation was applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if cancellation stopped this resource.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        matches!(
            self.error,
            Some(HcloudError::Reconcile(ReconcileError::Cancelled { .. }))
        )
    }

    /// Number of operations with the given status.
    #[must_use]
    pub fn count(&self, status: OperationStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Converts the outcome into a plain result.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the operation list.
    pub fn into_result(self) -> Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InSync => "in sync",
            Self::Drifted => "drifted",
            Self::Gone => "gone",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FirewallIntent, NetworkIntent};
    use crate::hcloud::{Firewall, MockCloudApi, Network, RemoteObject};
    use crate::state::MemoryStateStore;
    use mockall::predicate::eq;
    use std::collections::BTreeMap;

    fn network_intent() -> ResourceIntent {
        ResourceIntent::Network(NetworkIntent {
            name: String::from("private"),
            labels: BTreeMap::new(),
            ip_range: "10.0.0.0/16".parse().unwrap(),
        })
    }

    fn remote_network(id: u64) -> RemoteObject {
        RemoteObject::Network(Network {
            id,
            name: String::from("private"),
            labels: BTreeMap::new(),
            ip_range: String::from("10.0.0.0/16"),
            created: None,
        })
    }

    fn address() -> ResourceAddress {
        "hcloud_network.private".parse().unwrap()
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn executor(api: MockCloudApi, store: Arc<MemoryStateStore>) -> PlanExecutor {
        PlanExecutor::new(Arc::new(api), store).with_retry(fast_retry(3))
    }

    fn transient(status: Option<u16>) -> HcloudError {
        HcloudError::Api(ApiError::transient(status, "try again"))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_create_records_state() {
        let mut api = MockCloudApi::new();
        api.expect_create()
            .times(1)
            .returning(|_| Ok(remote_network(42)));
        let store = Arc::new(MemoryStateStore::new());
        let executor = executor(api, Arc::clone(&store));

        let ops = vec![Operation::Create {
            address: address(),
            intent: network_intent(),
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        let state = store.get(&address()).await.unwrap().unwrap();
        assert_eq!(state.id, 42);
        assert_eq!(state.attributes, network_intent());
    }

    #[tokio::test]
    async fn test_update_retries_transient_then_succeeds() {
        let mut api = MockCloudApi::new();
        let mut calls = 0;
        api.expect_update()
            .with(eq(7), eq(network_intent()))
            .times(3)
            .returning(move |_, _| {
                calls += 1;
                if calls < 3 {
                    Err(transient(Some(503)))
                } else {
                    Ok(remote_network(7))
                }
            });
        let store = Arc::new(MemoryStateStore::new());
        let executor = executor(api, Arc::clone(&store));

        let ops = vec![Operation::Update {
            address: address(),
            id: 7,
            target: network_intent(),
            changes: vec![],
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.results[0].attempts, 3);
        assert_eq!(store.get(&address()).await.unwrap().unwrap().id, 7);
    }

    #[tokio::test]
    async fn test_update_exhausts_retries() {
        let mut api = MockCloudApi::new();
        api.expect_update()
            .times(3)
            .returning(|_, _| Err(transient(Some(500))));
        let executor = executor(api, Arc::new(MemoryStateStore::new()));

        let ops = vec![Operation::Update {
            address: address(),
            id: 7,
            target: network_intent(),
            changes: vec![],
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome.error,
            Some(HcloudError::Reconcile(ReconcileError::RetriesExhausted { attempts: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let mut api = MockCloudApi::new();
        api.expect_update().times(1).returning(|_, _| {
            Err(HcloudError::Api(ApiError::rejected(
                422,
                "invalid_input",
                "bad rule",
            )))
        });
        let executor = executor(api, Arc::new(MemoryStateStore::new()));

        let ops = vec![Operation::Update {
            address: address(),
            id: 7,
            target: network_intent(),
            changes: vec![],
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert_eq!(outcome.count(OperationStatus::Failed), 1);
        assert_eq!(outcome.results[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_update_of_missing_object_is_rejected() {
        let mut api = MockCloudApi::new();
        api.expect_update().times(1).returning(|_, _| {
            Err(HcloudError::Api(ApiError::NotFound {
                kind: String::from("network"),
                id: 7,
            }))
        });
        let executor = executor(api, Arc::new(MemoryStateStore::new()));

        let ops = vec![Operation::Update {
            address: address(),
            id: 7,
            target: network_intent(),
            changes: vec![],
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome.error,
            Some(HcloudError::Api(ApiError::Rejected { status: 404, .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_is_not_retried_on_500() {
        let mut api = MockCloudApi::new();
        api.expect_create()
            .times(1)
            .returning(|_| Err(transient(Some(500))));
        let store = Arc::new(MemoryStateStore::new());
        let executor = executor(api, Arc::clone(&store));

        let ops = vec![Operation::Create {
            address: address(),
            intent: network_intent(),
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(outcome.error.as_ref().is_some_and(HcloudError::is_transient));
        assert!(store.get(&address()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_retries_connection_failure_up_to_configured_attempts() {
        let mut api = MockCloudApi::new();
        let mut calls = 0;
        api.expect_create().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(transient(None))
            } else {
                Ok(remote_network(9))
            }
        });
        let store = Arc::new(MemoryStateStore::new());
        let executor = PlanExecutor::new(Arc::new(api), Arc::clone(&store) as Arc<dyn StateStore>)
            .with_retry(fast_retry(2));
        assert_eq!(executor.retry_policy().max_attempts, 2);

        let ops = vec![Operation::Create {
            address: address(),
            intent: network_intent(),
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.results[0].attempts, 2);
        assert_eq!(store.get(&address()).await.unwrap().unwrap().id, 9);
    }

    #[tokio::test]
    async fn test_delete_of_absent_object_succeeds() {
        let mut api = MockCloudApi::new();
        api.expect_delete().times(1).returning(|_, id| {
            Err(HcloudError::Api(ApiError::NotFound {
                kind: String::from("network"),
                id,
            }))
        });
        let store = Arc::new(MemoryStateStore::with_entries([(
            address(),
            ResourceState::new(9, network_intent(), "hash"),
        )]));
        let executor = executor(api, Arc::clone(&store));

        let ops = vec![Operation::Delete {
            address: address(),
            kind: ResourceKind::Network,
            id: 9,
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(outcome.is_success());
        assert!(store.get(&address()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_skips_rest_of_resource() {
        let mut api = MockCloudApi::new();
        api.expect_delete().times(1).returning(|_, _| {
            Err(HcloudError::Api(ApiError::rejected(403, "forbidden", "no")))
        });
        api.expect_create().times(0);
        let executor = executor(api, Arc::new(MemoryStateStore::new()));

        let ops = vec![
            Operation::Delete {
                address: address(),
                kind: ResourceKind::Network,
                id: 9,
            },
            Operation::Create {
                address: address(),
                intent: network_intent(),
            },
        ];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert_eq!(outcome.results[0].status, OperationStatus::Failed);
        assert_eq!(outcome.results[1].status, OperationStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cancelled_token_prevents_calls() {
        let mut api = MockCloudApi::new();
        api.expect_create().times(0);
        let executor = executor(api, Arc::new(MemoryStateStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ops = vec![Operation::Create {
            address: address(),
            intent: network_intent(),
        }];
        let outcome = executor.execute_resource(&ops, &cancel).await;

        assert!(outcome.was_cancelled());
        assert_eq!(outcome.count(OperationStatus::Cancelled), 1);
    }

    #[tokio::test]
    async fn test_import_of_wrong_kind_leaves_store_untouched() {
        let mut api = MockCloudApi::new();
        api.expect_read()
            .with(eq(ResourceKind::Firewall), eq(5))
            .times(1)
            .returning(|_, _| Ok(remote_network(5)));
        let store = Arc::new(MemoryStateStore::new());
        let executor = executor(api, Arc::clone(&store));

        let target: ResourceAddress = "hcloud_firewall.web".parse().unwrap();
        let ops = vec![Operation::Import {
            address: target.clone(),
            kind: ResourceKind::Firewall,
            id: 5,
        }];
        let outcome = executor
            .execute_resource(&ops, &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome.error,
            Some(HcloudError::Reconcile(ReconcileError::ImportMismatch { id: 5, .. }))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_detects_drift_and_gone() {
        let recorded = ResourceIntent::Firewall(FirewallIntent::new(
            "fw",
            BTreeMap::new(),
            vec![],
        ));
        let fw_address: ResourceAddress = "hcloud_firewall.web".parse().unwrap();
        let store = Arc::new(MemoryStateStore::with_entries([
            (
                fw_address.clone(),
                ResourceState::new(1, recorded.clone(), ConfigHasher::new().hash_intent(&recorded)),
            ),
            (address(), ResourceState::new(2, network_intent(), "hash")),
        ]));

        let mut api = MockCloudApi::new();
        api.expect_read()
            .with(eq(ResourceKind::Firewall), eq(1))
            .returning(|_, id| {
                Ok(RemoteObject::Firewall(Firewall {
                    id,
                    name: String::from("renamed"),
                    labels: BTreeMap::new(),
                    rules: vec![],
                    created: None,
                }))
            });
        api.expect_read()
            .with(eq(ResourceKind::Network), eq(2))
            .returning(|_, id| {
                Err(HcloudError::Api(ApiError::NotFound {
                    kind: String::from("network"),
                    id,
                }))
            });
        let executor = executor(api, Arc::clone(&store));

        let drifted = executor.refresh(&fw_address).await.unwrap().unwrap();
        assert_eq!(drifted.status, DriftStatus::Drifted);
        assert_eq!(drifted.changes[0].field, "name");
        assert_eq!(
            store.get(&fw_address).await.unwrap().unwrap().attributes.name(),
            "renamed"
        );

        let gone = executor.refresh(&address()).await.unwrap().unwrap();
        assert_eq!(gone.status, DriftStatus::Gone);
        assert!(store.get(&address()).await.unwrap().is_none());
    }
}
