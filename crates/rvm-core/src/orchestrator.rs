//! Run orchestration: fan per-account convergence out with bounded
//! concurrency and aggregate results into a `RunReport`.
//!
//! The engine is generic over three trait seams (credential broker, state
//! reader, stack executor) so the whole control flow is testable with
//! in-memory fakes. Per account, acquire, read, plan and execute run
//! strictly in sequence; across accounts there is no ordering and no
//! shared mutable state beyond the concurrency limiter.

use crate::bundle::{AccountId, AccountSpec, Bundle};
use crate::config::RvmConfig;
use crate::credentials::ScopedCredentials;
use crate::error::{Result, RvmError};
use crate::plan::{plan, NoOpReason, Operation, OperationKind};
use crate::report::{OperationResult, Outcome, RunReport};
use crate::retry::Backoff;
use crate::state::ProvisionedState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Trait seams
// ---------------------------------------------------------------------------

/// Obtains short-lived credentials for one target account.
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    async fn acquire(&self, account: &AccountId) -> Result<ScopedCredentials>;
}

/// Reads the current provisioned state for one account.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn read(
        &self,
        account: &AccountId,
        creds: &ScopedCredentials,
    ) -> Result<ProvisionedState>;
}

/// Applies one planned operation against one account.
///
/// Terminal stack failure and poll timeout surface as
/// `RvmError::StackOperationFailed` / `RvmError::TimedOut` so their detail
/// reaches the run report.
#[async_trait]
pub trait StackExecutor: Send + Sync {
    async fn execute(&self, op: &Operation, creds: &ScopedCredentials) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    broker: Arc<dyn CredentialBroker>,
    reader: Arc<dyn StateReader>,
    executor: Arc<dyn StackExecutor>,
    config: RvmConfig,
}

impl Engine {
    pub fn new(
        broker: Arc<dyn CredentialBroker>,
        reader: Arc<dyn StateReader>,
        executor: Arc<dyn StackExecutor>,
        config: RvmConfig,
    ) -> Self {
        Engine {
            broker,
            reader,
            executor,
            config,
        }
    }

    /// Apply one bundle: converge every declared account and report.
    ///
    /// One account's failure never aborts processing of other accounts.
    /// There is no within-run retry of account-level operations; re-running
    /// on a later trigger converges naturally because planning is
    /// state-based, not history-based.
    pub async fn run(&self, bundle: Bundle) -> RunReport {
        let mut report = RunReport::new(bundle.reference.clone());
        tracing::info!(
            run_id = %report.run_id,
            bundle = %report.bundle,
            accounts = bundle.accounts.len(),
            "starting run"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_accounts.max(1)));
        let deadline = self
            .config
            .run_deadline
            .map(|budget| tokio::time::Instant::now() + budget);

        let mut handles = Vec::with_capacity(bundle.accounts.len());
        for spec in bundle.accounts {
            let account = spec.account_id.clone();
            let worker = AccountWorker {
                broker: Arc::clone(&self.broker),
                reader: Arc::clone(&self.reader),
                executor: Arc::clone(&self.executor),
                config: self.config.clone(),
            };
            let sem = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return failure_result(
                            spec.account_id.clone(),
                            OperationKind::NoOp,
                            "concurrency limiter closed",
                        )
                    }
                };
                worker.converge(spec).await
            });
            handles.push((account, handle));
        }

        for (account, handle) in handles {
            let result = match deadline {
                Some(at) => match tokio::time::timeout_at(at, handle).await {
                    Ok(joined) => join_result(account, joined),
                    // Dropping the handle detaches the task: the remote
                    // operation continues and is observed as in-progress on
                    // the next run.
                    Err(_) => OperationResult {
                        account_id: account,
                        kind: OperationKind::NoOp,
                        outcome: Outcome::TimedOut,
                        detail: Some("run deadline reached before completion".into()),
                        duration: std::time::Duration::ZERO,
                    },
                },
                None => join_result(account, handle.await),
            };

            tracing::info!(
                run_id = %report.run_id,
                account = %result.account_id,
                kind = %result.kind,
                outcome = %result.outcome,
                detail = result.detail.as_deref().unwrap_or(""),
                duration_ms = result.duration.as_millis() as u64,
                "account result"
            );
            report.push(result);
        }

        report.finish();
        tracing::info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            timed_out = report.timed_out(),
            "run complete"
        );
        report
    }
}

fn join_result(
    account: AccountId,
    joined: std::result::Result<OperationResult, tokio::task::JoinError>,
) -> OperationResult {
    match joined {
        Ok(result) => result,
        Err(err) => failure_result(account, OperationKind::NoOp, &format!("worker panicked: {err}")),
    }
}

fn failure_result(account: AccountId, kind: OperationKind, detail: &str) -> OperationResult {
    OperationResult {
        account_id: account,
        kind,
        outcome: Outcome::Failed,
        detail: Some(detail.to_string()),
        duration: std::time::Duration::ZERO,
    }
}

// ---------------------------------------------------------------------------
// AccountWorker
// ---------------------------------------------------------------------------

/// Converges exactly one account. Owns nothing shared; every per-account
/// error is converted into an `OperationResult` here.
struct AccountWorker {
    broker: Arc<dyn CredentialBroker>,
    reader: Arc<dyn StateReader>,
    executor: Arc<dyn StackExecutor>,
    config: RvmConfig,
}

impl AccountWorker {
    async fn converge(&self, spec: AccountSpec) -> OperationResult {
        let started = Instant::now();
        let account = spec.account_id.clone();

        let creds = match self.acquire_with_retry(&account).await {
            Ok(creds) => creds,
            Err(err) => return self.error_result(account, OperationKind::NoOp, err, started),
        };

        let current = match self.read_with_retry(&account, &creds).await {
            Ok(state) => state,
            Err(err) => return self.error_result(account, OperationKind::NoOp, err, started),
        };

        let op = plan(&spec, &current);
        let kind = op.kind();

        if let Operation::NoOp { reason } = &op {
            let outcome = match reason {
                NoOpReason::StackBusy(_) | NoOpReason::StackFailed(_) => Outcome::Skipped,
                NoOpReason::Converged | NoOpReason::NothingDeclared => Outcome::Succeeded,
            };
            return OperationResult {
                account_id: account,
                kind,
                outcome,
                detail: Some(reason.to_string()),
                duration: started.elapsed(),
            };
        }

        // Re-acquire rather than start a stack operation that could outlive
        // the session.
        let creds = if creds.expires_within(self.config.credential_margin) {
            match self.acquire_with_retry(&account).await {
                Ok(creds) => creds,
                Err(err) => return self.error_result(account, kind, err, started),
            }
        } else {
            creds
        };

        match self.executor.execute(&op, &creds).await {
            Ok(outcome) => OperationResult {
                account_id: account,
                kind,
                outcome,
                detail: None,
                duration: started.elapsed(),
            },
            Err(err) => self.error_result(account, kind, err, started),
        }
    }

    async fn acquire_with_retry(&self, account: &AccountId) -> Result<ScopedCredentials> {
        let mut backoff = Backoff::new(self.config.poll_initial, self.config.poll_cap);
        loop {
            match self.broker.acquire(account).await {
                Err(err)
                    if err.is_retryable() && backoff.attempt() + 1 < self.config.transient_attempts =>
                {
                    let delay = backoff.next_delay();
                    tracing::debug!(%account, attempt = backoff.attempt(), ?delay, "credential acquisition retry");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn read_with_retry(
        &self,
        account: &AccountId,
        creds: &ScopedCredentials,
    ) -> Result<ProvisionedState> {
        let mut backoff = Backoff::new(self.config.poll_initial, self.config.poll_cap);
        loop {
            match self.reader.read(account, creds).await {
                Err(err)
                    if err.is_retryable() && backoff.attempt() + 1 < self.config.transient_attempts =>
                {
                    let delay = backoff.next_delay();
                    tracing::debug!(%account, attempt = backoff.attempt(), ?delay, "state read retry");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn error_result(
        &self,
        account: AccountId,
        kind: OperationKind,
        err: RvmError,
        started: Instant,
    ) -> OperationResult {
        let outcome = Outcome::from_error(&err);
        if matches!(err, RvmError::Unauthorized { .. }) {
            tracing::warn!(%account, error = %err, "unexpected authorization failure");
        }
        OperationResult {
            account_id: account,
            kind,
            outcome,
            detail: Some(err.to_string()),
            duration: started.elapsed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleRef, RoleSpec};
    use crate::plan::declared_fingerprints;
    use crate::state::StackStatus;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_config() -> RvmConfig {
        RvmConfig {
            poll_initial: Duration::from_millis(1),
            poll_cap: Duration::from_millis(5),
            ..RvmConfig::default()
        }
    }

    fn creds_for(account: &AccountId) -> ScopedCredentials {
        ScopedCredentials {
            account_id: account.clone(),
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: "k".into(),
            session_token: "t".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    fn role() -> RoleSpec {
        RoleSpec {
            name: "DeployRole".into(),
            trust_policy: json!({"Version": "2012-10-17"}),
            permission_policies: vec![json!({"Effect": "Allow"})],
            tags: BTreeMap::new(),
        }
    }

    fn spec(account: &str, roles: Vec<RoleSpec>) -> AccountSpec {
        AccountSpec {
            account_id: AccountId::new(account).unwrap(),
            roles,
        }
    }

    fn bundle(accounts: Vec<AccountSpec>) -> Bundle {
        Bundle {
            reference: BundleRef {
                bucket: "b".into(),
                key: "k.zip".into(),
                version_id: None,
            },
            accounts,
        }
    }

    // --- fakes ---

    #[derive(Default)]
    struct FakeBroker {
        denied: Vec<String>,
        /// account -> number of Unavailable failures before success
        flaky: Mutex<HashMap<String, u32>>,
    }

    #[async_trait]
    impl CredentialBroker for FakeBroker {
        async fn acquire(&self, account: &AccountId) -> Result<ScopedCredentials> {
            if self.denied.contains(&account.as_str().to_string()) {
                return Err(RvmError::AccessDenied {
                    account: account.to_string(),
                    reason: "no trust grant".into(),
                });
            }
            let mut flaky = self.flaky.lock().unwrap();
            if let Some(left) = flaky.get_mut(account.as_str()) {
                if *left > 0 {
                    *left -= 1;
                    return Err(RvmError::Unavailable("sts throttled".into()));
                }
            }
            Ok(creds_for(account))
        }
    }

    #[derive(Default)]
    struct FakeReader {
        states: HashMap<String, ProvisionedState>,
    }

    #[async_trait]
    impl StateReader for FakeReader {
        async fn read(
            &self,
            account: &AccountId,
            _creds: &ScopedCredentials,
        ) -> Result<ProvisionedState> {
            Ok(self
                .states
                .get(account.as_str())
                .cloned()
                .unwrap_or_else(|| ProvisionedState::absent(account.clone(), "rvm-test")))
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        /// account -> error to return instead of success
        failures: HashMap<String, &'static str>,
        delay: Option<Duration>,
        executed: Mutex<Vec<(String, OperationKind)>>,
    }

    #[async_trait]
    impl StackExecutor for FakeExecutor {
        async fn execute(&self, op: &Operation, creds: &ScopedCredentials) -> Result<Outcome> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.executed
                .lock()
                .unwrap()
                .push((creds.account_id.to_string(), op.kind()));
            match self.failures.get(creds.account_id.as_str()) {
                Some(reason) => Err(RvmError::StackOperationFailed((*reason).to_string())),
                None => Ok(Outcome::Succeeded),
            }
        }
    }

    fn engine(
        broker: FakeBroker,
        reader: FakeReader,
        executor: FakeExecutor,
        config: RvmConfig,
    ) -> (Engine, Arc<FakeExecutor>) {
        let executor = Arc::new(executor);
        let engine = Engine::new(
            Arc::new(broker),
            Arc::new(reader),
            Arc::clone(&executor) as Arc<dyn StackExecutor>,
            config,
        );
        (engine, executor)
    }

    // --- tests ---

    #[tokio::test]
    async fn new_account_is_created() {
        let (engine, executor) = engine(
            FakeBroker::default(),
            FakeReader::default(),
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine.run(bundle(vec![spec("111111111111", vec![role()])])).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].outcome, Outcome::Succeeded);
        assert_eq!(report.results[0].kind, OperationKind::Create);
        assert_eq!(
            executor.executed.lock().unwrap().as_slice(),
            &[("111111111111".to_string(), OperationKind::Create)]
        );
    }

    #[tokio::test]
    async fn untrusted_account_is_skipped_and_isolated() {
        let broker = FakeBroker {
            denied: vec!["222222222222".into()],
            ..FakeBroker::default()
        };
        let (engine, executor) = engine(
            broker,
            FakeReader::default(),
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine
            .run(bundle(vec![
                spec("111111111111", vec![role()]),
                spec("222222222222", vec![role()]),
            ]))
            .await;

        let by_account: HashMap<&str, &OperationResult> = report
            .results
            .iter()
            .map(|r| (r.account_id.as_str(), r))
            .collect();

        assert_eq!(by_account["111111111111"].outcome, Outcome::Succeeded);
        let skipped = by_account["222222222222"];
        assert_eq!(skipped.outcome, Outcome::Skipped);
        assert!(skipped.detail.as_deref().unwrap().contains("access denied"));
        // The denied account never reached the executor.
        assert_eq!(executor.executed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn converged_account_is_not_touched() {
        let account_spec = spec("111111111111", vec![role()]);
        let mut state = ProvisionedState::absent(
            account_spec.account_id.clone(),
            "rvm-provisioned-111111111111",
        );
        state.status = StackStatus::CreateComplete;
        state.applied_roles = declared_fingerprints(&account_spec);

        let reader = FakeReader {
            states: HashMap::from([("111111111111".to_string(), state)]),
        };
        let (engine, executor) = engine(
            FakeBroker::default(),
            reader,
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine.run(bundle(vec![account_spec])).await;

        assert_eq!(report.results[0].outcome, Outcome::Succeeded);
        assert_eq!(report.results[0].kind, OperationKind::NoOp);
        assert!(report.results[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("converged"));
        assert!(executor.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn busy_stack_is_skipped_without_mutation() {
        let account_spec = spec("111111111111", vec![role()]);
        let mut state = ProvisionedState::absent(
            account_spec.account_id.clone(),
            "rvm-provisioned-111111111111",
        );
        state.status = StackStatus::UpdateInProgress;

        let reader = FakeReader {
            states: HashMap::from([("111111111111".to_string(), state)]),
        };
        let (engine, executor) = engine(
            FakeBroker::default(),
            reader,
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine.run(bundle(vec![account_spec])).await;

        assert_eq!(report.results[0].outcome, Outcome::Skipped);
        assert!(executor.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_acquire_failure_recovers_within_budget() {
        let broker = FakeBroker {
            flaky: Mutex::new(HashMap::from([("111111111111".to_string(), 2)])),
            ..FakeBroker::default()
        };
        let (engine, _) = engine(
            broker,
            FakeReader::default(),
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine.run(bundle(vec![spec("111111111111", vec![role()])])).await;
        assert_eq!(report.results[0].outcome, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn transient_failure_beyond_budget_fails_account() {
        let broker = FakeBroker {
            flaky: Mutex::new(HashMap::from([("111111111111".to_string(), 10)])),
            ..FakeBroker::default()
        };
        let (engine, _) = engine(
            broker,
            FakeReader::default(),
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine.run(bundle(vec![spec("111111111111", vec![role()])])).await;
        assert_eq!(report.results[0].outcome, Outcome::Failed);
        assert!(report.results[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("transient"));
    }

    #[tokio::test]
    async fn executor_failure_is_reported_not_propagated() {
        let executor = FakeExecutor {
            failures: HashMap::from([("111111111111".to_string(), "rollback: role already exists")]),
            ..FakeExecutor::default()
        };
        let (engine, _) = engine(
            FakeBroker::default(),
            FakeReader::default(),
            executor,
            test_config(),
        );
        let report = engine
            .run(bundle(vec![
                spec("111111111111", vec![role()]),
                spec("333333333333", vec![role()]),
            ]))
            .await;

        let by_account: HashMap<&str, &OperationResult> = report
            .results
            .iter()
            .map(|r| (r.account_id.as_str(), r))
            .collect();
        assert_eq!(by_account["111111111111"].outcome, Outcome::Failed);
        assert!(by_account["111111111111"]
            .detail
            .as_deref()
            .unwrap()
            .contains("rollback"));
        assert_eq!(by_account["333333333333"].outcome, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn run_deadline_reports_unfinished_accounts_timed_out() {
        let executor = FakeExecutor {
            delay: Some(Duration::from_millis(500)),
            ..FakeExecutor::default()
        };
        let config = RvmConfig {
            run_deadline: Some(Duration::from_millis(20)),
            ..test_config()
        };
        let (engine, _) = engine(FakeBroker::default(), FakeReader::default(), executor, config);
        let report = engine.run(bundle(vec![spec("111111111111", vec![role()])])).await;

        assert_eq!(report.results[0].outcome, Outcome::TimedOut);
        assert!(report.results[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("deadline"));
    }

    #[tokio::test]
    async fn empty_spec_with_existing_stack_is_deleted() {
        let account_spec = spec("111111111111", vec![]);
        let mut state = ProvisionedState::absent(
            account_spec.account_id.clone(),
            "rvm-provisioned-111111111111",
        );
        state.status = StackStatus::CreateComplete;
        state.applied_roles.insert(role().fingerprint());

        let reader = FakeReader {
            states: HashMap::from([("111111111111".to_string(), state)]),
        };
        let (engine, executor) = engine(
            FakeBroker::default(),
            reader,
            FakeExecutor::default(),
            test_config(),
        );
        let report = engine.run(bundle(vec![account_spec])).await;

        assert_eq!(report.results[0].kind, OperationKind::Delete);
        assert_eq!(report.results[0].outcome, Outcome::Succeeded);
        assert_eq!(
            executor.executed.lock().unwrap().as_slice(),
            &[("111111111111".to_string(), OperationKind::Delete)]
        );
    }
}
