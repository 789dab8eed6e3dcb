//! CloudFormation account executor.
//!
//! Applies one planned operation against one account: submits the stack
//! lifecycle call, then polls status with exponential backoff until the
//! stack reaches a terminal state or the operation budget elapses. A timeout
//! never cancels the remote operation; the next run observes it as
//! in-progress and keeps hands off.

use crate::client::cfn_client;
use crate::status::stack_status_from_str;
use crate::template::render_template;
use async_trait::async_trait;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::Capability;
use aws_sdk_cloudformation::Client;
use rvm_core::bundle::AccountSpec;
use rvm_core::config::RvmConfig;
use rvm_core::credentials::ScopedCredentials;
use rvm_core::error::{Result, RvmError};
use rvm_core::orchestrator::StackExecutor;
use rvm_core::plan::{Operation, OperationKind};
use rvm_core::report::Outcome;
use rvm_core::retry::Backoff;
use rvm_core::state::StackStatus;
use std::time::Instant;

pub struct CfnExecutor {
    region: String,
    config: RvmConfig,
}

impl CfnExecutor {
    pub fn new(region: impl Into<String>, config: RvmConfig) -> Self {
        CfnExecutor {
            region: region.into(),
            config,
        }
    }

    async fn create(
        &self,
        client: &Client,
        spec: &AccountSpec,
    ) -> Result<Outcome> {
        let stack_name = self.config.stack_name(&spec.account_id);
        let body = render_template(spec)?;
        client
            .create_stack()
            .stack_name(&stack_name)
            .template_body(body)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|err| submit_error("CreateStack", spec.account_id.as_str(), &stack_name, &err))?;
        tracing::info!(account = %spec.account_id, stack = %stack_name, "create submitted");
        self.await_terminal(client, &stack_name, OperationKind::Create)
            .await
    }

    async fn update(
        &self,
        client: &Client,
        spec: &AccountSpec,
        stack_name: &str,
    ) -> Result<Outcome> {
        let body = render_template(spec)?;
        let submit = client
            .update_stack()
            .stack_name(stack_name)
            .template_body(body)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await;

        if let Err(err) = submit {
            // Identical content renders an identical template; CloudFormation
            // rejects the no-change update and the account is converged.
            if err.message().unwrap_or_default().contains("No updates are to be performed") {
                tracing::info!(stack = %stack_name, "no updates to perform");
                return Ok(Outcome::Succeeded);
            }
            return Err(submit_error("UpdateStack", spec.account_id.as_str(), stack_name, &err));
        }
        tracing::info!(stack = %stack_name, "update submitted");
        self.await_terminal(client, stack_name, OperationKind::Update)
            .await
    }

    async fn delete(&self, client: &Client, stack_name: &str, account: &str) -> Result<Outcome> {
        if let Err(err) = client.delete_stack().stack_name(stack_name).send().await {
            // Race with external deletion: the desired end state already
            // holds, so this is a success.
            if err.message().unwrap_or_default().contains("does not exist") {
                return Ok(Outcome::Succeeded);
            }
            return Err(submit_error("DeleteStack", account, stack_name, &err));
        }
        tracing::info!(stack = %stack_name, "delete submitted");
        self.await_terminal(client, stack_name, OperationKind::Delete)
            .await
    }

    /// Poll until the stack leaves its in-progress state or the per-operation
    /// budget elapses. Transient describe failures are tolerated; the budget
    /// bounds them along with everything else. The deadline is evaluated
    /// after each describe, so an operation that completes during the final
    /// backoff interval is still observed as terminal rather than timed out.
    async fn await_terminal(
        &self,
        client: &Client,
        stack_name: &str,
        kind: OperationKind,
    ) -> Result<Outcome> {
        let mut backoff = Backoff::new(self.config.poll_initial, self.config.poll_cap);
        let deadline = Instant::now() + self.config.stack_timeout;

        loop {
            tokio::time::sleep(backoff.next_delay()).await;
            let expired = Instant::now() >= deadline;

            let status = match describe_status(client, stack_name).await {
                Ok(status) => status,
                Err(err) if err.is_retryable() && !expired => {
                    tracing::debug!(stack = %stack_name, error = %err, "status poll failed, retrying");
                    continue;
                }
                Err(err) if err.is_retryable() => {
                    return Err(RvmError::TimedOut(format!(
                        "{stack_name} did not reach a terminal state within {:?}",
                        self.config.stack_timeout
                    )))
                }
                Err(err) => return Err(err),
            };

            match classify_poll(status, kind, expired) {
                PollStep::Pending => {}
                PollStep::Complete => return Ok(Outcome::Succeeded),
                PollStep::TimedOut => {
                    return Err(RvmError::TimedOut(format!(
                        "{stack_name} did not reach a terminal state within {:?}",
                        self.config.stack_timeout
                    )))
                }
                PollStep::Disappeared => {
                    return Err(RvmError::StackOperationFailed(format!(
                        "{stack_name} disappeared during {kind}"
                    )))
                }
                PollStep::RacedByCreate(status) => {
                    return Err(RvmError::StackOperationFailed(format!(
                        "{stack_name} reached {status} while deleting"
                    )))
                }
                PollStep::Failed(status) => {
                    let reason = failure_reason(client, stack_name).await;
                    return Err(RvmError::StackOperationFailed(format!(
                        "{stack_name} reached {status}: {reason}"
                    )));
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum PollStep {
    Pending,
    Complete,
    TimedOut,
    Disappeared,
    RacedByCreate(StackStatus),
    Failed(StackStatus),
}

/// Interpret one observed status. Terminal states resolve regardless of the
/// deadline; only a still-in-progress stack times out.
fn classify_poll(status: Option<StackStatus>, kind: OperationKind, expired: bool) -> PollStep {
    match status {
        None if kind == OperationKind::Delete => PollStep::Complete,
        None => PollStep::Disappeared,
        Some(s) if s.is_in_progress() && !expired => PollStep::Pending,
        Some(s) if s.is_in_progress() => PollStep::TimedOut,
        // A delete that lands in a stable status was raced by an out-of-band
        // create/update; report it, do not fight it.
        Some(s) if s.is_stable() && kind == OperationKind::Delete => PollStep::RacedByCreate(s),
        Some(s) if s.is_stable() => PollStep::Complete,
        Some(s) => PollStep::Failed(s),
    }
}

#[async_trait]
impl StackExecutor for CfnExecutor {
    async fn execute(&self, op: &Operation, creds: &ScopedCredentials) -> Result<Outcome> {
        let client = cfn_client(creds, &self.region);
        match op {
            Operation::Create(spec) => self.create(&client, spec).await,
            Operation::Update(spec, current) => {
                self.update(&client, spec, &current.stack_name).await
            }
            Operation::Delete(current) => {
                self.delete(&client, &current.stack_name, current.account_id.as_str())
                    .await
            }
            // The orchestrator never dispatches NoOp; honor it anyway.
            Operation::NoOp { .. } => Ok(Outcome::Succeeded),
        }
    }
}

/// Current status of a stack, `None` when the stack does not exist.
async fn describe_status(client: &Client, stack_name: &str) -> Result<Option<StackStatus>> {
    match client.describe_stacks().stack_name(stack_name).send().await {
        Ok(output) => {
            let status = output
                .stacks()
                .first()
                .and_then(|s| s.stack_status())
                .map(|s| stack_status_from_str(s.as_str()));
            // DELETE_COMPLETE stacks still appear when described; treat them
            // as gone.
            Ok(match status {
                Some(s) if s == StackStatus::None => None,
                other => other,
            })
        }
        Err(err) => {
            let code = err.code().unwrap_or_default();
            let message = err.message().unwrap_or_default();
            if code == "ValidationError" && message.contains("does not exist") {
                Ok(None)
            } else {
                Err(RvmError::Unavailable(format!(
                    "DescribeStacks {stack_name}: {code} {message}"
                )))
            }
        }
    }
}

/// First root-cause failure reason from the stack's event history. Events
/// come back newest-first, so the earliest failed event is the last match.
async fn failure_reason(client: &Client, stack_name: &str) -> String {
    match client
        .describe_stack_events()
        .stack_name(stack_name)
        .send()
        .await
    {
        Ok(output) => output
            .stack_events()
            .iter()
            .rev()
            .find_map(|event| {
                let failed = event
                    .resource_status()
                    .map(|s| s.as_str().ends_with("_FAILED"))
                    .unwrap_or(false);
                if failed {
                    Some(format!(
                        "{}: {}",
                        event.logical_resource_id().unwrap_or("<unknown resource>"),
                        event.resource_status_reason().unwrap_or("<no reason>")
                    ))
                } else {
                    None
                }
            })
            .unwrap_or_else(|| "no failed event recorded".to_string()),
        Err(err) => format!("failure reason unavailable: {err}"),
    }
}

fn submit_error<E, R>(
    operation: &str,
    account: &str,
    stack_name: &str,
    err: &aws_sdk_cloudformation::error::SdkError<E, R>,
) -> RvmError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let code = err.code().unwrap_or_default();
    let message = err.message().unwrap_or_default();
    if code == "AccessDenied" || code == "AccessDeniedException" {
        RvmError::Unauthorized {
            account: account.to_string(),
            reason: format!("{operation} {stack_name}: {message}"),
        }
    } else if code == "Throttling" || code == "ThrottlingException" {
        RvmError::Unavailable(format!("{operation} {stack_name}: {message}"))
    } else {
        RvmError::StackOperationFailed(format!("{operation} {stack_name}: {code} {message}"))
    }
}
