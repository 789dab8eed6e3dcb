//! CloudFormation state reader.
//!
//! Observes one account's provisioning stack: its status and the content
//! fingerprints it carries (via the `AppliedRoleFingerprints<N>` outputs
//! written by the executor's template). A missing stack is a normal state,
//! not an error.

use crate::client::cfn_client;
use crate::status::stack_status_from_str;
use crate::template::FINGERPRINTS_OUTPUT_PREFIX;
use async_trait::async_trait;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::Output;
use rvm_core::bundle::AccountId;
use rvm_core::config::RvmConfig;
use rvm_core::credentials::ScopedCredentials;
use rvm_core::error::{Result, RvmError};
use rvm_core::fingerprint::Fingerprint;
use rvm_core::orchestrator::StateReader;
use rvm_core::state::{ProvisionedState, StackStatus};
use std::collections::BTreeSet;

pub struct CfnStateReader {
    region: String,
    config: RvmConfig,
}

impl CfnStateReader {
    pub fn new(region: impl Into<String>, config: RvmConfig) -> Self {
        CfnStateReader {
            region: region.into(),
            config,
        }
    }
}

#[async_trait]
impl StateReader for CfnStateReader {
    async fn read(
        &self,
        account: &AccountId,
        creds: &ScopedCredentials,
    ) -> Result<ProvisionedState> {
        let stack_name = self.config.stack_name(account);
        let client = cfn_client(creds, &self.region);

        let output = match client.describe_stacks().stack_name(&stack_name).send().await {
            Ok(output) => output,
            Err(err) => {
                return match classify_describe_error(account, &stack_name, &err) {
                    DescribeFailure::StackMissing => {
                        Ok(ProvisionedState::absent(account.clone(), stack_name))
                    }
                    DescribeFailure::Error(e) => Err(e),
                }
            }
        };

        let Some(stack) = output.stacks().first() else {
            return Ok(ProvisionedState::absent(account.clone(), stack_name));
        };

        let status = stack
            .stack_status()
            .map(|s| stack_status_from_str(s.as_str()))
            .unwrap_or(StackStatus::Failed);

        let applied_roles = fingerprints_from_outputs(stack.outputs());

        tracing::debug!(%account, %stack_name, %status, roles = applied_roles.len(), "observed stack");

        Ok(ProvisionedState {
            account_id: account.clone(),
            stack_name,
            status,
            applied_roles,
        })
    }
}

enum DescribeFailure {
    StackMissing,
    Error(RvmError),
}

fn classify_describe_error<E, R>(
    account: &AccountId,
    stack_name: &str,
    err: &aws_sdk_cloudformation::error::SdkError<E, R>,
) -> DescribeFailure
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let code = err.code().unwrap_or_default();
    let message = err.message().unwrap_or_default();

    // DescribeStacks reports a nonexistent stack as a ValidationError.
    if code == "ValidationError" && message.contains("does not exist") {
        return DescribeFailure::StackMissing;
    }
    if code == "AccessDenied" || code == "AccessDeniedException" {
        return DescribeFailure::Error(RvmError::Unauthorized {
            account: account.to_string(),
            reason: format!("DescribeStacks {stack_name}: {message}"),
        });
    }
    DescribeFailure::Error(RvmError::Unavailable(format!(
        "DescribeStacks {stack_name}: {code} {message}"
    )))
}

/// Union of the fingerprints carried by the (possibly sharded) outputs.
pub(crate) fn fingerprints_from_outputs(outputs: &[Output]) -> BTreeSet<Fingerprint> {
    outputs
        .iter()
        .filter(|o| {
            o.output_key()
                .is_some_and(|k| k.starts_with(FINGERPRINTS_OUTPUT_PREFIX))
        })
        .filter_map(|o| o.output_value())
        .flat_map(parse_fingerprints)
        .collect()
}

pub(crate) fn parse_fingerprints(raw: &str) -> BTreeSet<Fingerprint> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Fingerprint::from_hex)
        .collect()
}
