//! STS-backed credential broker.
//!
//! Assumes the fixed-named workflow role in a target account and caches the
//! resulting session in memory until it nears expiry. `AccessDenied` is a
//! normal outcome; not every listed account need grant trust to the
//! caller identity.

use async_trait::async_trait;
use aws_sdk_sts::error::ProvideErrorMetadata;
use rvm_core::bundle::AccountId;
use rvm_core::credentials::ScopedCredentials;
use rvm_core::error::{Result, RvmError};
use rvm_core::orchestrator::CredentialBroker;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

pub struct StsBroker {
    sts: aws_sdk_sts::Client,
    workflow_role_name: String,
    expiry_margin: Duration,
    cache: Mutex<HashMap<AccountId, ScopedCredentials>>,
}

impl StsBroker {
    pub fn new(
        sts: aws_sdk_sts::Client,
        workflow_role_name: impl Into<String>,
        expiry_margin: Duration,
    ) -> Self {
        StsBroker {
            sts,
            workflow_role_name: workflow_role_name.into(),
            expiry_margin,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, account: &AccountId) -> Option<ScopedCredentials> {
        let cache = self.cache.lock().expect("credential cache poisoned");
        cache
            .get(account)
            .filter(|c| !c.expires_within(self.expiry_margin))
            .cloned()
    }

    async fn assume(&self, account: &AccountId) -> Result<ScopedCredentials> {
        let role_arn = workflow_role_arn(account, &self.workflow_role_name);
        let output = self
            .sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(format!("rvm-deployment-{account}"))
            .send()
            .await
            .map_err(|err| {
                let code = err.code().unwrap_or_default();
                let reason = err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| err.to_string());
                if code == "AccessDenied" || code == "AccessDeniedException" {
                    RvmError::AccessDenied {
                        account: account.to_string(),
                        reason,
                    }
                } else {
                    RvmError::Unavailable(format!("AssumeRole {role_arn}: {code} {reason}"))
                }
            })?;

        let creds = output.credentials().ok_or_else(|| {
            RvmError::Unavailable(format!("AssumeRole {role_arn} returned no credentials"))
        })?;

        let expires_at = chrono::DateTime::from_timestamp(
            creds.expiration().secs(),
            creds.expiration().subsec_nanos(),
        )
        .unwrap_or_else(chrono::Utc::now);

        tracing::debug!(%account, role_arn = %role_arn, %expires_at, "assumed workflow role");

        Ok(ScopedCredentials {
            account_id: account.clone(),
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at,
        })
    }
}

#[async_trait]
impl CredentialBroker for StsBroker {
    async fn acquire(&self, account: &AccountId) -> Result<ScopedCredentials> {
        if let Some(cached) = self.cached(account) {
            return Ok(cached);
        }
        let fresh = self.assume(account).await?;
        self.cache
            .lock()
            .expect("credential cache poisoned")
            .insert(account.clone(), fresh.clone());
        Ok(fresh)
    }
}

pub(crate) fn workflow_role_arn(account: &AccountId, role_name: &str) -> String {
    format!("arn:aws:iam::{account}:role/{role_name}")
}
