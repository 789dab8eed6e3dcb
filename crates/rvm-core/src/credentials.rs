//! Scoped cross-account credentials.
//!
//! Time-boxed, account-restricted tokens obtained by assuming the fixed
//! workflow role in a target account. Held in memory only; never persisted.

use crate::bundle::AccountId;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Short-lived credentials valid for exactly one target account.
#[derive(Clone)]
pub struct ScopedCredentials {
    pub account_id: AccountId,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl ScopedCredentials {
    /// True when the session would expire within `margin`. Callers must
    /// re-acquire before starting work that could outlive the session.
    pub fn expires_within(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() + margin >= self.expires_at
    }
}

// Debug by hand so secrets never land in logs.
impl std::fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: DateTime<Utc>) -> ScopedCredentials {
        ScopedCredentials {
            account_id: AccountId::new("111111111111").unwrap(),
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI".into(),
            session_token: "FQoGZXIvYXdz".into(),
            expires_at,
        }
    }

    #[test]
    fn fresh_session_is_not_expiring() {
        let c = creds(Utc::now() + chrono::Duration::hours(1));
        assert!(!c.expires_within(Duration::from_secs(300)));
    }

    #[test]
    fn session_inside_margin_is_expiring() {
        let c = creds(Utc::now() + chrono::Duration::seconds(60));
        assert!(c.expires_within(Duration::from_secs(300)));
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = creds(Utc::now());
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("wJalrXUtnFEMI"));
        assert!(!dbg.contains("FQoGZXIvYXdz"));
        assert!(dbg.contains("<redacted>"));
    }
}
