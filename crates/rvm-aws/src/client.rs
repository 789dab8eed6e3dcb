//! Per-account CloudFormation client construction.

use aws_sdk_cloudformation::config::{BehaviorVersion, Region};
use rvm_core::credentials::ScopedCredentials;

/// Build a CloudFormation client scoped to one target account via the
/// brokered session credentials.
pub fn cfn_client(creds: &ScopedCredentials, region: &str) -> aws_sdk_cloudformation::Client {
    let provider = aws_credential_types::Credentials::new(
        creds.access_key_id.clone(),
        creds.secret_access_key.clone(),
        Some(creds.session_token.clone()),
        None,
        "rvm-scoped-session",
    );
    let conf = aws_sdk_cloudformation::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(provider)
        .build();
    aws_sdk_cloudformation::Client::from_conf(conf)
}
