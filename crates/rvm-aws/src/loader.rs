//! S3 bundle loader.
//!
//! Fetches the bundle archive named by a `BundleRef` and hands the bytes to
//! `rvm-core` for eager parsing and validation. No cross-account call
//! happens until the whole bundle has validated.

use aws_sdk_s3::error::ProvideErrorMetadata;
use rvm_core::bundle::{Bundle, BundleRef};
use rvm_core::error::{Result, RvmError};

pub struct S3BundleLoader {
    s3: aws_sdk_s3::Client,
}

impl S3BundleLoader {
    pub fn new(s3: aws_sdk_s3::Client) -> Self {
        S3BundleLoader { s3 }
    }

    pub async fn load(&self, reference: &BundleRef) -> Result<Bundle> {
        tracing::info!(bundle = %reference, "fetching bundle");

        let output = self
            .s3
            .get_object()
            .bucket(&reference.bucket)
            .key(&reference.key)
            .set_version_id(reference.version_id.clone())
            .send()
            .await
            .map_err(|err| {
                let code = err.code().unwrap_or_default();
                let message = err.message().unwrap_or_default();
                match code {
                    "NoSuchKey" | "NoSuchBucket" | "NoSuchVersion" | "NotFound" => {
                        RvmError::NotFound(reference.to_string())
                    }
                    _ => RvmError::Unavailable(format!("GetObject {reference}: {code} {message}")),
                }
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|err| RvmError::Unavailable(format!("reading {reference}: {err}")))?
            .into_bytes();

        let bundle = Bundle::from_zip_bytes(reference.clone(), &bytes)?;
        tracing::info!(
            bundle = %reference,
            accounts = bundle.accounts.len(),
            "bundle validated"
        );
        Ok(bundle)
    }
}
