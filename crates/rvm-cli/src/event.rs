//! Trigger event parsing.
//!
//! The upload pipeline delivers an S3 event notification naming the freshly
//! uploaded bundle. The core consumes only the object reference; everything
//! else in the event is ignored.

use anyhow::{bail, Context};
use rvm_core::bundle::BundleRef;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct S3Event {
    #[serde(rename = "Records", default)]
    records: Vec<S3Record>,
}

#[derive(Debug, Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    #[serde(rename = "versionId", default)]
    version_id: Option<String>,
}

/// Extract the bundle reference from an S3 event notification body.
pub fn bundle_ref_from_event(raw: &str) -> anyhow::Result<BundleRef> {
    let event: S3Event = serde_json::from_str(raw).context("event is not valid JSON")?;
    let Some(record) = event.records.first() else {
        bail!("event contains no records");
    };
    Ok(BundleRef {
        bucket: record.s3.bucket.name.clone(),
        key: decode_key(&record.s3.object.key)?,
        version_id: record.s3.object.version_id.clone(),
    })
}

/// S3 event keys arrive URL-encoded (space as `+`, reserved bytes as `%XX`).
fn decode_key(raw: &str) -> anyhow::Result<String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(b' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                let (Some(hi), Some(lo)) = (hi, lo) else {
                    bail!("truncated percent escape in object key '{raw}'");
                };
                let hex = [hi, lo];
                let hex = std::str::from_utf8(&hex)?;
                let byte = u8::from_str_radix(hex, 16)
                    .with_context(|| format!("bad percent escape in object key '{raw}'"))?;
                out.push(byte);
            }
            other => out.push(other),
        }
    }
    String::from_utf8(out).with_context(|| format!("object key '{raw}' is not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_standard_put_event() {
        let raw = r#"{
            "Records": [{
                "s3": {
                    "bucket": {"name": "rvm-config"},
                    "object": {"key": "bundles/rvm-configuration.zip", "versionId": "v7"}
                }
            }]
        }"#;
        let r = bundle_ref_from_event(raw).unwrap();
        assert_eq!(r.bucket, "rvm-config");
        assert_eq!(r.key, "bundles/rvm-configuration.zip");
        assert_eq!(r.version_id.as_deref(), Some("v7"));
    }

    #[test]
    fn decodes_url_encoded_keys() {
        assert_eq!(decode_key("a+b%2Fc.zip").unwrap(), "a b/c.zip");
    }

    #[test]
    fn rejects_empty_events() {
        assert!(bundle_ref_from_event(r#"{"Records": []}"#).is_err());
        assert!(bundle_ref_from_event("not json").is_err());
    }

    #[test]
    fn rejects_truncated_escapes() {
        assert!(decode_key("broken%2").is_err());
    }
}
