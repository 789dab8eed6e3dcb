//! CloudFormation template rendering.
//!
//! An AccountSpec renders to one template: one `AWS::IAM::Role` per declared
//! role, plus `AppliedRoleFingerprints<N>` outputs. The outputs are how the
//! state reader later observes which declared content a stack carries, so
//! the planner can compare content without inspecting individual resources.

use rvm_core::bundle::{AccountSpec, RoleSpec};
use rvm_core::error::Result;
use rvm_core::plan::declared_fingerprints;
use serde_json::{json, Map, Value};

pub const FINGERPRINTS_OUTPUT_PREFIX: &str = "AppliedRoleFingerprints";

// CloudFormation caps an output value at 1024 characters. 15 64-char
// digests plus separators fit one value; accounts with more roles shard
// across numbered outputs.
const FINGERPRINTS_PER_OUTPUT: usize = 15;

/// Render the provisioning template for one account as a JSON template body.
pub fn render_template(spec: &AccountSpec) -> Result<String> {
    let mut resources = Map::new();
    for (i, role) in spec.roles.iter().enumerate() {
        resources.insert(logical_id(role, i), role_resource(role));
    }

    let fingerprints: Vec<String> = declared_fingerprints(spec)
        .iter()
        .map(|fp| fp.to_string())
        .collect();

    let mut outputs = Map::new();
    for (i, chunk) in fingerprints.chunks(FINGERPRINTS_PER_OUTPUT).enumerate() {
        outputs.insert(
            format!("{FINGERPRINTS_OUTPUT_PREFIX}{i}"),
            json!({
                "Description": "Content fingerprints of the declared roles",
                "Value": chunk.join(","),
            }),
        );
    }

    let template = json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": format!("IAM roles provisioned by rvm for account {}", spec.account_id),
        "Resources": Value::Object(resources),
        "Outputs": Value::Object(outputs),
    });
    Ok(serde_json::to_string_pretty(&template)?)
}

fn role_resource(role: &RoleSpec) -> Value {
    let policies: Vec<Value> = role
        .permission_policies
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            json!({
                "PolicyName": format!("{}-policy-{i}", role.name),
                "PolicyDocument": doc,
            })
        })
        .collect();

    let mut properties = Map::new();
    properties.insert("RoleName".into(), json!(role.name));
    properties.insert(
        "AssumeRolePolicyDocument".into(),
        role.trust_policy.clone(),
    );
    properties.insert("Policies".into(), Value::Array(policies));
    if !role.tags.is_empty() {
        let tags: Vec<Value> = role
            .tags
            .iter()
            .map(|(k, v)| json!({"Key": k, "Value": v}))
            .collect();
        properties.insert("Tags".into(), Value::Array(tags));
    }

    json!({
        "Type": "AWS::IAM::Role",
        "Properties": Value::Object(properties),
    })
}

/// CloudFormation logical ids must be alphanumeric; the index keeps ids
/// unique when sanitized names collide.
fn logical_id(role: &RoleSpec, index: usize) -> String {
    let sanitized: String = role
        .name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    format!("{sanitized}Role{index}")
}
