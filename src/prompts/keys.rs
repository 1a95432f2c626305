//! Composed-prompt cache keys.
//!
//! Keys embed the tenant and agent scope in a glob-friendly prefix
//! (`tenant:<id>:agent:<id>:<digest>`) so tenant purges can invalidate by
//! pattern, and a sha-256 digest over the participating prompt versions
//! plus the canonicalized variables so any version bump or variable change
//! produces a new key.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Build the cache key for a composition.
pub fn generate_cache_key(
    tenant_id: Option<&str>,
    agent_id: &str,
    version_ids: &BTreeMap<String, String>,
    variables: &Map<String, Value>,
) -> String {
    let mut hasher = Sha256::new();
    for (layer, version) in version_ids {
        hasher.update(layer.as_bytes());
        hasher.update(b"=");
        hasher.update(version.as_bytes());
        hasher.update(b";");
    }
    hasher.update(canonicalize(variables).as_bytes());

    let digest = hex_string(&hasher.finalize());
    format!(
        "tenant:{}:agent:{}:{}",
        tenant_id.unwrap_or("default"),
        agent_id,
        &digest[..32]
    )
}

/// Deterministic rendering of a variable map: keys sorted recursively.
fn canonicalize(variables: &Map<String, Value>) -> String {
    fn sort_value(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sort_value(v))).collect();
                Value::Object(
                    sorted
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
            other => other.clone(),
        }
    }
    sort_value(&Value::Object(variables.clone())).to_string()
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
