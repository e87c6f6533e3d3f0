/// Definition normalizer and content hashing
///
/// Canonicalizes a workflow definition for comparison by stripping volatile
/// and environment-specific fields, then produces a deterministic SHA-256
/// content hash of the canonical serialization. Determinism is the core
/// guarantee: the same logical definition hashes identically regardless of
/// which system it was fetched from or when.

use petgraph::graph::DiGraph;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Top-level fields that are runtime bookkeeping, never part of the logical
/// definition.
const VOLATILE_TOP_LEVEL: &[&str] = &[
    "id",
    "versionId",
    "createdAt",
    "updatedAt",
    "active",
    "staticData",
    "pinData",
    "meta",
    "triggerCount",
    "shared",
    "tags",
];

/// Per-node fields that vary across environments or carry UI layout.
const VOLATILE_NODE_FIELDS: &[&str] = &["id", "webhookId", "position", "createdAt", "updatedAt"];

/// A credential reference extracted during normalization.
///
/// Only the logical name survives canonicalization; the environment-bound
/// credential id is stripped because names are the cross-environment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRef {
    /// Credential type slug as the runtime reports it (e.g. "postgres")
    pub kind: String,
    /// Logical credential name, comparable across environments
    pub name: String,
    /// Name of the node referencing this credential
    pub node: String,
}

/// Result of normalizing one definition.
#[derive(Debug, Clone)]
pub struct NormalizedDefinition {
    /// Definition name (the only identity field that survives)
    pub name: String,
    /// Canonical tree: volatile fields stripped, nodes sorted by name
    pub tree: Value,
    /// Lowercase hex SHA-256 of the canonical serialization
    pub content_hash: String,
    /// Credential references found in the definition
    pub credentials: Vec<CredentialRef>,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("definition is not a JSON object")]
    NotAnObject,
    #[error("definition has no 'name' field")]
    MissingName,
    #[error("node at index {0} is not a JSON object")]
    MalformedNode(usize),
    #[error("connection references unknown node '{0}'")]
    UnknownNode(String),
}

/// Canonicalize a raw runtime or repository definition and hash it.
///
/// - Volatile top-level and per-node fields are removed.
/// - Credential references keep only the logical name.
/// - The `nodes` array is sorted by node name (an unordered collection).
/// - The `connections` object is NOT resorted: connection order is genuinely
///   ordered data and stays order-sensitive. Map keys still serialize sorted
///   because the canonical serialization uses sorted-key maps.
pub fn normalize(raw: &Value) -> Result<NormalizedDefinition, NormalizeError> {
    let obj = raw.as_object().ok_or(NormalizeError::NotAnObject)?;
    let name = obj
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or(NormalizeError::MissingName)?
        .to_string();

    let mut credentials = Vec::new();

    // Canonical nodes: strip volatile fields, reduce credentials to names,
    // then sort by node name so hash equality is order-independent here.
    let mut nodes: Vec<Value> = Vec::new();
    if let Some(raw_nodes) = obj.get("nodes").and_then(|n| n.as_array()) {
        for (idx, raw_node) in raw_nodes.iter().enumerate() {
            let node_obj = raw_node
                .as_object()
                .ok_or(NormalizeError::MalformedNode(idx))?;
            nodes.push(canonicalize_node(node_obj, &mut credentials));
        }
    }
    nodes.sort_by(|a, b| node_name(a).cmp(node_name(b)));

    // Connections pass through untouched (order-sensitive graph data).
    let connections = obj.get("connections").cloned().unwrap_or_else(|| json!({}));
    validate_connection_graph(&nodes, &connections)?;

    let settings = obj.get("settings").cloned().unwrap_or_else(|| json!({}));

    let tree = json!({
        "name": name,
        "nodes": nodes,
        "connections": connections,
        "settings": settings,
    });

    // serde_json maps are BTreeMaps, so serialization already emits keys in
    // sorted order; to_string over the canonical tree is the canonical form.
    let canonical = serde_json::to_string(&tree).expect("canonical tree is valid JSON");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    Ok(NormalizedDefinition {
        name,
        tree,
        content_hash,
        credentials,
    })
}

/// Strip one node down to its comparable fields.
fn canonicalize_node(node: &Map<String, Value>, credentials: &mut Vec<CredentialRef>) -> Value {
    let node_name = node
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();

    let mut out = Map::new();
    for (key, value) in node {
        if VOLATILE_NODE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if key == "credentials" {
            out.insert(key.clone(), canonicalize_credentials(value, &node_name, credentials));
            continue;
        }
        out.insert(key.clone(), value.clone());
    }
    Value::Object(out)
}

/// Reduce `{ "<type>": { "id": ..., "name": ... } }` credential blocks to
/// name-only references, collecting them for the promotion rewrite step.
fn canonicalize_credentials(
    value: &Value,
    node_name: &str,
    credentials: &mut Vec<CredentialRef>,
) -> Value {
    let Some(by_type) = value.as_object() else {
        return value.clone();
    };
    let mut out = Map::new();
    for (kind, reference) in by_type {
        // Either `{ "id": "...", "name": "..." }` or a bare name string.
        let cred_name = match reference {
            Value::Object(fields) => fields
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string(),
            Value::String(name) => name.clone(),
            _ => String::new(),
        };
        credentials.push(CredentialRef {
            kind: kind.clone(),
            name: cred_name.clone(),
            node: node_name.to_string(),
        });
        out.insert(kind.clone(), json!({ "name": cred_name }));
    }
    Value::Object(out)
}

fn node_name(node: &Value) -> &str {
    node.get("name").and_then(|n| n.as_str()).unwrap_or_default()
}

/// Validate that every connection endpoint references a known node.
///
/// Builds the connection graph so malformed definitions are rejected before
/// they reach hashing or a promotion write.
fn validate_connection_graph(nodes: &[Value], connections: &Value) -> Result<(), NormalizeError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index_by_name = HashMap::new();
    for node in nodes {
        let name = node_name(node);
        index_by_name.insert(name.to_string(), graph.add_node(name));
    }

    let Some(by_source) = connections.as_object() else {
        return Ok(());
    };
    for (source, outputs) in by_source {
        let from = *index_by_name
            .get(source)
            .ok_or_else(|| NormalizeError::UnknownNode(source.clone()))?;
        for target in connection_targets(outputs) {
            let to = *index_by_name
                .get(&target)
                .ok_or_else(|| NormalizeError::UnknownNode(target.clone()))?;
            graph.add_edge(from, to, ());
        }
    }
    Ok(())
}

/// Collect every `"node": <name>` endpoint below one source's output block.
fn connection_targets(outputs: &Value) -> Vec<String> {
    let mut targets = Vec::new();
    match outputs {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("node") {
                targets.push(name.clone());
            }
            for value in map.values() {
                targets.extend(connection_targets(value));
            }
        }
        Value::Array(items) => {
            for item in items {
                targets.extend(connection_targets(item));
            }
        }
        _ => {}
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> Value {
        json!({
            "id": "rt-123",
            "versionId": "v-9",
            "name": "invoice-export",
            "createdAt": "2026-01-01T00:00:00Z",
            "updatedAt": "2026-02-01T00:00:00Z",
            "active": true,
            "nodes": [
                {
                    "id": "n2",
                    "name": "Write DB",
                    "type": "postgres",
                    "position": [420, 80],
                    "parameters": { "table": "invoices" },
                    "credentials": { "postgres": { "id": "cred-77", "name": "billing-db" } }
                },
                {
                    "id": "n1",
                    "name": "Fetch API",
                    "type": "httpRequest",
                    "position": [120, 80],
                    "webhookId": "hook-1",
                    "parameters": { "url": "https://api.example.com/invoices" }
                }
            ],
            "connections": {
                "Fetch API": { "main": [[ { "node": "Write DB", "type": "main", "index": 0 } ]] }
            },
            "settings": { "executionOrder": "v1" }
        })
    }

    #[test]
    fn hashing_is_deterministic() {
        let a = normalize(&sample_definition()).unwrap();
        let b = normalize(&sample_definition()).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn volatile_fields_do_not_affect_the_hash() {
        let base = normalize(&sample_definition()).unwrap();

        let mut moved = sample_definition();
        moved["id"] = json!("rt-999");
        moved["versionId"] = json!("v-10");
        moved["updatedAt"] = json!("2026-03-01T12:00:00Z");
        moved["nodes"][0]["position"] = json!([900, 900]);
        moved["nodes"][0]["id"] = json!("other-node-id");
        moved["nodes"][0]["credentials"]["postgres"]["id"] = json!("cred-prod-1");

        let other = normalize(&moved).unwrap();
        assert_eq!(base.content_hash, other.content_hash);
    }

    #[test]
    fn node_order_does_not_affect_the_hash() {
        let base = normalize(&sample_definition()).unwrap();

        let mut reordered = sample_definition();
        let nodes = reordered["nodes"].as_array_mut().unwrap();
        nodes.reverse();

        let other = normalize(&reordered).unwrap();
        assert_eq!(base.content_hash, other.content_hash);
    }

    #[test]
    fn connection_order_is_hash_sensitive() {
        let mut def = sample_definition();
        def["nodes"].as_array_mut().unwrap().push(json!({
            "id": "n3", "name": "Notify", "type": "noop", "parameters": {}
        }));
        def["connections"]["Fetch API"]["main"] = json!([[
            { "node": "Write DB", "type": "main", "index": 0 },
            { "node": "Notify", "type": "main", "index": 0 }
        ]]);
        let forward = normalize(&def).unwrap();

        def["connections"]["Fetch API"]["main"] = json!([[
            { "node": "Notify", "type": "main", "index": 0 },
            { "node": "Write DB", "type": "main", "index": 0 }
        ]]);
        let reversed = normalize(&def).unwrap();

        assert_ne!(forward.content_hash, reversed.content_hash);
    }

    #[test]
    fn credential_ids_are_stripped_but_names_extracted() {
        let normalized = normalize(&sample_definition()).unwrap();
        assert_eq!(normalized.credentials.len(), 1);
        assert_eq!(normalized.credentials[0].name, "billing-db");
        assert_eq!(normalized.credentials[0].kind, "postgres");

        let canonical = serde_json::to_string(&normalized.tree).unwrap();
        assert!(!canonical.contains("cred-77"));
        assert!(canonical.contains("billing-db"));
    }

    #[test]
    fn unknown_connection_target_is_rejected() {
        let mut def = sample_definition();
        def["connections"]["Fetch API"]["main"] = json!([[ { "node": "Ghost", "type": "main", "index": 0 } ]]);
        let err = normalize(&def).unwrap_err();
        assert!(matches!(err, NormalizeError::UnknownNode(name) if name == "Ghost"));
    }

    #[test]
    fn definitions_without_name_are_rejected() {
        let err = normalize(&json!({ "nodes": [] })).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingName));
    }
}
