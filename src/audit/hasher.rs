//! BLAKE3 fingerprints for actions, graphs and submissions.

use crate::core::graph::ActionGraph;
use crate::core::types::Action;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Fingerprint of what an action does. Declaration position is excluded so
/// reordering a declaration does not count as a change.
pub fn action_fingerprint(action: &Action) -> String {
    let canonical = serde_json::json!({
        "kind": action.kind,
        "args": action.args,
        "after": action.after,
    });
    hash_string(&canonical.to_string())
}

/// Fingerprint of a whole graph, in declaration order.
pub fn graph_fingerprint(graph: &ActionGraph) -> String {
    let prints: Vec<String> = graph
        .actions()
        .map(|a| composite_hash(&[a.id.as_str(), action_fingerprint(a).as_str()]))
        .collect();
    let refs: Vec<&str> = prints.iter().map(String::as_str).collect();
    composite_hash(&refs)
}

/// Deterministic identity of a submission, used to ask the target whether
/// an earlier attempt landed.
pub fn submission_tag(run_id: &str, action_id: &str) -> String {
    composite_hash(&[run_id, action_id])
}
