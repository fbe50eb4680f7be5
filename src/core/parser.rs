//! Declaration parsing and validation.
//!
//! Parses deploy.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Action ids are well-formed identifiers and appear once
//! - Each action is exactly one of `contract` or `call` + `on`
//! - `ref`, `on` and `after` references must exist
//! - `results` must name declared actions

use super::types::*;
use crate::error::{Error, Result};
use regex::Regex;
use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static ACTION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("action id pattern is valid")
});

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a declaration file from disk.
pub fn parse_declaration_file(path: &Path) -> Result<Declaration> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("failed to read {}: {}", path.display(), e)))?;
    parse_declaration(&content)
}

/// Parse a declaration from a string.
///
/// A repeated key under `actions` is rejected as a malformed graph rather
/// than letting the later entry replace the earlier one.
pub fn parse_declaration(yaml: &str) -> Result<Declaration> {
    let decl: Declaration = serde_yaml_ng::from_str(yaml).map_err(yaml_error)?;
    let keys: ActionKeys = serde_yaml_ng::from_str(yaml).map_err(yaml_error)?;
    let mut seen = HashSet::new();
    for id in keys.actions.0 {
        if !seen.insert(id.clone()) {
            return Err(Error::MalformedGraph {
                action: id,
                reason: "duplicate action id".to_string(),
            });
        }
    }
    Ok(decl)
}

fn yaml_error(e: serde_yaml_ng::Error) -> Error {
    Error::Parse(format!("YAML parse error: {}", e))
}

/// The `actions` keys in document order, repeats kept.
#[derive(Deserialize)]
struct ActionKeys {
    actions: KeyList,
}

struct KeyList(Vec<String>);

impl<'de> Deserialize<'de> for KeyList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> Visitor<'de> for KeyVisitor {
            type Value = KeyList;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of action ids")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<KeyList, A::Error> {
                let mut keys = Vec::new();
                while let Some((key, IgnoredAny)) = map.next_entry::<String, IgnoredAny>()? {
                    keys.push(key);
                }
                Ok(KeyList(keys))
            }
        }

        deserializer.deserialize_map(KeyVisitor)
    }
}

/// Whether `id` is an acceptable action identity.
pub fn is_valid_action_id(id: &str) -> bool {
    ACTION_ID.is_match(id)
}

/// Validate a parsed declaration. Returns a list of errors (empty = valid).
pub fn validate_declaration(decl: &Declaration) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if decl.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", decl.version));
    }

    if decl.name.is_empty() {
        push("name must not be empty".to_string());
    }

    for (id, action) in &decl.actions {
        if !is_valid_action_id(id) {
            push(format!("action id '{}' is not a valid identifier", id));
        }

        match (&action.contract, &action.call, &action.on) {
            (Some(_), None, None) => {}
            (None, Some(_), Some(target)) => match decl.actions.get(target) {
                None => push(format!("action '{}' calls unknown action '{}'", id, target)),
                Some(t) if t.contract.is_none() => push(format!(
                    "action '{}' calls '{}', which is not an instantiation",
                    id, target
                )),
                Some(_) => {}
            },
            (None, Some(_), None) => push(format!("action '{}' (call) has no 'on' target", id)),
            (Some(_), Some(_), _) => {
                push(format!("action '{}' has both 'contract' and 'call'", id))
            }
            (Some(_), None, Some(_)) => {
                push(format!("action '{}' (contract) must not set 'on'", id))
            }
            (None, None, _) => push(format!("action '{}' has neither 'contract' nor 'call'", id)),
        }

        for arg in &action.args {
            match arg {
                ArgSpec::Ref { reference } if !decl.actions.contains_key(reference) => push(
                    format!("action '{}' references unknown action '{}'", id, reference),
                ),
                ArgSpec::Literal(serde_json::Value::Object(map)) if map.contains_key("ref") => {
                    push(format!(
                        "action '{}' has an argument mixing 'ref' with other keys",
                        id
                    ))
                }
                _ => {}
            }
        }

        for dep in &action.after {
            if !decl.actions.contains_key(dep) {
                push(format!("action '{}' runs after unknown action '{}'", id, dep));
            }
        }
    }

    for name in &decl.results {
        if !decl.actions.contains_key(name) {
            push(format!("result '{}' is not a declared action", name));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(yaml: &str) -> Vec<String> {
        let decl = parse_declaration(yaml).unwrap();
        validate_declaration(&decl)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_parse_valid() {
        let yaml = r#"
version: "1.0"
name: zaanet
actions:
  storage:
    contract: ZaaNetStorage
  network:
    contract: ZaaNetNetwork
    args: [{ ref: storage }]
  authorizeNetworkCaller:
    call: setAllowedCaller
    on: storage
    args: [{ ref: network }, true]
results: [storage, network]
"#;
        let errors = messages(yaml);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_bad_version() {
        let errors = messages(
            r#"
version: "2.0"
name: test
actions: {}
"#,
        );
        assert!(errors.iter().any(|e| e.contains("version")));
    }

    #[test]
    fn test_empty_name() {
        let errors = messages(
            r#"
version: "1.0"
name: ""
actions: {}
"#,
        );
        assert!(errors.iter().any(|e| e.contains("name must not be empty")));
    }

    #[test]
    fn test_unknown_reference() {
        let errors = messages(
            r#"
version: "1.0"
name: test
actions:
  admin:
    contract: ZaaNetAdmin
    args: [{ ref: ghost }]
"#,
        );
        assert!(errors.iter().any(|e| e.contains("unknown action 'ghost'")));
    }

    #[test]
    fn test_ref_mixed_with_literal_keys() {
        let errors = messages(
            r#"
version: "1.0"
name: test
actions:
  storage:
    contract: S
  admin:
    contract: A
    args: [{ ref: storage, amount: 3 }]
"#,
        );
        assert!(errors.iter().any(|e| e.contains("mixing 'ref'")));
    }

    #[test]
    fn test_self_dependency_left_to_resolver() {
        let errors = messages(
            r#"
version: "1.0"
name: test
actions:
  a:
    contract: A
    after: [a]
"#,
        );
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_duplicate_action_id() {
        let err = parse_declaration(
            r#"
version: "1.0"
name: zaanet
actions: { storage: {contract: ZaaNetStorage}, storage: {contract: OtherStorage} }
"#,
        )
        .unwrap_err();
        match err {
            Error::MalformedGraph { action, reason } => {
                assert_eq!(action, "storage");
                assert_eq!(reason, "duplicate action id");
            }
            other => panic!("expected MalformedGraph, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_action_id_block_style() {
        let err = parse_declaration(
            r#"
version: "1.0"
name: zaanet
actions:
  storage:
    contract: ZaaNetStorage
  admin:
    contract: ZaaNetAdmin
  storage:
    contract: OtherStorage
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedGraph { ref action, .. } if action == "storage"));
    }

    #[test]
    fn test_call_on_call() {
        let errors = messages(
            r#"
version: "1.0"
name: test
actions:
  storage:
    contract: S
  first:
    call: init
    on: storage
  second:
    call: again
    on: first
"#,
        );
        assert!(errors.iter().any(|e| e.contains("not an instantiation")));
    }

    #[test]
    fn test_kind_conflicts() {
        let errors = messages(
            r#"
version: "1.0"
name: test
actions:
  both:
    contract: A
    call: go
    on: both
  neither:
    args: [1]
  dangling:
    call: go
"#,
        );
        assert!(errors.iter().any(|e| e.contains("both 'contract' and 'call'")));
        assert!(errors.iter().any(|e| e.contains("neither")));
        assert!(errors.iter().any(|e| e.contains("no 'on' target")));
    }

    #[test]
    fn test_unknown_result() {
        let errors = messages(
            r#"
version: "1.0"
name: test
actions:
  a:
    contract: A
results: [b]
"#,
        );
        assert!(errors.iter().any(|e| e.contains("result 'b'")));
    }

    #[test]
    fn test_action_id_pattern() {
        assert!(is_valid_action_id("zaaNetStorage"));
        assert!(is_valid_action_id("storage.setAllowedCaller"));
        assert!(is_valid_action_id("_private-1"));
        assert!(!is_valid_action_id("1storage"));
        assert!(!is_valid_action_id("has space"));
        assert!(!is_valid_action_id(""));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy.yaml");
        std::fs::write(
            &path,
            r#"
version: "1.0"
name: file-test
actions: {}
"#,
        )
        .unwrap();
        let decl = parse_declaration_file(&path).unwrap();
        assert_eq!(decl.name, "file-test");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_declaration("not: [valid: yaml: {{");
        assert!(result.is_err());
    }

    #[test]
    fn test_demo_declaration_valid() {
        let decl = parse_declaration(include_str!("../../demos/deploy.yaml")).unwrap();
        let errors = validate_declaration(&decl);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert_eq!(decl.actions.len(), 6);
    }
}
