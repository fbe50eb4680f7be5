//! Declaration, graph, ledger, plan and event types.
//!
//! Declaration types derive Serialize/Deserialize for YAML roundtripping.
//! Literal values and bound results are carried as `serde_json::Value` so they
//! store cleanly in the ledger.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Declaration (deploy.yaml)
// ============================================================================

/// A named deployment declaration — the desired set of actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declaration {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Deployment name, used to derive the default run id
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Parameters available to `{{params.key}}` templates
    #[serde(default)]
    pub params: IndexMap<String, Value>,

    /// Action declarations (order-preserving)
    pub actions: IndexMap<String, ActionDecl>,

    /// Action ids whose results the deployment exports
    #[serde(default)]
    pub results: Vec<String>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

/// One declared step: either `contract` (instantiate) or `call` + `on` (invoke).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionDecl {
    /// Contract to instantiate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    /// Procedure to invoke
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,

    /// Action whose instance the call targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,

    /// Constructor or call arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgSpec>,

    /// Explicit predecessors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

/// A declared argument: a reference to another action's result, or a literal.
///
/// Only a mapping whose sole key is `ref` with a string value is a reference.
/// Any other mapping, including one that carries `ref` next to other keys, is
/// a literal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArgSpec {
    Ref {
        #[serde(rename = "ref")]
        reference: String,
    },
    Literal(Value),
}

impl<'de> Deserialize<'de> for ArgSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Value::Object(map) = &value {
            if map.len() == 1 {
                if let Some(Value::String(reference)) = map.get("ref") {
                    return Ok(Self::Ref {
                        reference: reference.clone(),
                    });
                }
            }
        }
        Ok(Self::Literal(value))
    }
}

impl From<Value> for ArgSpec {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// What to do when a completed action no longer matches its declaration
    #[serde(default)]
    pub on_changed: ChangePolicy,
}

/// Handling of completed actions whose fingerprint changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    #[default]
    Warn,
    Fail,
}

// ============================================================================
// Action graph
// ============================================================================

/// What an action does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Instantiate { contract: String },
    Invoke { target: String, method: String },
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instantiate { contract } => write!(f, "instantiate {}", contract),
            Self::Invoke { target, method } => write!(f, "invoke {}.{}", target, method),
        }
    }
}

/// A resolved argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    Literal(Value),
    Ref(String),
}

/// A node of the action graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActionKind,
    pub args: Vec<Arg>,
    pub after: Vec<String>,
    /// Position in the declaration, used for deterministic tie-breaking
    pub index: usize,
}

impl Action {
    /// All action ids this action depends on, without duplicates, in the
    /// order: invoke target, argument references, explicit predecessors.
    pub fn dependencies(&self) -> Vec<&str> {
        let target = match &self.kind {
            ActionKind::Invoke { target, .. } => Some(target.as_str()),
            ActionKind::Instantiate { .. } => None,
        };
        let refs = self.args.iter().filter_map(|arg| match arg {
            Arg::Ref(r) => Some(r.as_str()),
            Arg::Literal(_) => None,
        });
        let mut deps: Vec<&str> = Vec::new();
        for id in target
            .into_iter()
            .chain(refs)
            .chain(self.after.iter().map(String::as_str))
        {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        deps
    }
}

// ============================================================================
// Ledger records
// ============================================================================

/// Per-action execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InFlight => write!(f, "IN-FLIGHT"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown action status: {}", other)),
        }
    }
}

/// Durable record for one (run, action) key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: String,
    pub action_id: String,
    pub status: ActionStatus,

    /// Instance address or return value
    #[serde(default)]
    pub result: Option<Value>,

    /// Target-system confirmation token (transaction hash)
    #[serde(default)]
    pub token: Option<String>,

    /// Last failure detail
    #[serde(default)]
    pub error: Option<String>,

    /// BLAKE3 fingerprint of the resolved action at submission time
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Executor that holds (or last held) the action in flight
    #[serde(default)]
    pub owner: Option<String>,

    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Plan
// ============================================================================

/// What a deploy run would do with an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    Submit,
    Retry,
    Reconcile,
    Skip,
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit => write!(f, "SUBMIT"),
            Self::Retry => write!(f, "RETRY"),
            Self::Reconcile => write!(f, "RECONCILE"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub action_id: String,
    pub step: PlanStep,
    pub description: String,
}

/// Full deploy plan.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    pub name: String,
    pub run_id: String,
    pub actions: Vec<PlannedAction>,
    pub to_submit: u32,
    pub to_retry: u32,
    pub to_reconcile: u32,
    pub completed: u32,
}

// ============================================================================
// Audit events
// ============================================================================

/// Event for the JSONL audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEvent {
    RunStarted {
        run_id: String,
        declaration: String,
        network: String,
        rivet_version: String,
    },
    ActionStarted {
        run_id: String,
        action: String,
        attempt: u32,
    },
    ActionCompleted {
        run_id: String,
        action: String,
        token: String,
        duration_seconds: f64,
    },
    ActionSkipped {
        run_id: String,
        action: String,
    },
    ActionReconciled {
        run_id: String,
        action: String,
        landed: bool,
    },
    ActionFailed {
        run_id: String,
        action: String,
        error: String,
        retryable: bool,
    },
    DeclarationChanged {
        run_id: String,
        action: String,
        recorded: String,
        current: String,
    },
    RunCompleted {
        run_id: String,
        submitted: u32,
        skipped: u32,
        reconciled: u32,
        total_seconds: f64,
    },
    RunReset {
        run_id: String,
        records_cleared: usize,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DeployEvent,
}

// ============================================================================
// Deploy report
// ============================================================================

/// How an action was handled during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Submitted,
    Skipped,
    Reconciled,
}

/// Result of a deploy run.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub run_id: String,
    pub outcomes: Vec<(String, ActionOutcome)>,
    /// Result bound to every action, in execution order
    pub bound: IndexMap<String, Value>,
    /// Results named by the declaration's `results`
    pub exports: IndexMap<String, Value>,
    pub submitted: u32,
    pub skipped: u32,
    pub reconciled: u32,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a value to a string for template substitution.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
