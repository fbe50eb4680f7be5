//! Crate-wide error type.

use crate::target::TargetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed graph at action '{action}': {reason}")]
    MalformedGraph { action: String, reason: String },

    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<String> },

    #[error("action '{action}' references '{reference}' which has no bound result")]
    UnresolvedReference { action: String, reference: String },

    #[error("action '{action}' in run '{run}' is already {status}")]
    AlreadyInFlightOrDone {
        run: String,
        action: String,
        status: String,
    },

    #[error("invalid transition for action '{action}': {from} -> {to}")]
    InvalidTransition {
        action: String,
        from: String,
        to: String,
    },

    #[error("action '{action}' failed: {source}")]
    ActionExecutionFailed {
        action: String,
        #[source]
        source: TargetError,
    },

    #[error("action '{action}' changed since it was completed (recorded {recorded}, now {current})")]
    DeclarationChanged {
        action: String,
        recorded: String,
        current: String,
    },

    #[error("run cancelled before action '{next_action}'")]
    Cancelled { next_action: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0} validation error(s)")]
    Validation(usize),

    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The action identity this error names, if any.
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::MalformedGraph { action, .. }
            | Self::UnresolvedReference { action, .. }
            | Self::AlreadyInFlightOrDone { action, .. }
            | Self::InvalidTransition { action, .. }
            | Self::ActionExecutionFailed { action, .. }
            | Self::DeclarationChanged { action, .. } => Some(action),
            Self::Cancelled { next_action } => Some(next_action),
            Self::CyclicDependency { cycle } => cycle.first().map(String::as_str),
            _ => None,
        }
    }

    /// Whether a later run may succeed without changing the declaration.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ActionExecutionFailed { source, .. } => source.is_retryable(),
            Self::AlreadyInFlightOrDone { .. } | Self::Cancelled { .. } => true,
            _ => false,
        }
    }
}

fn format_cycle(cycle: &[String]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(String::as_str).collect();
    if let Some(first) = cycle.first() {
        parts.push(first);
    }
    parts.join(" -> ")
}

pub type Result<T> = std::result::Result<T, Error>;
