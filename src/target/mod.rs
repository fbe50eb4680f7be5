//! Target adapter — the external ledger-like system actions are submitted to.
//!
//! The core only sees this trait. Submissions carry a deterministic tag so an
//! adapter can answer "did this land?" when a previous attempt timed out.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The target refused the operation; retrying needs a change first.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Submission status is unknown; reconcile before retrying.
    #[error("unconfirmed: {0}")]
    Unconfirmed(String),
}

impl TargetError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unconfirmed(_))
    }
}

/// What to do on the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Instantiate { contract: String },
    Invoke { address: String, method: String },
}

/// One fully resolved operation, ready to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub run_id: String,
    pub action_id: String,
    pub tag: String,
    #[serde(flatten)]
    pub operation: Operation,
    pub args: Vec<Value>,
}

/// Confirmation of a landed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Instance address for instantiations, return value for invocations
    pub result: Value,
    /// Confirmation token (transaction hash)
    pub token: String,
}

/// The external system.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Create an instance of `contract` with constructor args.
    async fn instantiate(&self, submission: &Submission) -> Result<Receipt, TargetError>;

    /// Invoke a procedure on an existing instance.
    async fn invoke(&self, submission: &Submission) -> Result<Receipt, TargetError>;

    /// Look up a previous submission by tag.
    async fn lookup(&self, tag: &str) -> Result<Option<Receipt>, TargetError>;
}

/// Dispatch a submission with an upper bound on how long to wait. A timeout
/// is reported as `Unconfirmed`: the operation may still land.
pub async fn submit(
    target: &dyn TargetAdapter,
    submission: &Submission,
    timeout: Duration,
) -> Result<Receipt, TargetError> {
    let fut = async {
        match submission.operation {
            Operation::Instantiate { .. } => target.instantiate(submission).await,
            Operation::Invoke { .. } => target.invoke(submission).await,
        }
    };
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(TargetError::Unconfirmed(format!(
            "no confirmation within {}s",
            timeout.as_secs_f64()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Slow;

    #[async_trait]
    impl TargetAdapter for Slow {
        async fn instantiate(&self, _s: &Submission) -> Result<Receipt, TargetError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Receipt {
                result: json!("0x01"),
                token: "0xaa".to_string(),
            })
        }

        async fn invoke(&self, _s: &Submission) -> Result<Receipt, TargetError> {
            Err(TargetError::Rejected("execution reverted".to_string()))
        }

        async fn lookup(&self, _tag: &str) -> Result<Option<Receipt>, TargetError> {
            Ok(None)
        }
    }

    fn submission(operation: Operation) -> Submission {
        Submission {
            run_id: "r".to_string(),
            action_id: "a".to_string(),
            tag: "blake3:00".to_string(),
            operation,
            args: vec![],
        }
    }

    #[tokio::test]
    async fn test_submit_timeout_is_unconfirmed() {
        let s = submission(Operation::Instantiate {
            contract: "ZaaNetStorage".to_string(),
        });
        let err = submit(&Slow, &s, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, TargetError::Unconfirmed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_submit_dispatches_invoke() {
        let s = submission(Operation::Invoke {
            address: "0x01".to_string(),
            method: "setAllowedCaller".to_string(),
        });
        let err = submit(&Slow, &s, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, TargetError::Rejected("execution reverted".to_string()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_submission_serde_flattens_operation() {
        let s = submission(Operation::Invoke {
            address: "0x01".to_string(),
            method: "setAllowedCaller".to_string(),
        });
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"op\":\"invoke\""));
        assert!(json.contains("\"method\":\"setAllowedCaller\""));
    }
}
