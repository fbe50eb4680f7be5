//! Executor — orchestration loop for deploy.
//!
//! resolve → for each action in order: ledger check → (reconcile) → resolve
//! args → claim → submit → record → bind result.
//!
//! The ledger is consulted before every submission, so re-running a run id
//! resumes at the first action that is not `Completed`. Actions run strictly
//! one after another; the only suspension point is the target submission.

use super::config::SelectedNetwork;
use super::graph::ActionGraph;
use super::ledger::Ledger;
use super::planner;
use super::resolver;
use super::types::*;
use crate::audit::{eventlog, hasher};
use crate::error::{Error, Result};
use crate::target::{self, Operation, Submission, TargetAdapter, TargetError};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation, observed between actions only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for a deploy run.
pub struct DeployConfig<'a> {
    pub graph: &'a ActionGraph,
    pub run_id: &'a str,
    pub network: &'a SelectedNetwork,
    pub ledger: &'a Ledger,
    pub target: &'a dyn TargetAdapter,
    /// Where to write the audit log; `None` disables it
    pub state_dir: Option<&'a Path>,
    pub cancel: Option<&'a CancelFlag>,
}

/// Shared context for one run.
struct RunCtx<'a> {
    cfg: &'a DeployConfig<'a>,
    owner: String,
    bound: IndexMap<String, Value>,
}

impl RunCtx<'_> {
    fn event(&self, event: DeployEvent) {
        eventlog::record(self.cfg.state_dir, self.cfg.run_id, event);
    }
}

/// Show what a deploy run would do, without touching the ledger or target.
pub fn dry_run(graph: &ActionGraph, run_id: &str, ledger: &Ledger) -> Result<DeployPlan> {
    let order = resolver::build_execution_order(graph)?;
    let records: HashMap<String, ExecutionRecord> = ledger
        .records(run_id)?
        .into_iter()
        .map(|r| (r.action_id.clone(), r))
        .collect();
    Ok(planner::plan(graph, &order, run_id, &records))
}

/// Execute the deploy loop.
pub async fn deploy(cfg: &DeployConfig<'_>) -> Result<DeployReport> {
    let start = Instant::now();

    // Resolution errors abort before anything is submitted
    let order = resolver::build_execution_order(cfg.graph)?;

    let mut ctx = RunCtx {
        cfg,
        owner: eventlog::generate_owner_tag(),
        bound: IndexMap::new(),
    };

    tracing::info!(
        run = cfg.run_id,
        network = %cfg.network.name,
        actions = order.len(),
        graph = %hasher::graph_fingerprint(cfg.graph),
        "deploy started"
    );
    ctx.event(DeployEvent::RunStarted {
        run_id: cfg.run_id.to_string(),
        declaration: cfg.graph.name().to_string(),
        network: cfg.network.name.clone(),
        rivet_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let mut outcomes = Vec::with_capacity(order.len());
    let mut submitted = 0u32;
    let mut skipped = 0u32;
    let mut reconciled = 0u32;

    for action_id in &order {
        if cfg.cancel.is_some_and(CancelFlag::is_cancelled) {
            tracing::warn!(run = cfg.run_id, next = %action_id, "deploy cancelled");
            return Err(Error::Cancelled {
                next_action: action_id.clone(),
            });
        }

        let action = cfg
            .graph
            .get(action_id)
            .ok_or_else(|| Error::UnresolvedReference {
                action: action_id.clone(),
                reference: action_id.clone(),
            })?;

        let outcome = process_action(&mut ctx, action).await?;
        match outcome {
            ActionOutcome::Submitted => submitted += 1,
            ActionOutcome::Skipped => skipped += 1,
            ActionOutcome::Reconciled => reconciled += 1,
        }
        outcomes.push((action_id.clone(), outcome));
    }

    let exports: IndexMap<String, Value> = cfg
        .graph
        .results()
        .iter()
        .filter_map(|id| ctx.bound.get(id).map(|v| (id.clone(), v.clone())))
        .collect();

    let total_duration = start.elapsed();
    ctx.event(DeployEvent::RunCompleted {
        run_id: cfg.run_id.to_string(),
        submitted,
        skipped,
        reconciled,
        total_seconds: total_duration.as_secs_f64(),
    });
    tracing::info!(run = cfg.run_id, submitted, skipped, reconciled, "deploy complete");

    Ok(DeployReport {
        run_id: cfg.run_id.to_string(),
        outcomes,
        bound: ctx.bound,
        exports,
        submitted,
        skipped,
        reconciled,
        total_duration,
    })
}

/// Drive one action to `Completed`.
async fn process_action(ctx: &mut RunCtx<'_>, action: &Action) -> Result<ActionOutcome> {
    let cfg = ctx.cfg;
    let fingerprint = hasher::action_fingerprint(action);

    match cfg.ledger.get(cfg.run_id, &action.id)? {
        Some(rec) if rec.status == ActionStatus::Completed => {
            check_unchanged(ctx, action, &rec, &fingerprint)?;
            ctx.bound
                .insert(action.id.clone(), rec.result.unwrap_or(Value::Null));
            tracing::debug!(action = %action.id, "already completed, skipping");
            ctx.event(DeployEvent::ActionSkipped {
                run_id: cfg.run_id.to_string(),
                action: action.id.clone(),
            });
            return Ok(ActionOutcome::Skipped);
        }
        Some(rec) if rec.status == ActionStatus::InFlight => {
            if reconcile(ctx, action, &rec).await? {
                return Ok(ActionOutcome::Reconciled);
            }
        }
        _ => {}
    }

    submit_action(ctx, action, &fingerprint).await?;
    Ok(ActionOutcome::Submitted)
}

/// Apply the change policy to a completed action whose declaration moved on.
fn check_unchanged(
    ctx: &RunCtx<'_>,
    action: &Action,
    rec: &ExecutionRecord,
    fingerprint: &str,
) -> Result<()> {
    let Some(recorded) = rec.fingerprint.as_deref() else {
        return Ok(());
    };
    if recorded == fingerprint {
        return Ok(());
    }

    ctx.event(DeployEvent::DeclarationChanged {
        run_id: ctx.cfg.run_id.to_string(),
        action: action.id.clone(),
        recorded: recorded.to_string(),
        current: fingerprint.to_string(),
    });

    match ctx.cfg.graph.policy().on_changed {
        ChangePolicy::Warn => {
            tracing::warn!(
                action = %action.id,
                "completed action no longer matches its declaration; keeping recorded result"
            );
            Ok(())
        }
        ChangePolicy::Fail => Err(Error::DeclarationChanged {
            action: action.id.clone(),
            recorded: recorded.to_string(),
            current: fingerprint.to_string(),
        }),
    }
}

/// Resolve an in-flight record left by an earlier attempt. Returns true if
/// the submission had landed and is now recorded as completed; false if it
/// was marked failed and should be submitted again. The claim is taken over
/// from the owner seen in `rec` first, so two reconcilers cannot both act.
async fn reconcile(ctx: &mut RunCtx<'_>, action: &Action, rec: &ExecutionRecord) -> Result<bool> {
    let cfg = ctx.cfg;
    let tag = hasher::submission_tag(cfg.run_id, &action.id);

    let found = cfg
        .target
        .lookup(&tag)
        .await
        .map_err(|source| Error::ActionExecutionFailed {
            action: action.id.clone(),
            source,
        })?;

    if let Some(receipt) = found {
        cfg.ledger
            .take_over(cfg.run_id, &action.id, rec.owner.as_deref(), &ctx.owner)?;
        cfg.ledger.mark_completed(
            cfg.run_id,
            &action.id,
            &ctx.owner,
            &receipt.result,
            &receipt.token,
        )?;
        tracing::info!(action = %action.id, token = %receipt.token, "in-flight submission had landed");
        ctx.event(DeployEvent::ActionReconciled {
            run_id: cfg.run_id.to_string(),
            action: action.id.clone(),
            landed: true,
        });
        ctx.bound.insert(action.id.clone(), receipt.result);
        return Ok(true);
    }

    let age = (chrono::Utc::now() - rec.updated_at)
        .to_std()
        .unwrap_or_default();
    if age < cfg.network.config.stale_in_flight() {
        return Err(Error::AlreadyInFlightOrDone {
            run: cfg.run_id.to_string(),
            action: action.id.clone(),
            status: ActionStatus::InFlight.to_string(),
        });
    }

    cfg.ledger
        .take_over(cfg.run_id, &action.id, rec.owner.as_deref(), &ctx.owner)?;
    cfg.ledger.mark_failed(
        cfg.run_id,
        &action.id,
        &ctx.owner,
        "reconciled: submission did not land",
    )?;
    tracing::info!(action = %action.id, "stale in-flight submission did not land, retrying");
    ctx.event(DeployEvent::ActionReconciled {
        run_id: cfg.run_id.to_string(),
        action: action.id.clone(),
        landed: false,
    });
    Ok(false)
}

/// Resolve references against results bound so far.
fn resolve_args(action: &Action, bound: &IndexMap<String, Value>) -> Result<Vec<Value>> {
    action
        .args
        .iter()
        .map(|arg| match arg {
            Arg::Literal(v) => Ok(v.clone()),
            Arg::Ref(r) => bound
                .get(r)
                .cloned()
                .ok_or_else(|| Error::UnresolvedReference {
                    action: action.id.clone(),
                    reference: r.clone(),
                }),
        })
        .collect()
}

fn build_submission(action: &Action, run_id: &str, bound: &IndexMap<String, Value>) -> Result<Submission> {
    let operation = match &action.kind {
        ActionKind::Instantiate { contract } => Operation::Instantiate {
            contract: contract.clone(),
        },
        ActionKind::Invoke { target, method } => {
            let address = bound
                .get(target)
                .ok_or_else(|| Error::UnresolvedReference {
                    action: action.id.clone(),
                    reference: target.clone(),
                })?;
            Operation::Invoke {
                address: value_to_string(address),
                method: method.clone(),
            }
        }
    };
    Ok(Submission {
        run_id: run_id.to_string(),
        action_id: action.id.clone(),
        tag: hasher::submission_tag(run_id, &action.id),
        operation,
        args: resolve_args(action, bound)?,
    })
}

async fn submit_action(ctx: &mut RunCtx<'_>, action: &Action, fingerprint: &str) -> Result<()> {
    let cfg = ctx.cfg;
    let submission = build_submission(action, cfg.run_id, &ctx.bound)?;

    let claim = cfg
        .ledger
        .mark_in_flight(cfg.run_id, &action.id, fingerprint, &ctx.owner)?;
    ctx.event(DeployEvent::ActionStarted {
        run_id: cfg.run_id.to_string(),
        action: action.id.clone(),
        attempt: claim.attempts,
    });
    tracing::info!(action = %action.id, attempt = claim.attempts, "submitting {}", action.kind);

    let started = Instant::now();
    let outcome = target::submit(cfg.target, &submission, cfg.network.config.submit_timeout()).await;
    let duration = started.elapsed().as_secs_f64();

    match outcome {
        Ok(receipt) => {
            cfg.ledger.mark_completed(
                cfg.run_id,
                &action.id,
                &ctx.owner,
                &receipt.result,
                &receipt.token,
            )?;
            ctx.event(DeployEvent::ActionCompleted {
                run_id: cfg.run_id.to_string(),
                action: action.id.clone(),
                token: receipt.token.clone(),
                duration_seconds: duration,
            });
            tracing::info!(action = %action.id, token = %receipt.token, "confirmed");
            ctx.bound.insert(action.id.clone(), receipt.result);
            Ok(())
        }
        Err(source) => {
            // Unconfirmed submissions stay in flight until reconciled
            if let TargetError::Rejected(detail) = &source {
                cfg.ledger
                    .mark_failed(cfg.run_id, &action.id, &ctx.owner, detail)?;
            }
            ctx.event(DeployEvent::ActionFailed {
                run_id: cfg.run_id.to_string(),
                action: action.id.clone(),
                error: source.to_string(),
                retryable: source.is_retryable(),
            });
            tracing::warn!(action = %action.id, error = %source, "submission failed, stopping run");
            Err(Error::ActionExecutionFailed {
                action: action.id.clone(),
                source,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_declaration;
    use crate::target::simulated::SimulatedTarget;
    use std::time::Duration;

    const ZAANET: &str = r#"
version: "1.0"
name: zaanet
actions:
  S: { contract: ZaaNetStorage }
  A: { contract: ZaaNetAdmin, args: [{ ref: S }, "treasury", 5] }
  setAllowedCaller-call: { call: setAllowedCaller, on: S, args: [{ ref: A }, true], after: [A] }
results: [S, A]
"#;

    const CHAIN: &str = r#"
version: "1.0"
name: chain
actions:
  c1: { contract: C1 }
  c2: { contract: C2, args: [{ ref: c1 }] }
  c3: { contract: C3, args: [{ ref: c2 }] }
  c4: { contract: C4, args: [{ ref: c3 }] }
  c5: { contract: C5, args: [{ ref: c4 }] }
"#;

    fn graph(yaml: &str) -> ActionGraph {
        ActionGraph::build(&parse_declaration(yaml).unwrap(), None).unwrap()
    }

    fn config<'a>(
        graph: &'a ActionGraph,
        network: &'a SelectedNetwork,
        ledger: &'a Ledger,
        target: &'a SimulatedTarget,
    ) -> DeployConfig<'a> {
        DeployConfig {
            graph,
            run_id: "run-1",
            network,
            ledger,
            target,
            state_dir: None,
            cancel: None,
        }
    }

    fn submitted(report: &DeployReport) -> Vec<&str> {
        report
            .outcomes
            .iter()
            .filter(|(_, o)| *o == ActionOutcome::Submitted)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_zaanet_deploy_binds_results() {
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();

        let report = deploy(&config(&g, &net, &ledger, &chain)).await.unwrap();
        assert_eq!(submitted(&report), vec!["S", "A", "setAllowedCaller-call"]);
        assert_eq!(report.exports.len(), 2);

        let storage = report.exports["S"].as_str().unwrap().to_string();
        let admin = report.exports["A"].as_str().unwrap().to_string();
        let admin_instance = chain.instance(&admin).unwrap().unwrap();
        assert_eq!(
            admin_instance.args,
            vec![Value::String(storage.clone()), Value::from("treasury"), Value::from(5)]
        );

        let calls = chain.calls().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, storage);
        assert_eq!(calls[0].args, vec![Value::String(admin), Value::Bool(true)]);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let cfg = config(&g, &net, &ledger, &chain);

        let first = deploy(&cfg).await.unwrap();
        let before = chain.submissions();
        let second = deploy(&cfg).await.unwrap();

        assert_eq!(chain.submissions(), before);
        assert_eq!(second.submitted, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(first.bound, second.bound);
        assert_eq!(first.exports, second.exports);
    }

    #[tokio::test]
    async fn test_failure_midway_resumes_at_failed_action() {
        let g = graph(CHAIN);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let cfg = config(&g, &net, &ledger, &chain);

        chain.reject("C3");
        let err = deploy(&cfg).await.unwrap_err();
        match &err {
            Error::ActionExecutionFailed { action, source } => {
                assert_eq!(action, "c3");
                assert!(matches!(source, TargetError::Rejected(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(ledger.status("run-1", "c1").unwrap(), ActionStatus::Completed);
        assert_eq!(ledger.status("run-1", "c2").unwrap(), ActionStatus::Completed);
        assert_eq!(ledger.status("run-1", "c3").unwrap(), ActionStatus::Failed);
        assert_eq!(ledger.status("run-1", "c4").unwrap(), ActionStatus::Pending);
        assert_eq!(ledger.status("run-1", "c5").unwrap(), ActionStatus::Pending);

        chain.clear_faults();
        let before = chain.submissions();
        let report = deploy(&cfg).await.unwrap();
        assert_eq!(submitted(&report), vec!["c3", "c4", "c5"]);
        assert_eq!(report.skipped, 2);
        assert_eq!(chain.submissions() - before, 3);
        assert_eq!(ledger.get("run-1", "c3").unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_failed_call_leaves_deployments_completed() {
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let cfg = config(&g, &net, &ledger, &chain);

        chain.reject("setAllowedCaller");
        let err = deploy(&cfg).await.unwrap_err();
        assert_eq!(err.action(), Some("setAllowedCaller-call"));
        assert_eq!(ledger.status("run-1", "S").unwrap(), ActionStatus::Completed);
        assert_eq!(ledger.status("run-1", "A").unwrap(), ActionStatus::Completed);
        assert_eq!(
            ledger.status("run-1", "setAllowedCaller-call").unwrap(),
            ActionStatus::Failed
        );

        chain.clear_faults();
        let report = deploy(&cfg).await.unwrap();
        assert_eq!(submitted(&report), vec!["setAllowedCaller-call"]);
        assert_eq!(chain.instances().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unconfirmed_then_reconciled_without_resubmitting() {
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let cfg = config(&g, &net, &ledger, &chain);

        chain.drop_receipts(1);
        let err = deploy(&cfg).await.unwrap_err();
        assert!(err.is_retryable());
        let stranded = ledger.get("run-1", "S").unwrap().unwrap();
        assert_eq!(stranded.status, ActionStatus::InFlight);

        let before = chain.submissions();
        let report = deploy(&cfg).await.unwrap();
        assert_eq!(report.outcomes[0], ("S".to_string(), ActionOutcome::Reconciled));
        assert_eq!(report.reconciled, 1);
        assert_eq!(chain.submissions() - before, 2);

        // The reconciling executor took the claim over before completing it
        let rec = ledger.get("run-1", "S").unwrap().unwrap();
        assert_eq!(rec.status, ActionStatus::Completed);
        assert_ne!(rec.owner, stranded.owner);
        assert_eq!(rec.attempts, 1);
        assert_eq!(chain.instances().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_in_flight_then_stale_retry() {
        let g = graph(ZAANET);
        let mut net = SelectedNetwork::local();
        net.config.submit_timeout_secs = 30;
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();

        chain.set_latency(Duration::from_secs(600));
        let err = deploy(&config(&g, &net, &ledger, &chain)).await.unwrap_err();
        match &err {
            Error::ActionExecutionFailed { action, source } => {
                assert_eq!(action, "S");
                assert!(matches!(source, TargetError::Unconfirmed(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.status("run-1", "S").unwrap(), ActionStatus::InFlight);
        assert!(chain.instances().unwrap().is_empty());

        // Within the stale window another executor may still own the claim
        chain.clear_faults();
        let err = deploy(&config(&g, &net, &ledger, &chain)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInFlightOrDone { .. }));

        net.config.stale_in_flight_secs = 0;
        let report = deploy(&config(&g, &net, &ledger, &chain)).await.unwrap();
        assert_eq!(report.submitted, 3);
        assert_eq!(ledger.get("run-1", "S").unwrap().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_concurrent_executors_single_submission() {
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        chain.set_latency(Duration::from_millis(20));

        let cfg_a = config(&g, &net, &ledger, &chain);
        let cfg_b = config(&g, &net, &ledger, &chain);
        let (a, b) = tokio::join!(deploy(&cfg_a), deploy(&cfg_b));

        let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
        assert!(winner.is_ok());
        assert!(matches!(
            loser.unwrap_err(),
            Error::AlreadyInFlightOrDone { .. }
        ));
        assert_eq!(chain.instances().unwrap().len(), 2);
        assert_eq!(chain.calls().unwrap().len(), 1);
        let completed = ledger
            .records("run-1")
            .unwrap()
            .into_iter()
            .filter(|r| r.action_id == "S" && r.status == ActionStatus::Completed)
            .count();
        assert_eq!(completed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_action() {
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let cfg = DeployConfig {
            cancel: Some(&cancel),
            ..config(&g, &net, &ledger, &chain)
        };
        let err = deploy(&cfg).await.unwrap_err();
        assert_eq!(err.action(), Some("S"));
        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(chain.submissions(), 0);
        assert!(ledger.records("run-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_submission() {
        let g = graph(
            r#"
version: "1.0"
name: cyclic
actions:
  A: { contract: A, after: [B] }
  B: { contract: B, after: [A] }
"#,
        );
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let err = deploy(&config(&g, &net, &ledger, &chain)).await.unwrap_err();
        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert_eq!(chain.submissions(), 0);
    }

    #[tokio::test]
    async fn test_changed_declaration_policy() {
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();

        let original = graph(ZAANET);
        deploy(&config(&original, &net, &ledger, &chain)).await.unwrap();

        let changed_yaml = ZAANET.replace("\"treasury\", 5", "\"treasury\", 7");
        let warned = graph(&changed_yaml);
        let report = deploy(&config(&warned, &net, &ledger, &chain)).await.unwrap();
        assert_eq!(report.skipped, 3);

        let strict_yaml = format!("{}policy:\n  on_changed: fail\n", changed_yaml);
        let strict = graph(&strict_yaml);
        let err = deploy(&config(&strict, &net, &ledger, &chain)).await.unwrap_err();
        match err {
            Error::DeclarationChanged { action, .. } => assert_eq!(action, "A"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_audit_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let g = graph(ZAANET);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();
        let cfg = DeployConfig {
            state_dir: Some(dir.path()),
            ..config(&g, &net, &ledger, &chain)
        };
        deploy(&cfg).await.unwrap();

        let events = eventlog::read_events(dir.path(), "run-1").unwrap();
        assert!(matches!(events.first().unwrap().event, DeployEvent::RunStarted { .. }));
        assert!(matches!(
            events.last().unwrap().event,
            DeployEvent::RunCompleted { submitted: 3, .. }
        ));
        let completed = events
            .iter()
            .filter(|e| matches!(e.event, DeployEvent::ActionCompleted { .. }))
            .count();
        assert_eq!(completed, 3);
    }

    #[tokio::test]
    async fn test_dry_run_reflects_ledger() {
        let g = graph(CHAIN);
        let net = SelectedNetwork::local();
        let ledger = Ledger::open_in_memory().unwrap();
        let chain = SimulatedTarget::new(&net.config).unwrap();

        let fresh = dry_run(&g, "run-1", &ledger).unwrap();
        assert_eq!(fresh.to_submit, 5);

        chain.reject("C4");
        let _ = deploy(&config(&g, &net, &ledger, &chain)).await;
        let p = dry_run(&g, "run-1", &ledger).unwrap();
        assert_eq!((p.completed, p.to_retry, p.to_submit), (3, 1, 1));
        assert_eq!(chain.submissions(), 4);
    }

    #[test]
    fn test_resolve_args_unbound_reference() {
        let g = graph(ZAANET);
        let action = g.get("A").unwrap();
        let err = resolve_args(action, &IndexMap::new()).unwrap_err();
        match err {
            Error::UnresolvedReference { action, reference } => {
                assert_eq!(action, "A");
                assert_eq!(reference, "S");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_build_submission_uses_bound_address() {
        let g = graph(ZAANET);
        let mut bound = IndexMap::new();
        bound.insert("S".to_string(), Value::from("0xstorage"));
        bound.insert("A".to_string(), Value::from("0xadmin"));
        let s = build_submission(g.get("setAllowedCaller-call").unwrap(), "run-1", &bound).unwrap();
        assert_eq!(
            s.operation,
            Operation::Invoke {
                address: "0xstorage".to_string(),
                method: "setAllowedCaller".to_string(),
            }
        );
        assert_eq!(s.args, vec![Value::from("0xadmin"), Value::Bool(true)]);
        assert_eq!(s.tag, hasher::submission_tag("run-1", "setAllowedCaller-call"));
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
