//! Plan generation — compare the resolved graph against ledger records.

use super::graph::ActionGraph;
use super::types::*;
use crate::audit::hasher;
use std::collections::HashMap;

/// Generate a deploy plan. Pure: reads records, touches nothing.
pub fn plan(
    graph: &ActionGraph,
    execution_order: &[String],
    run_id: &str,
    records: &HashMap<String, ExecutionRecord>,
) -> DeployPlan {
    let mut actions = Vec::new();
    let mut to_submit = 0u32;
    let mut to_retry = 0u32;
    let mut to_reconcile = 0u32;
    let mut completed = 0u32;

    for action_id in execution_order {
        let action = match graph.get(action_id) {
            Some(a) => a,
            None => continue,
        };
        let record = records.get(action_id);
        let step = determine_step(record);

        match step {
            PlanStep::Submit => to_submit += 1,
            PlanStep::Retry => to_retry += 1,
            PlanStep::Reconcile => to_reconcile += 1,
            PlanStep::Skip => completed += 1,
        }

        actions.push(PlannedAction {
            action_id: action_id.clone(),
            step,
            description: describe(action, record),
        });
    }

    DeployPlan {
        name: graph.name().to_string(),
        run_id: run_id.to_string(),
        actions,
        to_submit,
        to_retry,
        to_reconcile,
        completed,
    }
}

/// Decide what a run would do given the current record.
pub fn determine_step(record: Option<&ExecutionRecord>) -> PlanStep {
    match record.map(|r| r.status) {
        None | Some(ActionStatus::Pending) => PlanStep::Submit,
        Some(ActionStatus::Failed) => PlanStep::Retry,
        Some(ActionStatus::InFlight) => PlanStep::Reconcile,
        Some(ActionStatus::Completed) => PlanStep::Skip,
    }
}

fn describe(action: &Action, record: Option<&ExecutionRecord>) -> String {
    let args: Vec<String> = action
        .args
        .iter()
        .map(|a| match a {
            Arg::Ref(r) => format!("@{}", r),
            Arg::Literal(v) => v.to_string(),
        })
        .collect();
    let mut text = format!("{}: {}({})", action.id, action.kind, args.join(", "));

    if let Some(rec) = record {
        match rec.status {
            ActionStatus::Completed => {
                if let Some(result) = &rec.result {
                    text.push_str(&format!(" = {}", value_to_string(result)));
                }
                if rec
                    .fingerprint
                    .as_deref()
                    .is_some_and(|f| f != hasher::action_fingerprint(action))
                {
                    text.push_str(" (changed since completion)");
                }
            }
            ActionStatus::Failed => {
                if let Some(err) = &rec.error {
                    text.push_str(&format!(" [last error: {}]", err));
                }
            }
            ActionStatus::InFlight => {
                text.push_str(&format!(" [in flight since {}]", rec.updated_at.to_rfc3339()));
            }
            ActionStatus::Pending => {}
        }
    }

    text
}
