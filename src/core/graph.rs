//! Action graph construction.
//!
//! Turns declared steps into typed actions with explicit reference edges.
//! Literal arguments may carry `{{params.key}}` and `{{network.field}}`
//! templates, substituted here so the graph is immutable once built.

use super::config::SelectedNetwork;
use super::parser::is_valid_action_id;
use super::types::*;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_json::Value;

/// Values available to templates while building a graph.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    params: IndexMap<String, Value>,
    network: Option<(String, u64)>,
}

impl TemplateContext {
    /// Declaration params, overridden by the network's params.
    pub fn new(decl_params: &IndexMap<String, Value>, network: Option<&SelectedNetwork>) -> Self {
        let mut params = decl_params.clone();
        if let Some(net) = network {
            for (k, v) in &net.config.params {
                params.insert(k.clone(), v.clone());
            }
        }
        Self {
            params,
            network: network.map(|n| (n.name.clone(), n.config.chain_id)),
        }
    }

    fn lookup(&self, key: &str) -> std::result::Result<Value, String> {
        if let Some(param) = key.strip_prefix("params.") {
            return self
                .params
                .get(param)
                .cloned()
                .ok_or_else(|| format!("unknown param: {}", param));
        }
        if let Some(field) = key.strip_prefix("network.") {
            let (name, chain_id) = self
                .network
                .as_ref()
                .ok_or_else(|| format!("no network selected for {}", key))?;
            return match field {
                "name" => Ok(Value::String(name.clone())),
                "chain_id" => Ok(Value::from(*chain_id)),
                _ => Err(format!("unknown network field: {}", field)),
            };
        }
        Err(format!("unknown template variable: {}", key))
    }
}

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, ctx: &TemplateContext) -> std::result::Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();
        let value = value_to_string(&ctx.lookup(key)?);

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Resolve templates inside a literal value. A string that is exactly one
/// template keeps the parameter's type (`"{{params.fee}}"` → `5`).
pub fn resolve_value(value: &Value, ctx: &TemplateContext) -> std::result::Result<Value, String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(inner) = trimmed
                .strip_prefix("{{")
                .and_then(|rest| rest.strip_suffix("}}"))
            {
                if !inner.contains("{{") && !inner.contains("}}") {
                    return ctx.lookup(inner.trim());
                }
            }
            if s.contains("{{") {
                resolve_template(s, ctx).map(Value::String)
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, ctx))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Immutable graph of actions, in declaration order.
#[derive(Debug, Clone)]
pub struct ActionGraph {
    name: String,
    actions: IndexMap<String, Action>,
    results: Vec<String>,
    policy: Policy,
}

impl ActionGraph {
    /// Build a graph from a parsed declaration.
    pub fn build(decl: &Declaration, network: Option<&SelectedNetwork>) -> Result<Self> {
        let ctx = TemplateContext::new(&decl.params, network);
        let steps = decl.actions.iter().map(|(id, d)| (id.clone(), d.clone()));
        let mut graph = Self::from_steps(&decl.name, steps, &ctx)?;
        for name in &decl.results {
            if !graph.actions.contains_key(name) {
                return Err(Error::MalformedGraph {
                    action: name.clone(),
                    reason: "exported result is not a declared action".to_string(),
                });
            }
        }
        graph.results = decl.results.clone();
        graph.policy = decl.policy.clone();
        Ok(graph)
    }

    /// Build a graph from an ordered sequence of steps. Duplicate ids are
    /// rejected; references may point forward and are checked once all steps
    /// are known. Nothing is returned unless the whole graph is valid.
    pub fn from_steps<I>(name: &str, steps: I, ctx: &TemplateContext) -> Result<Self>
    where
        I: IntoIterator<Item = (String, ActionDecl)>,
    {
        let mut actions: IndexMap<String, Action> = IndexMap::new();

        for (index, (id, decl)) in steps.into_iter().enumerate() {
            if !is_valid_action_id(&id) {
                return Err(malformed(&id, "action id is not a valid identifier"));
            }
            if actions.contains_key(&id) {
                return Err(malformed(&id, format!("duplicate action id '{}'", id)));
            }
            let action = build_action(&id, index, &decl, ctx)?;
            actions.insert(id, action);
        }

        for action in actions.values() {
            check_references(action, &actions)?;
        }

        tracing::debug!(graph = name, actions = actions.len(), "action graph built");

        Ok(Self {
            name: name.to_string(),
            actions,
            results: Vec::new(),
            policy: Policy::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

fn malformed(action: &str, reason: impl Into<String>) -> Error {
    Error::MalformedGraph {
        action: action.to_string(),
        reason: reason.into(),
    }
}

fn build_action(id: &str, index: usize, decl: &ActionDecl, ctx: &TemplateContext) -> Result<Action> {
    let kind = match (&decl.contract, &decl.call, &decl.on) {
        (Some(contract), None, None) => ActionKind::Instantiate {
            contract: contract.clone(),
        },
        (None, Some(method), Some(target)) => ActionKind::Invoke {
            target: target.clone(),
            method: method.clone(),
        },
        (None, Some(_), None) => return Err(malformed(id, "call has no 'on' target")),
        _ => {
            return Err(malformed(
                id,
                "action must be exactly one of 'contract' or 'call' + 'on'",
            ))
        }
    };

    let mut args = Vec::with_capacity(decl.args.len());
    for spec in &decl.args {
        args.push(match spec {
            ArgSpec::Ref { reference } => Arg::Ref(reference.clone()),
            ArgSpec::Literal(v) => Arg::Literal(resolve_value(v, ctx).map_err(|e| malformed(id, e))?),
        });
    }

    Ok(Action {
        id: id.to_string(),
        kind,
        args,
        after: decl.after.clone(),
        index,
    })
}

fn check_references(action: &Action, actions: &IndexMap<String, Action>) -> Result<()> {
    if let ActionKind::Invoke { target, .. } = &action.kind {
        match actions.get(target) {
            None => {
                return Err(malformed(
                    &action.id,
                    format!("call target '{}' is not declared", target),
                ))
            }
            Some(t) if !matches!(t.kind, ActionKind::Instantiate { .. }) => {
                return Err(malformed(
                    &action.id,
                    format!("call target '{}' is not an instantiation", target),
                ))
            }
            Some(_) => {}
        }
    }
    // A self-dependency is a one-node cycle and is left to the resolver
    for dep in action.dependencies() {
        if !actions.contains_key(dep) {
            return Err(malformed(
                &action.id,
                format!("reference to undeclared action '{}'", dep),
            ));
        }
    }
    Ok(())
}
