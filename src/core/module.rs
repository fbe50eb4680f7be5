//! Programmatic declaration builder.
//!
//! Mirrors the YAML declaration: `contract` adds an instantiation, `call`
//! adds an invocation on a previously added instance. Each returns a handle
//! that later steps use as an argument or explicit predecessor, so edges are
//! explicit rather than implied by statement order.

use super::types::*;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde_json::Value;

/// Reference to an action added to a [`ModuleBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    id: String,
    instance: bool,
}

impl Handle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl From<&Handle> for ArgSpec {
    fn from(h: &Handle) -> Self {
        ArgSpec::Ref {
            reference: h.id.clone(),
        }
    }
}

/// Literal argument.
pub fn lit(v: impl Into<Value>) -> ArgSpec {
    ArgSpec::Literal(v.into())
}

/// Options for [`ModuleBuilder::call`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Explicit id; defaults to `<target>.<method>`
    pub id: Option<String>,
    /// Explicit predecessors
    pub after: Vec<Handle>,
}

/// Builds a [`Declaration`] step by step.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    name: String,
    params: IndexMap<String, Value>,
    actions: IndexMap<String, ActionDecl>,
    results: Vec<String>,
    policy: Policy,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: IndexMap::new(),
            actions: IndexMap::new(),
            results: Vec::new(),
            policy: Policy::default(),
        }
    }

    pub fn param(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn policy(&mut self, policy: Policy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Instantiate `contract`, identified by the contract name.
    pub fn contract<I>(&mut self, contract: &str, args: I) -> Result<Handle>
    where
        I: IntoIterator<Item = ArgSpec>,
    {
        self.contract_with(contract, contract, args, &[])
    }

    /// Instantiate `contract` under an explicit id with explicit predecessors.
    pub fn contract_with<I>(
        &mut self,
        id: &str,
        contract: &str,
        args: I,
        after: &[&Handle],
    ) -> Result<Handle>
    where
        I: IntoIterator<Item = ArgSpec>,
    {
        let decl = ActionDecl {
            contract: Some(contract.to_string()),
            args: args.into_iter().collect(),
            after: after.iter().map(|h| h.id.clone()).collect(),
            ..Default::default()
        };
        self.insert(id, decl)?;
        Ok(Handle {
            id: id.to_string(),
            instance: true,
        })
    }

    /// Invoke `method` on the instance behind `on`.
    pub fn call<I>(&mut self, on: &Handle, method: &str, args: I, options: CallOptions) -> Result<Handle>
    where
        I: IntoIterator<Item = ArgSpec>,
    {
        let id = options
            .id
            .unwrap_or_else(|| format!("{}.{}", on.id, method));
        if !on.instance {
            return Err(Error::MalformedGraph {
                action: id,
                reason: format!("call target '{}' is not an instantiation", on.id),
            });
        }
        let decl = ActionDecl {
            call: Some(method.to_string()),
            on: Some(on.id.clone()),
            args: args.into_iter().collect(),
            after: options.after.iter().map(|h| h.id.clone()).collect(),
            ..Default::default()
        };
        self.insert(&id, decl)?;
        Ok(Handle {
            id,
            instance: false,
        })
    }

    /// Export a handle's result from the deployment.
    pub fn export(&mut self, handle: &Handle) -> &mut Self {
        if !self.results.contains(&handle.id) {
            self.results.push(handle.id.clone());
        }
        self
    }

    pub fn build(self) -> Declaration {
        Declaration {
            version: "1.0".to_string(),
            name: self.name,
            description: None,
            params: self.params,
            actions: self.actions,
            results: self.results,
            policy: self.policy,
        }
    }

    fn insert(&mut self, id: &str, decl: ActionDecl) -> Result<()> {
        if self.actions.contains_key(id) {
            return Err(Error::MalformedGraph {
                action: id.to_string(),
                reason: format!("duplicate action id '{}'; pass an explicit id", id),
            });
        }
        self.actions.insert(id.to_string(), decl);
        Ok(())
    }
}
