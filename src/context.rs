//! Execution context shared by the tasks of one chain run.
//!
//! [`ExecutionContext`] holds the run's inputs and, in execution order, the
//! [`Outcome`] of every task that has finished. A fresh context is built
//! for each [`TaskChain::run`](crate::chain::TaskChain::run).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::outcome::Outcome;

/// Input values by name.
///
/// Values sit behind `Arc` so non-template defaults are handed out by
/// reference while template defaults get a fresh allocation per run.
pub type Inputs = BTreeMap<String, Arc<Value>>;

/// Task outcomes keyed by label, kept in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Steps {
    entries: Vec<(String, Outcome)>,
}

impl Steps {
    /// Record `outcome` for `label`, replacing an earlier entry in place.
    pub fn insert(&mut self, label: impl Into<String>, outcome: Outcome) {
        let label = label.into();
        match self.entries.iter_mut().find(|(l, _)| *l == label) {
            Some((_, existing)) => *existing = outcome,
            None => self.entries.push((label, outcome)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&Outcome> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, o)| o)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in execution order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.entries.iter().map(|(l, o)| (l.as_str(), o))
    }
}

impl Serialize for Steps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, outcome) in &self.entries {
            map.serialize_entry(label, outcome)?;
        }
        map.end()
    }
}

/// Inputs plus the steps recorded so far.
///
/// # Example
///
/// ```
/// use octochain::context::ExecutionContext;
/// use octochain::outcome::Outcome;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let mut ctx = ExecutionContext::default();
/// ctx.inputs.insert("owner".into(), Arc::new(json!("acme")));
/// ctx.steps.insert("lookup", Outcome::Success { data: json!({"sha": "abc"}) });
///
/// assert_eq!(ctx.input_str("owner"), Some("acme"));
/// assert_eq!(ctx.data("lookup").unwrap()["sha"], "abc");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionContext {
    pub inputs: Inputs,
    pub steps: Steps,
}

impl ExecutionContext {
    pub fn new(inputs: Inputs) -> Self {
        Self {
            inputs,
            steps: Steps::default(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).map(Arc::as_ref)
    }

    /// String input, if present and a string.
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(Value::as_str)
    }

    pub fn step(&self, label: &str) -> Option<&Outcome> {
        self.steps.get(label)
    }

    /// Data of a successful step.
    pub fn data(&self, label: &str) -> Option<&Value> {
        self.step(label).and_then(Outcome::data)
    }

    /// Structural copy that shares no allocation with `self`.
    ///
    /// `clone()` shares input values through their `Arc`s; observers get
    /// this copy instead.
    pub fn snapshot(&self) -> Self {
        Self {
            inputs: self
                .inputs
                .iter()
                .map(|(k, v)| (k.clone(), Arc::new(Value::clone(v))))
                .collect(),
            steps: self.steps.clone(),
        }
    }
}
