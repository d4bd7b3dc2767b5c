//! Runtime parameters: step configuration bound at run invocation time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The value slot of a runtime parameter.
///
/// `Unset` is an explicit sentinel; there is no implicit default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "value")]
pub enum ParamValue {
    /// Not bound yet.
    #[default]
    Unset,
    /// Bound to a concrete value.
    Set(serde_json::Value),
}

impl ParamValue {
    /// Returns the bound value, if any.
    #[must_use]
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Unset => None,
            Self::Set(value) => Some(value),
        }
    }

    /// Returns true if a value is bound.
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

/// A named configuration value declared by a step and supplied at run time.
///
/// The declaration carries no value; bindings come from [`RuntimeParameters`]
/// at run invocation and reach step logic as [`ParamValue`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeParameter {
    /// Parameter name, unique within its step.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Whether the run may start with this parameter unset.
    pub optional: bool,
}

impl RuntimeParameter {
    /// Declares a required parameter.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            optional: false,
        }
    }

    /// Marks the parameter as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Runtime parameter bindings keyed by step name, then parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeParameters {
    bindings: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl RuntimeParameters {
    /// Creates an empty set of bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding.
    #[must_use]
    pub fn with(
        mut self,
        step: impl Into<String>,
        param: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.set(step, param, value);
        self
    }

    /// Adds or replaces a binding.
    pub fn set(&mut self, step: impl Into<String>, param: impl Into<String>, value: serde_json::Value) {
        self.bindings
            .entry(step.into())
            .or_default()
            .insert(param.into(), value);
    }

    /// Returns the value bound for `(step, param)`.
    #[must_use]
    pub fn get(&self, step: &str, param: &str) -> Option<&serde_json::Value> {
        self.bindings.get(step).and_then(|params| params.get(param))
    }

    /// Returns all `(step, param)` pairs that have a binding.
    #[must_use]
    pub fn keys(&self) -> Vec<(String, String)> {
        self.bindings
            .iter()
            .flat_map(|(step, params)| {
                params.keys().map(move |param| (step.clone(), param.clone()))
            })
            .collect()
    }

    /// Returns the number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.values().map(HashMap::len).sum()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
