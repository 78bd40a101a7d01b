//! Play variables - declared up front, bound at instantiation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error types for variable lookups and bindings
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarError {
    #[error("variable '{0}' is not declared")]
    NotDeclared(String),

    #[error("variable '{0}' is declared but has no value")]
    Unbound(String),
}

/// A single declared variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Var {
    /// Variable name
    pub name: String,

    /// Bound value (None until bound)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Var {
    /// Declare a variable without a value
    pub fn declared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Declare a variable with a value
    pub fn bound(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

/// Ordered set of declared variables
///
/// New names can only be introduced through [`Vars::declare`]; [`Vars::set`]
/// refuses names that were never declared, so a typo in an override fails
/// loudly instead of creating a stray binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vars(Vec<Var>);

impl Vars {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Declare a variable (no-op if already declared)
    pub fn declare(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.is_declared(&name) {
            self.0.push(Var::declared(name));
        }
    }

    /// Get the bound value of a variable
    pub fn get(&self, name: &str) -> Result<&str, VarError> {
        let var = self
            .0
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| VarError::NotDeclared(name.to_string()))?;
        var.value
            .as_deref()
            .ok_or_else(|| VarError::Unbound(name.to_string()))
    }

    /// Bind a value to a declared variable
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), VarError> {
        let var = self
            .0
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| VarError::NotDeclared(name.to_string()))?;
        var.value = Some(value.into());
        Ok(())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.0.iter().any(|v| v.name == name)
    }

    /// Names of declared variables that have no value
    pub fn unbound(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|v| v.value.is_none())
            .map(|v| v.name.as_str())
            .collect()
    }

    /// All bound variables as a name -> value map
    pub fn bound_values(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .filter_map(|v| v.value.as_ref().map(|value| (v.name.clone(), value.clone())))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Var>> for Vars {
    fn from(vars: Vec<Var>) -> Self {
        Self(vars)
    }
}

impl FromIterator<Var> for Vars {
    fn from_iter<T: IntoIterator<Item = Var>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
