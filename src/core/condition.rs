//! Conditional execution over play variables

use crate::core::vars::Vars;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A disjunction of clauses, each clause a conjunction of `name == value` pairs
///
/// ```yaml
/// when:
///   - env: prod
///   - env: staging
///     region: us
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition {
    pub clauses: Vec<BTreeMap<String, String>>,
}

impl Condition {
    pub fn new(clauses: Vec<BTreeMap<String, String>>) -> Self {
        Self { clauses }
    }

    /// True if at least one clause fully matches `vars`
    ///
    /// A variable that is undeclared or unbound fails only the clause that
    /// references it.
    pub fn evaluate(&self, vars: &Vars) -> bool {
        self.clauses.iter().any(|clause| {
            clause
                .iter()
                .all(|(name, expected)| matches!(vars.get(name), Ok(actual) if actual == expected))
        })
    }

    /// Variable names referenced by any clause
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().flat_map(|c| c.keys().map(String::as_str))
    }
}

/// How a `when` condition on a scene or frame is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConditionPolarity {
    /// Run only when the condition holds
    #[default]
    RunIfTrue,
    /// Skip when the condition holds
    SkipIfTrue,
}

impl ConditionPolarity {
    /// Decide whether something guarded by `condition` is skipped
    pub fn skips(self, condition: Option<&Condition>, vars: &Vars) -> bool {
        let Some(condition) = condition else {
            return false;
        };
        let holds = condition.evaluate(vars);
        match self {
            ConditionPolarity::RunIfTrue => !holds,
            ConditionPolarity::SkipIfTrue => holds,
        }
    }
}
