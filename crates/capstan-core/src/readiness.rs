//! Checks whether a stage may be deployed.
//!
//! Every check runs on every call and all failures are collected, so the
//! operator sees the complete list of what is missing at once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::stage::StageSnapshot;

/// Problem key reported when a stage has no roles.
pub const ROLES_PROBLEM: &str = "roles";

/// Variables every stage needs unless configured otherwise.
pub const DEFAULT_REQUIRED_VARIABLES: [&str; 2] = ["repository", "application"];

/// Reasons a deployment is not possible, keyed by problem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentProblems(BTreeMap<String, String>);

impl DeploymentProblems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.0.insert(key.into(), message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for DeploymentProblems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// A configuration key that must resolve to a non-blank value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredVariable {
    pub name: String,
}

impl RequiredVariable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn problem(&self) -> String {
        format!("the configuration parameter '{}' needs to be set.", self.name)
    }
}

/// Evaluates deployment prerequisites against a stage snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessChecker {
    required: Vec<RequiredVariable>,
}

impl Default for ReadinessChecker {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_VARIABLES.map(RequiredVariable::new))
    }
}

impl ReadinessChecker {
    pub fn new(required: impl IntoIterator<Item = RequiredVariable>) -> Self {
        Self {
            required: required.into_iter().collect(),
        }
    }

    pub fn required(&self) -> &[RequiredVariable] {
        &self.required
    }

    /// Recompute every problem from the snapshot's current state.
    pub fn deployment_problems(&self, snapshot: &StageSnapshot) -> DeploymentProblems {
        let mut problems = DeploymentProblems::new();
        self.check_roles(snapshot, &mut problems);
        self.check_variables(snapshot, &mut problems);
        problems
    }

    pub fn is_deployment_possible(&self, snapshot: &StageSnapshot) -> bool {
        self.deployment_problems(snapshot).is_empty()
    }

    fn check_roles(&self, snapshot: &StageSnapshot, problems: &mut DeploymentProblems) {
        if snapshot.roles.is_empty() {
            problems.add(
                ROLES_PROBLEM,
                "no hosts are present. You need at least one host.",
            );
        }
    }

    fn check_variables(&self, snapshot: &StageSnapshot, problems: &mut DeploymentProblems) {
        let resolver = snapshot.resolver();
        for variable in &self.required {
            let set = resolver
                .lookup(&variable.name)
                .is_some_and(|p| !p.is_blank());
            if !set {
                problems.add(variable.name.clone(), variable.problem());
            }
        }
    }
}
