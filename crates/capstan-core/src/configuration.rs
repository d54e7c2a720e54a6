//! Configuration parameters and the project/stage override resolution.
//!
//! A project carries defaults for all of its stages; a stage may override any
//! of them by defining a parameter with the same name. The effective set is
//! what a deployment of that stage actually sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::id::{ParameterId, ProjectId, StageId};

/// Where a parameter is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterScope {
    Project,
    Stage,
}

impl std::fmt::Display for ParameterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterScope::Project => write!(f, "project"),
            ParameterScope::Stage => write!(f, "stage"),
        }
    }
}

/// Owner of a configuration parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterOwner {
    Project(ProjectId),
    Stage(StageId),
}

/// A named configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationParameter {
    pub id: ParameterId,
    /// Case-sensitive key.
    pub name: String,
    pub value: String,
    /// Project the parameter belongs to. Stage parameters carry it too.
    pub project_id: ProjectId,
    /// Set for stage-level parameters.
    pub stage_id: Option<StageId>,
    /// Ask the operator for the value when deploying instead of using `value`.
    pub prompt_on_deploy: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigurationParameter {
    pub fn scope(&self) -> ParameterScope {
        if self.stage_id.is_some() {
            ParameterScope::Stage
        } else {
            ParameterScope::Project
        }
    }

    /// Whether the stored value is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// Input for creating or replacing a parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewParameter {
    pub name: String,
    pub value: String,
    pub prompt_on_deploy: bool,
}

impl NewParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            prompt_on_deploy: false,
        }
    }

    pub fn prompted(mut self) -> Self {
        self.prompt_on_deploy = true;
        self
    }
}

/// Merges project and stage parameters, stage values winning on name collision.
///
/// The resolver borrows both sets and never mutates them; every call recomputes
/// the effective set from what it was given.
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationResolver<'a> {
    project: &'a [ConfigurationParameter],
    stage: &'a [ConfigurationParameter],
}

impl<'a> ConfigurationResolver<'a> {
    pub fn new(project: &'a [ConfigurationParameter], stage: &'a [ConfigurationParameter]) -> Self {
        Self { project, stage }
    }

    /// The merged set, sorted by name ascending.
    pub fn effective(&self) -> Vec<&'a ConfigurationParameter> {
        let overridden: HashSet<&str> = self.stage.iter().map(|p| p.name.as_str()).collect();

        let mut effective: Vec<&'a ConfigurationParameter> = self
            .project
            .iter()
            .filter(|p| !overridden.contains(p.name.as_str()))
            .chain(self.stage.iter())
            .collect();

        effective.sort_by(|a, b| a.name.cmp(&b.name));
        effective
    }

    /// Look up a single effective parameter by exact name.
    pub fn lookup(&self, key: &str) -> Option<&'a ConfigurationParameter> {
        self.effective().into_iter().find(|p| p.name == key)
    }

    /// Effective parameters that must be prompted for at deploy time.
    pub fn prompt_configurations(&self) -> Vec<&'a ConfigurationParameter> {
        self.effective()
            .into_iter()
            .filter(|p| p.prompt_on_deploy)
            .collect()
    }

    /// Effective parameters whose stored value is used as-is.
    pub fn non_prompt_configurations(&self) -> Vec<&'a ConfigurationParameter> {
        self.effective()
            .into_iter()
            .filter(|p| !p.prompt_on_deploy)
            .collect()
    }
}
