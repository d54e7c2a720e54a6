//! Stages and the entities they own.
//!
//! A stage is a named deployment target inside a project. It is bound to hosts
//! through roles, carries stage-level configuration overrides, is associated
//! with recipes, and can be locked by a single in-flight deployment.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::configuration::{ConfigurationParameter, ConfigurationResolver};
use crate::id::{DeploymentId, HostId, ProjectId, RecipeId, RoleId, StageId};
use crate::validation::{self, ValidationErrors};

static ACRONYM_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z\d]+)([A-Z][a-z])").unwrap());
static WORD_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z\d])([A-Z])").unwrap());
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\-_]").unwrap());

/// A project groups stages and holds project-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A machine that roles deploy to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A reusable deployment recipe. Stages only reference recipes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Binding of a stage to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub stage_id: StageId,
    pub host_id: HostId,
    /// Role name as used by recipes (`app`, `web`, `db`, ...).
    pub name: String,
    pub primary: bool,
    pub no_release: bool,
    pub no_symlink: bool,
    pub ssh_port: Option<u16>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub host_id: HostId,
    pub primary: bool,
    pub no_release: bool,
    pub no_symlink: bool,
    pub ssh_port: Option<u16>,
}

impl NewRole {
    pub fn new(name: impl Into<String>, host_id: HostId) -> Self {
        Self {
            name: name.into(),
            host_id,
            primary: false,
            no_release: false,
            no_symlink: false,
            ssh_port: None,
        }
    }
}

impl From<&Role> for NewRole {
    fn from(role: &Role) -> Self {
        Self {
            name: role.name.clone(),
            host_id: role.host_id,
            primary: role.primary,
            no_release: role.no_release,
            no_symlink: role.no_symlink,
            ssh_port: role.ssh_port,
        }
    }
}

/// Observable lock state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LockState {
    Unlocked,
    /// `owner` is `None` between claiming the lock and attaching the deployment.
    Locked { owner: Option<DeploymentId> },
}

/// A deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub project_id: ProjectId,
    pub name: String,
    /// Space-separated notification addresses.
    pub alert_emails: Option<String>,
    pub locked: bool,
    pub locked_by_deployment_id: Option<DeploymentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stage {
    /// Alert addresses split on runs of whitespace.
    pub fn emails(&self) -> Vec<String> {
        self.alert_emails
            .as_deref()
            .map(|emails| emails.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    /// The stage name in a form safe for filenames and recipe identifiers.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn lock_state(&self) -> LockState {
        if self.locked {
            LockState::Locked {
                owner: self.locked_by_deployment_id,
            }
        } else {
            LockState::Unlocked
        }
    }
}

/// Input for creating a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStage {
    pub project_id: ProjectId,
    pub name: String,
    pub alert_emails: Option<String>,
}

impl NewStage {
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            project_id,
            name: name.into(),
            alert_emails: None,
        }
    }

    pub fn with_alert_emails(mut self, alert_emails: impl Into<String>) -> Self {
        self.alert_emails = Some(alert_emails.into());
        self
    }

    /// Pre-fill from `source` before a clone: name and alert addresses only.
    pub fn prepare_cloning(&mut self, source: &Stage) {
        self.name = format!("Clone of {}", source.name);
        self.alert_emails = source.alert_emails.clone();
    }

    /// Field checks that do not need the store. Name uniqueness is checked on insert.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validation::validate_stage_name(&self.name, &mut errors);
        validation::validate_alert_emails(self.alert_emails.as_deref(), &mut errors);
        errors.into_result()
    }
}

/// Lower-snake-case `name`, with anything outside `[a-zA-Z0-9_-]` replaced by `_`.
pub fn normalize_name(name: &str) -> String {
    let name = name.replace("::", "/");
    let name = ACRONYM_BOUNDARY.replace_all(&name, "${1}_${2}");
    let name = WORD_BOUNDARY.replace_all(&name, "${1}_${2}");
    let name = name.replace('-', "_").to_lowercase();
    UNSAFE_CHARS.replace_all(&name, "_").into_owned()
}

/// A stage loaded together with everything the deployment path reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    /// Project-level parameters, ordered by name.
    pub project_parameters: Vec<ConfigurationParameter>,
    /// Stage-level parameters, ordered by name.
    pub parameters: Vec<ConfigurationParameter>,
    /// Ordered by name.
    pub roles: Vec<Role>,
    pub recipes: Vec<Recipe>,
}

impl StageSnapshot {
    pub fn resolver(&self) -> ConfigurationResolver<'_> {
        ConfigurationResolver::new(&self.project_parameters, &self.parameters)
    }

    pub fn effective_configuration(&self) -> Vec<&ConfigurationParameter> {
        self.resolver().effective()
    }

    pub fn effective_parameter(&self, key: &str) -> Option<&ConfigurationParameter> {
        self.resolver().lookup(key)
    }

    pub fn prompt_configurations(&self) -> Vec<&ConfigurationParameter> {
        self.resolver().prompt_configurations()
    }

    pub fn non_prompt_configurations(&self) -> Vec<&ConfigurationParameter> {
        self.resolver().non_prompt_configurations()
    }

    /// Distinct hosts reachable through the roles, in role order.
    pub fn hosts(&self) -> Vec<HostId> {
        let mut seen = HashSet::new();
        self.roles
            .iter()
            .map(|r| r.host_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}
