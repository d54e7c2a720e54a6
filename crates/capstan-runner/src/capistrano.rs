//! Shelling out to `cap -T`.

use async_trait::async_trait;
use capstan_core::tasks::{TaskDescriptor, TaskRunner, TaskRunnerError};
use capstan_core::{Deployment, StageSnapshot};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs a `cap`-style binary with the stage's configuration as `-s` settings.
#[derive(Debug, Clone)]
pub struct CapistranoRunner {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CapistranoRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Arguments placed before the generated ones.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full argument list for listing the tasks of `stage`.
    pub fn task_list_args(&self, stage: &StageSnapshot) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("-s".to_string());
        args.push(format!("stage={}", stage.stage.normalized_name()));
        // Prompted values are not known until deploy time.
        for parameter in stage.non_prompt_configurations() {
            args.push("-s".to_string());
            args.push(format!("{}={}", parameter.name, parameter.value));
        }
        args.push("-T".to_string());
        args
    }
}

#[async_trait]
impl TaskRunner for CapistranoRunner {
    fn name(&self) -> &'static str {
        "capistrano"
    }

    async fn list_tasks(
        &self,
        deployment: &Deployment,
        stage: &StageSnapshot,
    ) -> Result<Vec<TaskDescriptor>, TaskRunnerError> {
        let args = self.task_list_args(stage);
        debug!(
            stage_id = %deployment.stage_id,
            program = %self.program,
            args = args.len(),
            "Listing tasks"
        );

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| TaskRunnerError::Timeout(self.timeout))?
            .map_err(|e| TaskRunnerError::Spawn(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(TaskRunnerError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let tasks = parse_task_list(&String::from_utf8_lossy(&output.stdout));
        info!(stage_id = %deployment.stage_id, count = tasks.len(), "Loaded tasks");
        Ok(tasks)
    }
}

/// Parse `cap -T` output. Only `cap <task>  # <description>` lines count.
pub fn parse_task_list(stdout: &str) -> Vec<TaskDescriptor> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("cap "))
        .filter_map(|rest| {
            let (name, description) = match rest.split_once('#') {
                Some((name, description)) => (name.trim(), description.trim()),
                None => (rest.trim(), ""),
            };
            if name.is_empty() || name.starts_with('-') {
                None
            } else {
                Some(TaskDescriptor::new(name, description))
            }
        })
        .collect()
}
