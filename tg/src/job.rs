//! Job and cluster files for the `tg` command line
//!
//! A job file lists shell commands as work items; a cluster file lists nodes
//! and the tasks to place on them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Priority, WorkItem};
use crate::placement::Resources;
use crate::scheduler::ItemDefaults;

/// Output of a shell command that exited successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One shell command in a job file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub id: String,

    pub command: String,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default, rename = "depends-on")]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub retries: Option<u32>,

    #[serde(default, rename = "retry-delay-ms")]
    pub retry_delay_ms: Option<u64>,

    #[serde(default, rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

impl JobItem {
    /// Build a work item running `sh -c <command>` in `dir`
    ///
    /// Unset policy fields fall back to `defaults`.
    pub fn to_work_item(&self, defaults: &ItemDefaults, dir: &Path) -> WorkItem<CommandOutput> {
        let command = self.command.clone();
        let dir = dir.to_path_buf();

        let mut policy = defaults.policy();
        if let Some(retries) = self.retries {
            policy.retries = retries;
        }
        if let Some(delay) = self.retry_delay_ms {
            policy.retry_delay = Duration::from_millis(delay);
        }
        if let Some(timeout) = self.timeout_ms {
            policy.timeout = Some(Duration::from_millis(timeout));
        }

        WorkItem::new(self.id.clone(), move || run_shell(command.clone(), dir.clone()))
            .with_priority(self.priority)
            .with_dependencies(self.depends_on.iter().cloned())
            .with_policy(policy)
    }
}

/// Run one shell command; a non-zero exit is an error
pub async fn run_shell(command: String, dir: PathBuf) -> Result<CommandOutput> {
    debug!(%command, ?dir, "run_shell: called");
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(&dir)
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("Failed to execute command: {}", command))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

    if output.status.success() {
        debug!(%command, "run_shell: command succeeded");
        Ok(CommandOutput { stdout, stderr })
    } else {
        let code = output.status.code().unwrap_or(-1);
        debug!(%command, code, "run_shell: command failed");
        if stderr.is_empty() {
            Err(eyre::eyre!("Exit code: {}", code))
        } else {
            Err(eyre::eyre!("Exit code: {}: {}", code, stderr))
        }
    }
}

/// A set of shell commands to schedule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub items: Vec<JobItem>,

    /// Directory commands run in; the job file's directory when loaded
    #[serde(skip)]
    pub dir: PathBuf,
}

impl JobFile {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(?path, "JobFile::load: called");
        let content = fs::read_to_string(path).context(format!("Failed to read job file {}", path.display()))?;
        let mut job: Self =
            serde_yaml::from_str(&content).context(format!("Failed to parse job file {}", path.display()))?;

        job.dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(job)
    }

    pub fn work_items(&self, defaults: &ItemDefaults) -> Vec<WorkItem<CommandOutput>> {
        self.items.iter().map(|item| item.to_work_item(defaults, &self.dir)).collect()
    }
}

/// A node in a cluster file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,

    #[serde(default)]
    pub capabilities: Resources,
}

/// A task to place in a cluster file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,

    #[serde(default)]
    pub requirements: Resources,

    /// Mark the task finished right after placing it
    #[serde(default)]
    pub complete: bool,
}

/// Nodes to register and tasks to place, in order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterFile {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,

    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

impl ClusterFile {
    pub fn load(path: &Path) -> Result<Self> {
        debug!(?path, "ClusterFile::load: called");
        let content =
            fs::read_to_string(path).context(format!("Failed to read cluster file {}", path.display()))?;
        serde_yaml::from_str(&content).context(format!("Failed to parse cluster file {}", path.display()))
    }
}
