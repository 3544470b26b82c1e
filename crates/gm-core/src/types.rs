use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a General Manager project, per the pipeline's state-machine DAG.
///
/// `Building` and `Testing` are only entered when the project declared the
/// corresponding command; `Failed` is reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Created,
    Launching,
    Waiting,
    Analyzing,
    Merging,
    Building,
    Testing,
    Completed,
    Failed,
}

impl ProjectPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectPhase::Created => "created",
            ProjectPhase::Launching => "launching",
            ProjectPhase::Waiting => "waiting",
            ProjectPhase::Analyzing => "analyzing",
            ProjectPhase::Merging => "merging",
            ProjectPhase::Building => "building",
            ProjectPhase::Testing => "testing",
            ProjectPhase::Completed => "completed",
            ProjectPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectPhase::Completed | ProjectPhase::Failed)
    }

    pub fn from_str_or(s: &str, default: ProjectPhase) -> ProjectPhase {
        match s {
            "created" => ProjectPhase::Created,
            "launching" => ProjectPhase::Launching,
            "waiting" => ProjectPhase::Waiting,
            "analyzing" => ProjectPhase::Analyzing,
            "merging" => ProjectPhase::Merging,
            "building" => ProjectPhase::Building,
            "testing" => ProjectPhase::Testing,
            "completed" => ProjectPhase::Completed,
            "failed" => ProjectPhase::Failed,
            _ => default,
        }
    }
}

/// One `{team, task}` entry in a project's agent list, as declared in
/// `gm_projects.<name>.agents` of the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSpec {
    pub team: String,
    pub task: String,
}

/// A run of the General Manager pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_path: String,
    pub build_command: Option<String>,
    pub test_command: Option<String>,
    pub phase: ProjectPhase,
    pub agent_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub merged_count: i64,
    pub build_attempts: i64,
    pub test_attempts: i64,
    pub merge_order: Vec<String>,
    pub current_merge: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of one agent session, per the data model's Agent Session entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_or(s: &str, default: SessionStatus) -> SessionStatus {
        match s {
            "pending" => SessionStatus::Pending,
            "running" => SessionStatus::Running,
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            "cancelled" => SessionStatus::Cancelled,
            _ => default,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

/// Outcome of attempting to merge one session's branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeResult {
    Merged,
    MergedResolved,
    Skipped,
}

impl MergeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeResult::Merged => "merged",
            MergeResult::MergedResolved => "merged_resolved",
            MergeResult::Skipped => "skipped",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<MergeResult> {
        match s {
            "merged" => Some(MergeResult::Merged),
            "merged_resolved" => Some(MergeResult::MergedResolved),
            "skipped" => Some(MergeResult::Skipped),
            _ => None,
        }
    }
}

/// One coding-agent subprocess executing one task, for one project
/// (or standalone, when `project_id` is `None`).
#[derive(Debug, Clone, Serialize)]
pub struct AgentSession {
    pub session_id: String,
    pub project_id: Option<String>,
    pub team_name: String,
    pub task: String,
    pub status: SessionStatus,
    pub repo_path: String,
    pub branch: Option<String>,
    pub worktree_path: Option<String>,
    pub output_filename: Option<String>,
    pub files_changed: Vec<String>,
    pub merge_order_index: Option<i64>,
    pub merge_result: Option<MergeResult>,
    pub cost_usd: Option<f64>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Log level, per the append-only Log Entry entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: Option<String>,
}

/// A pending operator choice. Not driven by the pipeline itself today —
/// reserved for a future human-in-the-loop gate such as "approve this merge
/// order before proceeding".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionGate {
    pub id: i64,
    pub project_id: String,
    pub kind: String,
    pub payload: String,
    pub status: DecisionStatus,
}

/// Aggregate statistics over historical agent sessions, per the persistence
/// store's aggregate-statistics operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub total_executions: i64,
    pub total_agents_run: i64,
    pub success_rate: f64,
    pub total_cost: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

/// Cost broken down by the requested dimensions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostBreakdown {
    pub total_cost: f64,
    pub by_team: std::collections::HashMap<String, f64>,
    pub by_day: std::collections::HashMap<String, f64>,
}

/// Input to `Pipeline::launch_project`: what to build, and how to check it.
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub name: String,
    pub repo_path: String,
    pub build_command: Option<String>,
    pub test_command: Option<String>,
    pub agents: Vec<AgentSpec>,
}

impl From<(&str, GmProjectTemplate)> for ProjectSpec {
    fn from((name, t): (&str, GmProjectTemplate)) -> Self {
        ProjectSpec {
            name: name.to_string(),
            repo_path: t.repo_path,
            build_command: t.build_command,
            test_command: t.test_command,
            agents: t.agents,
        }
    }
}

/// A `gm_projects.<name>` template read from the declarative config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GmProjectTemplate {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

/// A `teams.definitions.<name>` template read from the declarative config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TeamTemplate {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub teammates: Vec<TeammateSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TeammateSpec {
    #[serde(default)]
    pub name: String,
}
