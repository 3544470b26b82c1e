//! Progress events published over the Event Bus (spec §6, §9): explicit sum
//! types rather than runtime-keyed payloads, so subscribers pattern-match.

use serde::Serialize;

/// `{type: "gm_progress", project_id, event, ...}` — one project's pipeline
/// events, per spec §6.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GmEvent {
    ProjectStarted,
    PhaseChange { phase: String },
    AgentLaunched { session_id: String, team: String },
    AgentCompleted { session_id: String, status: String },
    MergeOrderDetermined { order: Vec<String>, scores: Vec<(String, i64)> },
    MergeStarted { session_id: String },
    MergeConflict { session_id: String, error: String },
    ConflictResolved { session_id: String },
    MergeCompleted { session_id: String, skipped: bool, resolved: bool },
    BuildStarted,
    BuildResult { success: bool, tail_output: String },
    BuildFixAttempt { attempt: u32, success: bool },
    TestStarted,
    TestResult { success: bool, tail_output: String },
    TestFixAttempt { attempt: u32, success: bool },
    ProjectCompleted,
    ProjectFailed { reason: String },
}

/// Envelope carrying a `GmEvent` plus the project it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct GmProgress {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub project_id: String,
    #[serde(flatten)]
    pub event: GmEvent,
}

impl GmProgress {
    pub fn new(project_id: impl Into<String>, event: GmEvent) -> Self {
        Self {
            kind: "gm_progress",
            project_id: project_id.into(),
            event,
        }
    }
}

/// `{type: "team_progress", session_id, event, ...}` — one agent session's
/// events, per spec §6. Ordering invariant: `Started` precedes any `Stdout`
/// / `Stderr`, which precede `Completed` (or `Cancelled`/`ResourceError`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TeamEvent {
    Started,
    Stdout { line: String },
    Stderr { line: String },
    ResourceError { pattern: String },
    Cancelled,
    Completed { status: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamProgress {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub session_id: String,
    #[serde(flatten)]
    pub event: TeamEvent,
}

impl TeamProgress {
    pub fn new(session_id: impl Into<String>, event: TeamEvent) -> Self {
        Self {
            kind: "team_progress",
            session_id: session_id.into(),
            event,
        }
    }
}

/// In-process best-effort publish/subscribe of the two event classes above
/// (spec §2 component E). Backed by `tokio::sync::broadcast`: a slow
/// subscriber that falls behind the channel's capacity sees `Lagged` on its
/// next `recv` rather than blocking the publisher — exactly the "drop on
/// full, don't block" backpressure policy spec §5 calls for.
pub struct EventBus {
    gm_tx: tokio::sync::broadcast::Sender<GmProgress>,
    team_tx: tokio::sync::broadcast::Sender<TeamProgress>,
}

impl EventBus {
    pub fn new() -> Self {
        let (gm_tx, _) = tokio::sync::broadcast::channel(1024);
        let (team_tx, _) = tokio::sync::broadcast::channel(4096);
        Self { gm_tx, team_tx }
    }

    pub fn publish_gm(&self, project_id: &str, event: GmEvent) {
        let _ = self.gm_tx.send(GmProgress::new(project_id, event));
    }

    pub fn publish_team(&self, session_id: &str, event: TeamEvent) {
        let _ = self.team_tx.send(TeamProgress::new(session_id, event));
    }

    pub fn subscribe_gm(&self) -> tokio::sync::broadcast::Receiver<GmProgress> {
        self.gm_tx.subscribe()
    }

    pub fn subscribe_team(&self) -> tokio::sync::broadcast::Receiver<TeamProgress> {
        self.team_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
