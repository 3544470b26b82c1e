//! The seam between the General Manager and whatever coding-agent CLI it
//! shells out to (spec §6, "External coding-agent CLI").

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Which stream a line of subprocess output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Channel a backend uses to stream output lines back to its caller as they
/// arrive, tagged by stream. The receiving end decides what to do with them
/// (publish as progress events, scan for resource-exhaustion patterns, ...).
pub type LineSink = mpsc::UnboundedSender<(StreamKind, String)>;

/// Requested subprocess disposition, driven by the launcher's cancellation
/// and resource-exhaustion watchdog. A backend's `run` implementation must
/// poll this alongside its I/O select loop and act on transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    Running,
    /// Graceful termination requested (SIGTERM).
    Terminate,
    /// Escalate to a forceful kill (SIGKILL).
    Kill,
}

pub type KillSwitch = tokio::sync::watch::Sender<KillMode>;
pub type KillWatch = tokio::sync::watch::Receiver<KillMode>;

/// One invocation of the external coding-agent CLI.
#[derive(Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub cwd: String,
    /// Extra environment variables layered on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Wall-clock timeout; `None` means no limit.
    pub timeout: Option<std::time::Duration>,
    /// Watched by the backend to support cooperative cancellation.
    pub kill: Option<KillWatch>,
}

/// Usage/cost fields parsed from the backend's final NDJSON result event, if
/// the backend reports them.
#[derive(Debug, Clone, Default)]
pub struct AgentUsage {
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Outcome of a single `AgentBackend::run` call.
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Full captured stdout (for agents that emit structured output, this is
    /// already distilled to the final textual result).
    pub stdout: String,
    pub session_id: Option<String>,
    pub usage: AgentUsage,
    /// Set when the caller's timeout elapsed before the subprocess exited.
    pub timed_out: bool,
}

/// One coding-agent subprocess invocation. Implementations own process
/// spawn/stream/wait; the launcher and pipeline only see requests/results.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, request: AgentRequest, lines: Option<LineSink>) -> Result<AgentRunResult>;
}
