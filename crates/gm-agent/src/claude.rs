//! The concrete `AgentBackend` that shells out to the external coding-agent
//! CLI (spec §6, "External coding-agent CLI"): a command named e.g. `claude`
//! accepting an allow-list of tools and a prompt flag.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use gm_core::agent::{
    AgentBackend, AgentRequest, AgentRunResult, AgentUsage, KillMode, LineSink, StreamKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Tool allow-list passed to every invocation, per spec §6.
const ALLOWED_TOOLS: &str = "Edit,Write,Bash,Read,Glob,Grep";

/// Runs the external coding-agent CLI as a subprocess in `request.cwd`,
/// streaming its NDJSON output back line-by-line and cooperating with the
/// caller's cancellation/timeout signals.
pub struct ClaudeBackend {
    /// Path to the `claude` CLI binary.
    pub claude_bin: String,
}

impl ClaudeBackend {
    pub fn new(claude_bin: impl Into<String>) -> Self {
        Self {
            claude_bin: claude_bin.into(),
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: Option<u32>) {
    if let Some(pid) = pid {
        // SAFETY: pid comes from `Child::id()` of a still-running child; sending
        // a signal to a process we own is safe.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: Option<u32>) {}

#[async_trait]
impl AgentBackend for ClaudeBackend {
    async fn run(&self, request: AgentRequest, lines: Option<LineSink>) -> Result<AgentRunResult> {
        let fut = run_once(&self.claude_bin, request.clone(), lines);
        match request.timeout {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(cwd = %request.cwd, timeout_s = d.as_secs(), "claude subprocess timed out");
                    Ok(AgentRunResult {
                        success: false,
                        exit_code: None,
                        stdout: String::new(),
                        session_id: None,
                        usage: AgentUsage::default(),
                        timed_out: true,
                    })
                }
            },
            None => fut.await,
        }
    }
}

/// Spawn the subprocess and drive it to completion: stream stdout/stderr
/// lines to `lines` as they arrive, honor `request.kill` transitions
/// (SIGTERM then escalate to a forceful kill), and parse the NDJSON stream
/// for its distilled output, session id, and usage/cost fields.
async fn run_once(
    claude_bin: &str,
    request: AgentRequest,
    lines: Option<LineSink>,
) -> Result<AgentRunResult> {
    let mut cmd = Command::new(claude_bin);
    cmd.arg("--allowedTools")
        .arg(ALLOWED_TOOLS)
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose")
        .arg("-p")
        .arg(&request.prompt)
        .current_dir(&request.cwd)
        .kill_on_drop(true)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (k, v) in &request.env {
        cmd.env(k, v);
    }

    info!(cwd = %request.cwd, "spawning claude subprocess");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {claude_bin}"))?;
    let pid = child.id();

    let stdout = child.stdout.take().context("failed to take stdout")?;
    let stderr = child.stderr.take().context("failed to take stderr")?;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    let mut raw_stdout = String::new();
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut kill_rx = request.kill;

    let exit_status = loop {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line.context("error reading claude stdout")? {
                    Some(l) => {
                        if let Some(tx) = &lines {
                            let _ = tx.send((StreamKind::Stdout, l.clone()));
                        }
                        raw_stdout.push_str(&l);
                        raw_stdout.push('\n');
                    }
                    None => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(l)) => {
                        if let Some(tx) = &lines {
                            let _ = tx.send((StreamKind::Stderr, l));
                        }
                    }
                    _ => stderr_done = true,
                }
            }
            changed = watch_kill(&mut kill_rx), if kill_rx.is_some() => {
                if changed {
                    let mode = kill_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(KillMode::Running);
                    match mode {
                        KillMode::Terminate => send_sigterm(pid),
                        KillMode::Kill => {
                            let _ = child.start_kill();
                        }
                        KillMode::Running => {}
                    }
                }
            }
            status = child.wait() => {
                break status.context("failed to wait for claude subprocess")?;
            }
        }
    };

    // Drain whatever buffered output remains after exit.
    while let Ok(Some(l)) = stdout_lines.next_line().await {
        if let Some(tx) = &lines {
            let _ = tx.send((StreamKind::Stdout, l.clone()));
        }
        raw_stdout.push_str(&l);
        raw_stdout.push('\n');
    }
    while let Ok(Some(l)) = stderr_lines.next_line().await {
        if let Some(tx) = &lines {
            let _ = tx.send((StreamKind::Stderr, l));
        }
    }

    let (output, session_id) = crate::event::parse_stream(&raw_stdout);
    let usage = crate::event::parse_usage(&raw_stdout);

    info!(
        success = exit_status.success(),
        session_id = ?session_id,
        "claude subprocess finished"
    );

    Ok(AgentRunResult {
        success: exit_status.success(),
        exit_code: exit_status.code(),
        stdout: output,
        session_id,
        usage: AgentUsage {
            cost_usd: usage.cost_usd,
            duration_ms: usage.duration_ms,
            num_turns: usage.num_turns,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        },
        timed_out: false,
    })
}

/// Await the next change on an optional kill-watch channel; never resolves
/// when there is none, so the `select!` branch above is simply disabled.
async fn watch_kill(kill_rx: &mut Option<gm_core::agent::KillWatch>) -> bool {
    match kill_rx {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_surfaces_a_spawn_error() {
        let backend = ClaudeBackend::new("/nonexistent/claude-binary-xyz");
        let request = AgentRequest {
            prompt: "do nothing".to_string(),
            cwd: std::env::temp_dir().to_string_lossy().into_owned(),
            env: Vec::new(),
            timeout: None,
            kill: None,
        };
        let result = backend.run(request, None).await;
        assert!(result.is_err());
    }
}
