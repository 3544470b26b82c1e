//! Agent Session Launcher (spec §4.3): spawns one coding-agent subprocess
//! per task inside a fresh worktree, streams its output, watches for
//! resource exhaustion, auto-commits on exit, and publishes progress events.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{AgentBackend, AgentRequest, KillMode, LineSink, StreamKind};
use crate::config::Config;
use crate::db::Db;
use crate::events::{EventBus, TeamEvent};
use crate::git::Git;
use crate::types::{AgentSession, SessionStatus};
use crate::worktree::WorktreeManager;

/// Stderr substrings the watchdog treats as critical resource exhaustion.
/// Matched case-insensitively; each pattern is counted independently.
const RESOURCE_PATTERNS: &[&str] = &[
    "no space left on device",
    "out of memory",
    "cannot allocate memory",
    "quota exceeded",
    "disk quota exceeded",
];

fn matched_pattern(line: &str) -> Option<&'static str> {
    let lower = line.to_lowercase();
    RESOURCE_PATTERNS.iter().find(|p| lower.contains(*p)).copied()
}

/// Live bookkeeping for a session whose subprocess may still be running.
struct LiveSession {
    kill: watch::Sender<KillMode>,
}

pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}-{}", Utc::now().timestamp_millis(), &Uuid::new_v4().simple().to_string()[..8])
}

pub struct Launcher {
    db: Arc<Db>,
    events: Arc<EventBus>,
    config: Arc<Config>,
    backend: Arc<dyn AgentBackend>,
    live: Mutex<HashMap<String, LiveSession>>,
}

/// Outcome of a successful `launch`.
pub struct LaunchOutcome {
    pub session_id: String,
    pub branch: String,
    pub worktree_path: String,
}

impl Launcher {
    pub fn new(db: Arc<Db>, events: Arc<EventBus>, config: Arc<Config>, backend: Arc<dyn AgentBackend>) -> Self {
        Self {
            db,
            events,
            config,
            backend,
            live: Mutex::new(HashMap::new()),
        }
    }

    /// `launch(team_name, task, repo_path?)`.
    ///
    /// Creates the worktree, persists a `running` session row, spawns the
    /// subprocess, and detaches its stream-and-finish task. Returns as soon
    /// as the subprocess has been started.
    pub async fn launch(
        self: &Arc<Self>,
        project_id: Option<&str>,
        team_name: &str,
        task: &str,
        repo_path: Option<&str>,
    ) -> Result<LaunchOutcome> {
        let sid = generate_id("sess");
        let repo = repo_path.unwrap_or(&self.config.default_repo_path).to_string();

        let wt_mgr = WorktreeManager::new(repo.clone());
        let wt = wt_mgr
            .create(&sid)
            .with_context(|| format!("create worktree for session {sid}"))?;

        let now = Utc::now();
        let session = AgentSession {
            session_id: sid.clone(),
            project_id: project_id.map(|s| s.to_string()),
            team_name: team_name.to_string(),
            task: task.to_string(),
            status: SessionStatus::Running,
            repo_path: repo.clone(),
            branch: Some(wt.branch.clone()),
            worktree_path: Some(wt.path.clone()),
            output_filename: None,
            files_changed: Vec::new(),
            merge_order_index: None,
            merge_result: None,
            cost_usd: None,
            input_tokens: None,
            output_tokens: None,
            started_at: now,
            completed_at: None,
        };
        self.db.insert_session(&session).context("insert session row")?;

        let (kill_tx, kill_rx) = watch::channel(KillMode::Running);
        self.live.lock().await.insert(
            sid.clone(),
            LiveSession { kill: kill_tx },
        );

        self.events.publish_team(&sid, TeamEvent::Started);

        let this = Arc::clone(self);
        let team = team_name.to_string();
        let task_owned = task.to_string();
        let worktree_path = wt.path.clone();
        let sid_task = sid.clone();
        tokio::spawn(async move {
            this.stream_and_finish(&sid_task, &team, &task_owned, &repo, &worktree_path, kill_rx)
                .await;
        });

        Ok(LaunchOutcome {
            session_id: sid,
            branch: wt.branch,
            worktree_path: wt.path,
        })
    }

    /// Build the prompt, set environment overrides, run the backend to
    /// completion while watching stderr for resource exhaustion, auto-commit
    /// the worktree, write the session artifact, and persist the final
    /// status. Runs as a detached task per session.
    async fn stream_and_finish(
        &self,
        sid: &str,
        team: &str,
        task: &str,
        repo: &str,
        worktree_path: &str,
        kill_rx: watch::Receiver<KillMode>,
    ) {
        let prompt = crate::prompt::build_task_prompt(team, task);
        let mut env = vec![(
            "CLAUDE_CODE_EXPERIMENTAL_AGENT_TEAMS".to_string(),
            "1".to_string(),
        )];
        let build_output_dir = if std::path::Path::new(repo).join("Cargo.toml").exists() {
            let dir = format!("{}/.gm-build-cache", repo.trim_end_matches('/'));
            env.push(("CARGO_TARGET_DIR".to_string(), dir.clone()));
            Some(dir)
        } else {
            None
        };

        let request = AgentRequest {
            prompt,
            cwd: worktree_path.to_string(),
            env,
            timeout: None,
            kill: Some(kill_rx),
        };

        let (line_tx, mut line_rx): (LineSink, _) = mpsc::unbounded_channel();
        let events = &self.events;
        let sid_owned = sid.to_string();
        let watchdog_kill = {
            let live = self.live.lock().await;
            live.get(sid).map(|l| l.kill.clone())
        };
        let resource_kill_threshold = self.config.tuning.resource_kill_threshold;

        let watcher = tokio::spawn({
            let sid_owned = sid_owned.clone();
            let watchdog_kill = watchdog_kill.clone();
            async move {
                let mut counts: HashMap<&'static str, u32> = HashMap::new();
                let mut killed_for_resources = false;
                while let Some((kind, line)) = line_rx.recv().await {
                    match kind {
                        StreamKind::Stdout => {
                            events.publish_team(&sid_owned, TeamEvent::Stdout { line: line.clone() });
                        }
                        StreamKind::Stderr => {
                            events.publish_team(&sid_owned, TeamEvent::Stderr { line: line.clone() });
                            if let Some(pattern) = matched_pattern(&line) {
                                let count = counts.entry(pattern).or_insert(0);
                                *count += 1;
                                if *count >= resource_kill_threshold && !killed_for_resources {
                                    killed_for_resources = true;
                                    warn!(session_id = %sid_owned, pattern, "resource exhaustion threshold reached, killing session");
                                    if let Some(kill) = &watchdog_kill {
                                        let _ = kill.send(KillMode::Kill);
                                    }
                                    events.publish_team(
                                        &sid_owned,
                                        TeamEvent::ResourceError { pattern: pattern.to_string() },
                                    );
                                }
                            }
                        }
                    }
                }
                killed_for_resources
            }
        });

        let run_result = self.backend.run(request, Some(line_tx)).await;
        let killed_for_resources = watcher.await.unwrap_or(false);

        let (success, exit_code, stdout, usage) = match run_result {
            Ok(r) => (r.success && !killed_for_resources, r.exit_code, r.stdout, r.usage),
            Err(e) => {
                warn!(session_id = %sid, error = %e, "agent backend returned an error");
                (false, None, String::new(), Default::default())
            }
        };

        // Auto-commit whatever the agent changed.
        let git = Git::new(repo.to_string());
        let commit_message = format!("feat: {team} session {sid}");
        match git_commit_worktree(&git, worktree_path, &commit_message) {
            Ok(committed) => {
                if committed {
                    info!(session_id = %sid, "auto-committed session changes");
                }
            }
            Err(e) => warn!(session_id = %sid, error = %e, "auto-commit failed"),
        }

        if let Some(dir) = build_output_dir {
            let _ = std::fs::remove_dir_all(&dir);
        }

        let final_status = if success {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed
        };

        if let Err(e) = self.db.set_session_status(sid, final_status) {
            warn!(session_id = %sid, error = %e, "failed to persist session status");
        }
        if usage.cost_usd.is_some() || usage.input_tokens.is_some() {
            let _ = self.db.set_session_usage(
                sid,
                usage.cost_usd.unwrap_or(0.0),
                usage.input_tokens.unwrap_or(0) as i64,
                usage.output_tokens.unwrap_or(0) as i64,
            );
        }

        let artifact_name = format!("teams-{sid}.json");
        if let Err(e) = write_artifact(
            &self.config.outputs_dir,
            &artifact_name,
            sid,
            team,
            final_status,
            exit_code,
            &stdout,
        ) {
            warn!(session_id = %sid, error = %e, "failed to write session artifact");
        } else if let Err(e) = self.db.set_session_output_filename(sid, &artifact_name) {
            warn!(session_id = %sid, error = %e, "failed to persist output filename");
        }

        self.events.publish_team(
            sid,
            TeamEvent::Completed {
                status: final_status.as_str().to_string(),
            },
        );

        self.live.lock().await.remove(sid);
    }

    /// `cancel(sid)`: SIGTERM, escalate to SIGKILL after the grace period,
    /// mark the session cancelled.
    pub async fn cancel(&self, sid: &str) -> Result<()> {
        self.cancel_with_grace(sid, self.config.tuning.cancel_grace_s).await
    }

    async fn cancel_with_grace(&self, sid: &str, grace_s: u64) -> Result<()> {
        let kill = {
            let live = self.live.lock().await;
            live.get(sid).map(|l| l.kill.clone())
        };
        let Some(kill) = kill else {
            return Ok(());
        };
        let _ = kill.send(KillMode::Terminate);
        tokio::time::sleep(std::time::Duration::from_secs(grace_s)).await;
        // Still live after the grace period: escalate.
        if self.live.lock().await.contains_key(sid) {
            let _ = kill.send(KillMode::Kill);
        }
        self.events.publish_team(sid, TeamEvent::Cancelled);
        self.db.set_session_status(sid, SessionStatus::Cancelled)?;
        Ok(())
    }

    /// `cancel_all()`: cancel every live session with a shorter grace period,
    /// for shutdown.
    pub async fn cancel_all(&self) {
        let sids: Vec<String> = self.live.lock().await.keys().cloned().collect();
        for sid in sids {
            if let Err(e) = self.cancel_with_grace(&sid, self.config.tuning.shutdown_grace_s).await {
                warn!(session_id = %sid, error = %e, "cancel_all: failed to cancel session");
            }
        }
    }

    pub async fn is_live(&self, sid: &str) -> bool {
        self.live.lock().await.contains_key(sid)
    }
}

fn git_commit_worktree(git: &Git, worktree_path: &str, message: &str) -> Result<bool> {
    let wt_git = Git::new(worktree_path.to_string());
    let _ = git; // host-repo handle unused here; commit happens in the worktree itself.
    wt_git.stage_all()?;
    wt_git.commit(message)
}

#[allow(clippy::too_many_arguments)]
fn write_artifact(
    outputs_dir: &str,
    filename: &str,
    session_id: &str,
    team_name: &str,
    status: SessionStatus,
    exit_code: Option<i32>,
    output: &str,
) -> Result<()> {
    std::fs::create_dir_all(outputs_dir).context("create outputs dir")?;
    let artifact = serde_json::json!({
        "session_id": session_id,
        "team_name": team_name,
        "status": status.as_str(),
        "exit_code": exit_code,
        "output": output,
        "completed_at": Utc::now().to_rfc3339(),
    });
    let path = std::path::Path::new(outputs_dir).join(filename);
    std::fs::write(path, serde_json::to_string_pretty(&artifact)?).context("write artifact file")
}
