//! General Manager Pipeline (spec §4.4): the per-project state machine that
//! drives *launching → waiting → analyzing → merging → building → testing →
//! completed/failed*.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::agent::{AgentBackend, AgentRequest};
use crate::config::Config;
use crate::db::Db;
use crate::events::{EventBus, GmEvent};
use crate::git::Git;
use crate::launcher::{generate_id, Launcher};
use crate::prompt::{build_build_fix_prompt, build_conflict_prompt, build_test_fix_prompt, tail_bytes};
use crate::types::{MergeResult, Project, ProjectPhase, ProjectSpec, SessionStatus};
use crate::worktree::{MergeOutcome, WorktreeManager};

const TAIL_BYTES: usize = 4096;

struct RunningProject {
    cancel: watch::Sender<bool>,
}

pub struct Pipeline {
    db: Arc<Db>,
    events: Arc<EventBus>,
    config: Arc<Config>,
    launcher: Arc<Launcher>,
    /// Used for one-shot repair agents (conflict resolution, build/test
    /// fixes) — these are *not* routed through the launcher's session
    /// bookkeeping, per spec §4.4 step 3.
    repair_backend: Arc<dyn AgentBackend>,
    running: Mutex<HashMap<String, RunningProject>>,
}

impl Pipeline {
    pub fn new(
        db: Arc<Db>,
        events: Arc<EventBus>,
        config: Arc<Config>,
        launcher: Arc<Launcher>,
        repair_backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            db,
            events,
            config,
            launcher,
            repair_backend,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Create the project row and spawn its dedicated pipeline task.
    pub async fn launch_project(self: &Arc<Self>, spec: ProjectSpec) -> Result<String> {
        let project_id = generate_id("proj");
        let project = Project {
            id: project_id.clone(),
            name: spec.name.clone(),
            repo_path: spec.repo_path.clone(),
            build_command: spec.build_command.clone(),
            test_command: spec.test_command.clone(),
            phase: ProjectPhase::Created,
            agent_count: 0,
            completed_count: 0,
            failed_count: 0,
            merged_count: 0,
            build_attempts: 0,
            test_attempts: 0,
            merge_order: Vec::new(),
            current_merge: None,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.db.insert_project(&project).context("insert project row")?;
        self.events.publish_gm(&project_id, GmEvent::ProjectStarted);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.running.lock().await.insert(
            project_id.clone(),
            RunningProject { cancel: cancel_tx },
        );

        let this = Arc::clone(self);
        let pid = project_id.clone();
        tokio::spawn(async move {
            if let Err(e) = this.run(&pid, spec, cancel_rx).await {
                error!(project_id = %pid, error = %e, "pipeline task exited with an unhandled error");
                let _ = this.db.set_project_failed(&pid, &e.to_string());
                this.events
                    .publish_gm(&pid, GmEvent::ProjectFailed { reason: e.to_string() });
            }
            this.running.lock().await.remove(&pid);
        });

        Ok(project_id)
    }

    fn set_phase(&self, project_id: &str, phase: ProjectPhase) -> Result<()> {
        self.db.set_project_phase(project_id, phase)?;
        self.events
            .publish_gm(project_id, GmEvent::PhaseChange { phase: phase.as_str().to_string() });
        Ok(())
    }

    async fn fail(&self, project_id: &str, reason: &str) -> Result<()> {
        self.db.set_project_failed(project_id, reason)?;
        self.events
            .publish_gm(project_id, GmEvent::ProjectFailed { reason: reason.to_string() });
        Ok(())
    }

    async fn cancelled(&self, cancel_rx: &watch::Receiver<bool>) -> bool {
        *cancel_rx.borrow()
    }

    /// Run a project end to end. Any `Err` returned here is caught by the
    /// spawning task and surfaces as an unhandled-exception project failure
    /// (spec §7's "Unhandled exceptions ... transition the project to
    /// failed with the exception's message").
    async fn run(self: &Arc<Self>, project_id: &str, spec: ProjectSpec, mut cancel_rx: watch::Receiver<bool>) -> Result<()> {
        if self.phase_launching(project_id, &spec).await? {
            return Ok(());
        }
        if self.phase_waiting(project_id, &mut cancel_rx).await? {
            return Ok(());
        }
        let completed_sids = match self.phase_analyzing(project_id).await? {
            Some(sids) => sids,
            None => return Ok(()),
        };
        if self.phase_merging(project_id, &spec, &completed_sids).await? {
            return Ok(());
        }
        if let Some(cmd) = &spec.build_command {
            if !self.phase_building(project_id, &spec.repo_path, cmd).await? {
                return Ok(());
            }
        }
        if let Some(cmd) = &spec.test_command {
            if !self.phase_testing(project_id, &spec.repo_path, cmd).await? {
                return Ok(());
            }
        }
        self.db.set_project_completed(project_id)?;
        self.events.publish_gm(project_id, GmEvent::ProjectCompleted);
        Ok(())
    }

    // ── Phase: launching ────────────────────────────────────────────────

    /// Returns `true` if the project was terminated (failed) during this phase.
    async fn phase_launching(&self, project_id: &str, spec: &ProjectSpec) -> Result<bool> {
        self.set_phase(project_id, ProjectPhase::Launching)?;
        self.db.set_agent_count(project_id, spec.agents.len() as i64)?;

        let mut launched = 0usize;
        for agent in &spec.agents {
            match self
                .launcher
                .launch(Some(project_id), &agent.team, &agent.task, Some(&spec.repo_path))
                .await
            {
                Ok(outcome) => {
                    launched += 1;
                    self.events.publish_gm(
                        project_id,
                        GmEvent::AgentLaunched {
                            session_id: outcome.session_id,
                            team: agent.team.clone(),
                        },
                    );
                }
                Err(e) => {
                    warn!(project_id, team = %agent.team, error = %e, "failed to launch agent");
                    let sid = format!("failed-{}", agent.team);
                    let now = Utc::now();
                    let placeholder = crate::types::AgentSession {
                        session_id: sid.clone(),
                        project_id: Some(project_id.to_string()),
                        team_name: agent.team.clone(),
                        task: agent.task.clone(),
                        status: SessionStatus::Failed,
                        repo_path: spec.repo_path.clone(),
                        branch: None,
                        worktree_path: None,
                        output_filename: None,
                        files_changed: Vec::new(),
                        merge_order_index: None,
                        merge_result: None,
                        cost_usd: None,
                        input_tokens: None,
                        output_tokens: None,
                        started_at: now,
                        completed_at: Some(now),
                    };
                    self.db.insert_session(&placeholder)?;
                    self.db.increment_failed_count(project_id)?;
                    self.events.publish_gm(
                        project_id,
                        GmEvent::AgentLaunched { session_id: sid, team: agent.team.clone() },
                    );
                }
            }
        }

        if launched == 0 {
            self.fail(project_id, "No agents launched successfully").await?;
            return Ok(true);
        }
        Ok(false)
    }

    // ── Phase: waiting ──────────────────────────────────────────────────

    async fn phase_waiting(&self, project_id: &str, cancel_rx: &mut watch::Receiver<bool>) -> Result<bool> {
        self.set_phase(project_id, ProjectPhase::Waiting)?;
        let mut accounted: HashSet<String> = HashSet::new();

        loop {
            let sessions = self.db.list_sessions_for_project(project_id)?;
            let live_sessions: Vec<_> = sessions.iter().filter(|s| !s.session_id.starts_with("failed-")).collect();
            let all_terminal = live_sessions.iter().all(|s| s.status.is_terminal());

            for s in &live_sessions {
                if s.status.is_terminal() && accounted.insert(s.session_id.clone()) {
                    match s.status {
                        SessionStatus::Completed => self.db.increment_completed_count(project_id)?,
                        _ => self.db.increment_failed_count(project_id)?,
                    }
                    self.events.publish_gm(
                        project_id,
                        GmEvent::AgentCompleted {
                            session_id: s.session_id.clone(),
                            status: s.status.as_str().to_string(),
                        },
                    );
                }
            }

            if all_terminal {
                break;
            }
            if self.cancelled(cancel_rx).await {
                self.cancel_cascade(project_id).await;
                return Ok(true);
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.tuning.wait_poll_interval_s)) => {}
                _ = cancel_rx.changed() => {}
            }
            if self.cancelled(cancel_rx).await {
                self.cancel_cascade(project_id).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn cancel_cascade(&self, project_id: &str) {
        if let Ok(sessions) = self.db.list_sessions_for_project(project_id) {
            for s in sessions {
                if self.launcher.is_live(&s.session_id).await {
                    let _ = self.launcher.cancel(&s.session_id).await;
                }
            }
        }
        let _ = self.fail(project_id, "Cancelled").await;
    }

    // ── Phase: analyzing ────────────────────────────────────────────────

    /// Returns the merge order (session ids) on success, or `None` if the
    /// project was failed during this phase.
    async fn phase_analyzing(&self, project_id: &str) -> Result<Option<Vec<String>>> {
        self.set_phase(project_id, ProjectPhase::Analyzing)?;
        let sessions = self.db.list_sessions_for_project(project_id)?;
        let completed: Vec<_> = sessions
            .into_iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .collect();

        if completed.is_empty() {
            self.fail(project_id, "No agents completed successfully").await?;
            return Ok(None);
        }

        let repo_path = self
            .db
            .get_project(project_id)?
            .context("project vanished during analyzing")?
            .repo_path;
        let wt_mgr = WorktreeManager::new(repo_path);

        let mut changed: Vec<(String, HashSet<String>)> = Vec::with_capacity(completed.len());
        for s in &completed {
            let files = wt_mgr.files_changed(&s.session_id).unwrap_or_default();
            changed.push((s.session_id.clone(), files.into_iter().collect()));
        }

        let order = compute_merge_order(&changed);

        self.db.set_merge_order(project_id, &order)?;
        for (idx, sid) in order.iter().enumerate() {
            self.db.set_session_merge_order_index(sid, idx as i64)?;
        }

        let scores: Vec<(String, i64)> = order
            .iter()
            .map(|sid| {
                let score = overlap_score(sid, &changed);
                (sid.clone(), score)
            })
            .collect();
        self.events
            .publish_gm(project_id, GmEvent::MergeOrderDetermined { order: order.clone(), scores });

        Ok(Some(order))
    }

    // ── Phase: merging ──────────────────────────────────────────────────

    /// Returns `true` if the project was terminated (failed) during this phase.
    async fn phase_merging(&self, project_id: &str, spec: &ProjectSpec, order: &[String]) -> Result<bool> {
        self.set_phase(project_id, ProjectPhase::Merging)?;
        let wt_mgr = WorktreeManager::new(spec.repo_path.clone());

        for sid in order {
            self.db.set_current_merge(project_id, Some(sid))?;
            self.events.publish_gm(project_id, GmEvent::MergeStarted { session_id: sid.clone() });

            match wt_mgr.merge(sid)? {
                MergeOutcome::Ok => {
                    self.db.set_session_merge_result(sid, MergeResult::Merged)?;
                    self.db.increment_merged_count(project_id)?;
                    self.events.publish_gm(
                        project_id,
                        GmEvent::MergeCompleted { session_id: sid.clone(), skipped: false, resolved: false },
                    );
                }
                MergeOutcome::Conflict { paths } => {
                    self.events.publish_gm(
                        project_id,
                        GmEvent::MergeConflict { session_id: sid.clone(), error: format!("{} conflicted paths", paths.len()) },
                    );
                    if self.resolve_conflict(&spec.repo_path, &paths).await? {
                        self.db.set_session_merge_result(sid, MergeResult::MergedResolved)?;
                        self.db.increment_merged_count(project_id)?;
                        self.events.publish_gm(project_id, GmEvent::ConflictResolved { session_id: sid.clone() });
                        self.events.publish_gm(
                            project_id,
                            GmEvent::MergeCompleted { session_id: sid.clone(), skipped: false, resolved: true },
                        );
                    } else {
                        let git = Git::new(spec.repo_path.clone());
                        let _ = git.abort_merge();
                        wt_mgr.discard(sid)?;
                        self.db.set_session_merge_result(sid, MergeResult::Skipped)?;
                        self.events.publish_gm(
                            project_id,
                            GmEvent::MergeCompleted { session_id: sid.clone(), skipped: true, resolved: false },
                        );
                    }
                }
            }

            if let Some(cmd) = &spec.build_command {
                let (success, output) = run_shell_command(&spec.repo_path, cmd, self.config.tuning.shell_timeout_s).await;
                if !success {
                    // Single inline fix attempt; logged but never aborts the pipeline here.
                    let attempt = self.db.increment_build_attempts(project_id)?;
                    let tail = tail_bytes(&output, TAIL_BYTES).to_string();
                    if let Err(e) = self.run_repair_agent(&spec.repo_path, &build_build_fix_prompt(attempt as u32, &tail)).await {
                        warn!(project_id, error = %e, "inline build-fix agent failed");
                    }
                    let git = Git::new(spec.repo_path.clone());
                    let _ = git.stage_all();
                    let _ = git.commit(&format!("fix: build fix attempt {attempt}"));
                    let (retry_ok, _) = run_shell_command(&spec.repo_path, cmd, self.config.tuning.shell_timeout_s).await;
                    info!(project_id, success = retry_ok, "inline build-fix attempt during merge completed");
                }
            }
        }
        self.db.set_current_merge(project_id, None)?;

        let project = self.db.get_project(project_id)?.context("project vanished during merging")?;
        if project.merged_count == 0 {
            self.fail(project_id, "No branches merged successfully").await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Spawn the conflict-resolution agent against the host repository's
    /// working directory and verify no conflicted paths remain afterward.
    async fn resolve_conflict(&self, repo_path: &str, paths: &[String]) -> Result<bool> {
        let prompt = build_conflict_prompt(paths);
        let timeout = Duration::from_secs(self.config.tuning.conflict_agent_timeout_s);
        let request = AgentRequest {
            prompt,
            cwd: repo_path.to_string(),
            env: Vec::new(),
            timeout: Some(timeout),
            kill: None,
        };
        let result = self.repair_backend.run(request, None).await;
        let git = Git::new(repo_path.to_string());
        match result {
            Ok(r) if !r.timed_out => {
                if git.conflicted_paths().unwrap_or_default().is_empty() {
                    let fallback = "Merge: resolved via conflict-resolution agent".to_string();
                    git.commit_merge_resolution(&fallback)?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            _ => Ok(false),
        }
    }

    async fn run_repair_agent(&self, cwd: &str, prompt: &str) -> Result<bool> {
        let request = AgentRequest {
            prompt: prompt.to_string(),
            cwd: cwd.to_string(),
            env: Vec::new(),
            timeout: Some(Duration::from_secs(self.config.tuning.repair_agent_timeout_s)),
            kill: None,
        };
        let result = self.repair_backend.run(request, None).await?;
        Ok(result.success && !result.timed_out)
    }

    // ── Phase: building (final gate) ────────────────────────────────────

    /// Returns `true` on success (proceed to next phase), `false` if the
    /// project was failed.
    async fn phase_building(&self, project_id: &str, repo_path: &str, cmd: &str) -> Result<bool> {
        self.set_phase(project_id, ProjectPhase::Building)?;
        self.events.publish_gm(project_id, GmEvent::BuildStarted);

        let (mut success, mut output) = run_shell_command(repo_path, cmd, self.config.tuning.shell_timeout_s).await;
        self.events.publish_gm(
            project_id,
            GmEvent::BuildResult { success, tail_output: tail_bytes(&output, TAIL_BYTES).to_string() },
        );
        if success {
            return Ok(true);
        }

        for _ in 0..self.config.tuning.max_build_fix_attempts {
            let attempt = self.db.increment_build_attempts(project_id)?;
            let tail = tail_bytes(&output, TAIL_BYTES).to_string();
            let fix_prompt = build_build_fix_prompt(attempt as u32, &tail);
            let agent_ok = self.run_repair_agent(repo_path, &fix_prompt).await.unwrap_or(false);
            if agent_ok {
                let git = Git::new(repo_path.to_string());
                let _ = git.stage_all();
                let _ = git.commit(&format!("fix: build fix attempt {attempt}"));
            }
            let (retry_success, retry_output) = run_shell_command(repo_path, cmd, self.config.tuning.shell_timeout_s).await;
            self.events.publish_gm(
                project_id,
                GmEvent::BuildFixAttempt { attempt: attempt as u32, success: retry_success },
            );
            success = retry_success;
            output = retry_output;
            if success {
                return Ok(true);
            }
        }

        self.fail(project_id, "Build failed after all fix attempts").await?;
        Ok(false)
    }

    // ── Phase: testing ──────────────────────────────────────────────────

    async fn phase_testing(&self, project_id: &str, repo_path: &str, cmd: &str) -> Result<bool> {
        self.set_phase(project_id, ProjectPhase::Testing)?;
        self.events.publish_gm(project_id, GmEvent::TestStarted);

        let (mut success, mut output) = run_shell_command(repo_path, cmd, self.config.tuning.shell_timeout_s).await;
        self.events.publish_gm(
            project_id,
            GmEvent::TestResult { success, tail_output: tail_bytes(&output, TAIL_BYTES).to_string() },
        );
        if success {
            return Ok(true);
        }

        for _ in 0..self.config.tuning.max_test_fix_attempts {
            let attempt = self.db.increment_test_attempts(project_id)?;
            let tail = tail_bytes(&output, TAIL_BYTES).to_string();
            let fix_prompt = build_test_fix_prompt(attempt as u32, &tail);
            let agent_ok = self.run_repair_agent(repo_path, &fix_prompt).await.unwrap_or(false);
            if agent_ok {
                let git = Git::new(repo_path.to_string());
                let _ = git.stage_all();
                let _ = git.commit(&format!("fix: test fix attempt {attempt}"));
            }
            let (retry_success, retry_output) = run_shell_command(repo_path, cmd, self.config.tuning.shell_timeout_s).await;
            self.events.publish_gm(
                project_id,
                GmEvent::TestFixAttempt { attempt: attempt as u32, success: retry_success },
            );
            success = retry_success;
            output = retry_output;
            if success {
                return Ok(true);
            }
        }

        self.fail(project_id, "Tests failed after all fix attempts").await?;
        Ok(false)
    }

    // ── Operator operations ─────────────────────────────────────────────

    pub async fn cancel(&self, project_id: &str) -> Result<()> {
        if let Some(running) = self.running.lock().await.get(project_id) {
            let _ = running.cancel.send(true);
        } else {
            self.cancel_cascade(project_id).await;
        }
        Ok(())
    }

    /// Re-attempt any sessions whose `merge_result == skipped` (in their
    /// original merge-order index), then re-run the build and test gates
    /// (including their fix loops). Only valid when the project is *failed*.
    pub async fn retry(&self, project_id: &str) -> Result<()> {
        let project = self
            .db
            .get_project(project_id)?
            .with_context(|| format!("no such project {project_id}"))?;
        if project.phase != ProjectPhase::Failed {
            anyhow::bail!("retry is only valid for a failed project (currently {:?})", project.phase);
        }

        let wt_mgr = WorktreeManager::new(project.repo_path.clone());
        let mut sessions = self.db.list_sessions_for_project(project_id)?;
        sessions.sort_by_key(|s| s.merge_order_index.unwrap_or(i64::MAX));

        for s in sessions.iter().filter(|s| s.merge_result == Some(MergeResult::Skipped)) {
            match wt_mgr.merge(&s.session_id) {
                Ok(MergeOutcome::Ok) => {
                    self.db.set_session_merge_result(&s.session_id, MergeResult::Merged)?;
                    self.db.increment_merged_count(project_id)?;
                }
                Ok(MergeOutcome::Conflict { paths }) => {
                    if self.resolve_conflict(&project.repo_path, &paths).await? {
                        self.db.set_session_merge_result(&s.session_id, MergeResult::MergedResolved)?;
                        self.db.increment_merged_count(project_id)?;
                    } else {
                        let git = Git::new(project.repo_path.clone());
                        let _ = git.abort_merge();
                        warn!(project_id, session_id = %s.session_id, "retry: session remains skipped");
                    }
                }
                Err(e) => {
                    warn!(project_id, session_id = %s.session_id, error = %e, "retry: branch unavailable, session remains skipped");
                }
            }
        }

        if let Some(cmd) = project.build_command.clone() {
            if !self.phase_building(project_id, &project.repo_path, &cmd).await? {
                return Ok(());
            }
        }
        if let Some(cmd) = project.test_command.clone() {
            if !self.phase_testing(project_id, &project.repo_path, &cmd).await? {
                return Ok(());
            }
        }
        self.db.set_project_completed(project_id)?;
        self.events.publish_gm(project_id, GmEvent::ProjectCompleted);
        Ok(())
    }

    /// Invoke the repository's publish-to-remote operation and surface the
    /// tool's exit text.
    pub async fn push(&self, project_id: &str) -> Result<String> {
        let project = self
            .db
            .get_project(project_id)?
            .with_context(|| format!("no such project {project_id}"))?;
        let git = Git::new(project.repo_path);
        let branch = git.current_branch()?;
        let result = git.push(&branch)?;
        Ok(result.combined_output())
    }
}

/// Overlap score of `sid`: the sum, over every other session, of the size
/// of the intersection of their changed-file sets.
fn overlap_score(sid: &str, changed: &[(String, HashSet<String>)]) -> i64 {
    let Some((_, files)) = changed.iter().find(|(s, _)| s == sid) else {
        return 0;
    };
    changed
        .iter()
        .filter(|(other, _)| other != sid)
        .map(|(_, other_files)| files.intersection(other_files).count() as i64)
        .sum()
}

/// Sort sessions ascending by overlap score; ties keep original (insertion)
/// order, since `sort_by_key` is stable.
fn compute_merge_order(changed: &[(String, HashSet<String>)]) -> Vec<String> {
    let mut order: Vec<(String, i64)> = changed
        .iter()
        .map(|(sid, _)| (sid.clone(), overlap_score(sid, changed)))
        .collect();
    order.sort_by_key(|(_, score)| *score);
    order.into_iter().map(|(sid, _)| sid).collect()
}

/// Run a build/test shell command with the spec's wall-clock timeout,
/// returning success plus its combined stdout+stderr.
async fn run_shell_command(cwd: &str, command: &str, timeout_s: u64) -> (bool, String) {
    let fut = async {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .output()
            .await;
        match output {
            Ok(o) => {
                let mut combined = String::from_utf8_lossy(&o.stdout).into_owned();
                combined.push('\n');
                combined.push_str(&String::from_utf8_lossy(&o.stderr));
                (o.status.success(), combined)
            }
            Err(e) => (false, format!("failed to spawn shell command: {e}")),
        }
    };
    match tokio::time::timeout(Duration::from_secs(timeout_s), fut).await {
        Ok(result) => result,
        Err(_) => (false, format!("command timed out after {timeout_s}s: {command}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(files: &[&str]) -> HashSet<String> {
        files.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn s1_disjoint_changes_score_zero_and_keep_order() {
        let changed = vec![
            ("agent1".to_string(), set(&["A.txt"])),
            ("agent2".to_string(), set(&["B.txt"])),
        ];
        let order = compute_merge_order(&changed);
        assert_eq!(order, vec!["agent1".to_string(), "agent2".to_string()]);
    }

    #[test]
    fn s2_overlap_ordering() {
        // X={a,b} Y={b,c} Z={d}. Scores: X=1, Y=1, Z=0. Order=[Z,X,Y].
        let changed = vec![
            ("X".to_string(), set(&["a", "b"])),
            ("Y".to_string(), set(&["b", "c"])),
            ("Z".to_string(), set(&["d"])),
        ];
        assert_eq!(overlap_score("X", &changed), 1);
        assert_eq!(overlap_score("Y", &changed), 1);
        assert_eq!(overlap_score("Z", &changed), 0);
        let order = compute_merge_order(&changed);
        assert_eq!(order, vec!["Z".to_string(), "X".to_string(), "Y".to_string()]);
    }

    #[test]
    fn merge_order_is_a_permutation() {
        let changed = vec![
            ("a".to_string(), set(&["1", "2"])),
            ("b".to_string(), set(&["2", "3"])),
            ("c".to_string(), set(&["3", "4"])),
        ];
        let mut order = compute_merge_order(&changed);
        order.sort();
        let mut expected: Vec<String> = changed.iter().map(|(s, _)| s.clone()).collect();
        expected.sort();
        assert_eq!(order, expected);
    }
}
