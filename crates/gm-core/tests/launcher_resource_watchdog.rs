//! Covers the resource-exhaustion watchdog on a real `Launcher`: a session
//! whose backend repeats a critical stderr pattern past the kill threshold
//! is killed and recorded as failed, with a `resource_error` team event
//! published along the way.

use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use gm_core::agent::{AgentBackend, AgentRequest, AgentRunResult, AgentUsage, LineSink, StreamKind};
use gm_core::config::{Config, PipelineTuning};
use gm_core::db::Db;
use gm_core::events::{EventBus, TeamEvent};
use gm_core::launcher::Launcher;
use gm_core::types::SessionStatus;

fn run_git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-q", "-b", "main"]);
    run_git(dir.path(), &["config", "user.email", "gm@example.com"]);
    run_git(dir.path(), &["config", "user.name", "gm"]);
    std::fs::write(dir.path().join("README.md"), "seed\n").unwrap();
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-q", "-m", "initial"]);
    dir
}

/// Emits the same critical stderr pattern twice, then exits as if nothing
/// were wrong — the launcher's watchdog, not the backend's own exit status,
/// is what should fail this session.
struct NoisyBackend;

#[async_trait]
impl AgentBackend for NoisyBackend {
    async fn run(&self, _request: AgentRequest, lines: Option<LineSink>) -> anyhow::Result<AgentRunResult> {
        if let Some(tx) = &lines {
            let _ = tx.send((StreamKind::Stderr, "Error: No space left on device".to_string()));
            let _ = tx.send((StreamKind::Stderr, "Error: No space left on device".to_string()));
        }
        Ok(AgentRunResult {
            success: true,
            exit_code: Some(0),
            stdout: String::new(),
            session_id: None,
            usage: AgentUsage::default(),
            timed_out: false,
        })
    }
}

#[tokio::test]
async fn session_is_failed_after_repeated_resource_exhaustion_pattern() {
    let repo = init_repo();
    let repo_path = repo.path().to_string_lossy().into_owned();
    let outputs = tempfile::tempdir().unwrap();

    let mut db = Db::open(":memory:").unwrap();
    db.migrate().unwrap();
    let db = Arc::new(db);
    let events = Arc::new(EventBus::new());
    let config = Arc::new(Config {
        config_file: "orchestra.yml".to_string(),
        outputs_dir: outputs.path().to_string_lossy().into_owned(),
        db_path: ":memory:".to_string(),
        default_repo_path: repo_path.clone(),
        host: "127.0.0.1".to_string(),
        port: 0,
        claude_bin: "claude".to_string(),
        orchestrator_bin: "agent-orchestra".to_string(),
        cost_per_1m_input: 3.0,
        cost_per_1m_output: 15.0,
        chars_per_token: 4,
        tuning: PipelineTuning::default(),
    });

    let mut team_rx = events.subscribe_team();
    let launcher = Arc::new(Launcher::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        Arc::new(NoisyBackend),
    ));

    let outcome = launcher
        .launch(None, "noisy-team", "write:a.txt:irrelevant", Some(&repo_path))
        .await
        .unwrap();

    let mut saw_resource_error = false;
    for _ in 0..500 {
        while let Ok(progress) = team_rx.try_recv() {
            if progress.session_id == outcome.session_id {
                if let TeamEvent::ResourceError { .. } = progress.event {
                    saw_resource_error = true;
                }
            }
        }
        if let Some(session) = db.get_session(&outcome.session_id).unwrap() {
            if session.status.is_terminal() {
                assert_eq!(session.status, SessionStatus::Failed);
                assert!(saw_resource_error, "expected a resource_error team event before the session failed");
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("session {} never reached a terminal status", outcome.session_id);
}
