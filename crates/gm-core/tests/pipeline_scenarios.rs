//! End-to-end pipeline scenarios against real git repositories in a
//! temporary directory, with fake `AgentBackend`s standing in for the
//! external coding-agent CLI. Covers the multi-agent happy path and both
//! conflict outcomes (resolved, skipped).

use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use gm_core::agent::{AgentBackend, AgentRequest, AgentRunResult, AgentUsage, LineSink};
use gm_core::config::{Config, PipelineTuning};
use gm_core::db::Db;
use gm_core::events::EventBus;
use gm_core::git::Git;
use gm_core::launcher::Launcher;
use gm_core::pipeline::Pipeline;
use gm_core::types::{AgentSpec, ProjectSpec};

fn run_git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git must be on PATH for this test");
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    run_git(dir.path(), &["init", "-q", "-b", "main"]);
    run_git(dir.path(), &["config", "user.email", "gm@example.com"]);
    run_git(dir.path(), &["config", "user.name", "gm"]);
    std::fs::write(dir.path().join("README.md"), "seed\n").unwrap();
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-q", "-m", "initial"]);
    dir
}

fn test_config(repo_path: &str, outputs_dir: &std::path::Path) -> Config {
    Config {
        config_file: "orchestra.yml".to_string(),
        outputs_dir: outputs_dir.to_string_lossy().into_owned(),
        db_path: ":memory:".to_string(),
        default_repo_path: repo_path.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        claude_bin: "claude".to_string(),
        orchestrator_bin: "agent-orchestra".to_string(),
        cost_per_1m_input: 3.0,
        cost_per_1m_output: 15.0,
        chars_per_token: 4,
        tuning: PipelineTuning {
            wait_poll_interval_s: 0,
            ..PipelineTuning::default()
        },
    }
}

/// Writes one file whose name/content are encoded in its task string as
/// `write:<name>:<content>` (`\n` stands for a literal newline), simulating
/// a coding-agent session that edits a file and exits successfully.
struct WritingBackend;

#[async_trait]
impl AgentBackend for WritingBackend {
    async fn run(&self, request: AgentRequest, _lines: Option<LineSink>) -> anyhow::Result<AgentRunResult> {
        if let Some(task_line) = request.prompt.lines().last() {
            if let Some(rest) = task_line.strip_prefix("write:") {
                if let Some((name, content)) = rest.split_once(':') {
                    let content = content.replace("\\n", "\n");
                    std::fs::write(std::path::Path::new(&request.cwd).join(name), content)?;
                }
            }
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

/// Stands in for the one-shot conflict-resolution repair agent: blanks
/// whatever is conflicted in its cwd and stages it, never touching anything
/// else.
struct ConflictFixBackend;

#[async_trait]
impl AgentBackend for ConflictFixBackend {
    async fn run(&self, request: AgentRequest, _lines: Option<LineSink>) -> anyhow::Result<AgentRunResult> {
        let git = Git::new(request.cwd.clone());
        for path in git.conflicted_paths().unwrap_or_default() {
            let full = std::path::Path::new(&request.cwd).join(&path);
            std::fs::write(&full, "resolved-by-agent\n")?;
        }
        git.stage_all()?;
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

/// Gives up without touching anything, as a repair agent that could not fix
/// the conflict it was handed.
struct GiveUpBackend;

#[async_trait]
impl AgentBackend for GiveUpBackend {
    async fn run(&self, _request: AgentRequest, _lines: Option<LineSink>) -> anyhow::Result<AgentRunResult> {
        Ok(AgentRunResult {
            success: false,
            exit_code: Some(1),
            stdout: String::new(),
            session_id: None,
            usage: AgentUsage::default(),
            timed_out: false,
        })
    }
}

async fn wait_for_terminal(db: &Db, project_id: &str) -> gm_core::types::Project {
    for _ in 0..200 {
        if let Some(project) = db.get_project(project_id).unwrap() {
            if project.phase.is_terminal() {
                return project;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("project {project_id} never reached a terminal phase");
}

#[tokio::test]
async fn disjoint_agents_merge_cleanly_and_project_completes() {
    let repo = init_repo();
    let repo_path = repo.path().to_string_lossy().into_owned();
    let outputs = tempfile::tempdir().unwrap();

    let mut real_db = Db::open(":memory:").unwrap();
    real_db.migrate().unwrap();
    let db = Arc::new(real_db);

    let events = Arc::new(EventBus::new());
    let config = Arc::new(test_config(&repo_path, outputs.path()));
    let launcher = Arc::new(Launcher::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        Arc::new(WritingBackend),
    ));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        launcher,
        Arc::new(ConflictFixBackend),
    ));

    let spec = ProjectSpec {
        name: "disjoint".to_string(),
        repo_path: repo_path.clone(),
        build_command: None,
        test_command: None,
        agents: vec![
            AgentSpec { team: "alpha".to_string(), task: "write:a.txt:hello".to_string() },
            AgentSpec { team: "beta".to_string(), task: "write:b.txt:world".to_string() },
        ],
    };

    let project_id = pipeline.launch_project(spec).await.unwrap();
    let project = wait_for_terminal(&db, &project_id).await;

    assert_eq!(project.phase, gm_core::types::ProjectPhase::Completed);
    assert_eq!(project.merged_count, 2);
    assert!(repo.path().join("a.txt").exists());
    assert!(repo.path().join("b.txt").exists());
}

#[tokio::test]
async fn overlapping_edit_conflict_is_resolved_by_repair_agent() {
    let repo = init_repo();
    std::fs::write(repo.path().join("shared.txt"), "line1\nline2\nline3\n").unwrap();
    run_git(repo.path(), &["add", "."]);
    run_git(repo.path(), &["commit", "-q", "-m", "seed shared file"]);
    let repo_path = repo.path().to_string_lossy().into_owned();
    let outputs = tempfile::tempdir().unwrap();

    let mut real_db = Db::open(":memory:").unwrap();
    real_db.migrate().unwrap();
    let db = Arc::new(real_db);
    let events = Arc::new(EventBus::new());
    let config = Arc::new(test_config(&repo_path, outputs.path()));
    let launcher = Arc::new(Launcher::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        Arc::new(WritingBackend),
    ));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        launcher,
        Arc::new(ConflictFixBackend),
    ));

    let spec = ProjectSpec {
        name: "overlap".to_string(),
        repo_path: repo_path.clone(),
        build_command: None,
        test_command: None,
        agents: vec![
            AgentSpec { team: "alpha".to_string(), task: "write:shared.txt:changed-by-alpha".to_string() },
            AgentSpec { team: "beta".to_string(), task: "write:shared.txt:changed-by-beta".to_string() },
        ],
    };

    let project_id = pipeline.launch_project(spec).await.unwrap();
    let project = wait_for_terminal(&db, &project_id).await;

    assert_eq!(project.phase, gm_core::types::ProjectPhase::Completed);
    assert_eq!(project.merged_count, 2);
    let content = std::fs::read_to_string(repo.path().join("shared.txt")).unwrap();
    assert_eq!(content, "resolved-by-agent\n");
}

#[tokio::test]
async fn overlapping_edit_conflict_is_skipped_when_repair_agent_gives_up() {
    let repo = init_repo();
    std::fs::write(repo.path().join("shared.txt"), "line1\nline2\nline3\n").unwrap();
    run_git(repo.path(), &["add", "."]);
    run_git(repo.path(), &["commit", "-q", "-m", "seed shared file"]);
    let repo_path = repo.path().to_string_lossy().into_owned();
    let outputs = tempfile::tempdir().unwrap();

    let mut real_db = Db::open(":memory:").unwrap();
    real_db.migrate().unwrap();
    let db = Arc::new(real_db);
    let events = Arc::new(EventBus::new());
    let config = Arc::new(test_config(&repo_path, outputs.path()));
    let launcher = Arc::new(Launcher::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        Arc::new(WritingBackend),
    ));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&db),
        Arc::clone(&events),
        Arc::clone(&config),
        launcher,
        Arc::new(GiveUpBackend),
    ));

    let spec = ProjectSpec {
        name: "overlap-skip".to_string(),
        repo_path: repo_path.clone(),
        build_command: None,
        test_command: None,
        agents: vec![
            AgentSpec { team: "alpha".to_string(), task: "write:shared.txt:changed-by-alpha".to_string() },
            AgentSpec { team: "beta".to_string(), task: "write:shared.txt:changed-by-beta".to_string() },
        ],
    };

    let project_id = pipeline.launch_project(spec).await.unwrap();
    let project = wait_for_terminal(&db, &project_id).await;

    assert_eq!(project.phase, gm_core::types::ProjectPhase::Completed);
    // Exactly one of the two sessions merges; the other is skipped because
    // the repair agent could not clear the conflict markers it was handed.
    assert_eq!(project.merged_count, 1);

    let sessions = db.list_sessions_for_project(&project_id).unwrap();
    let skipped = sessions
        .iter()
        .filter(|s| s.merge_result == Some(gm_core::types::MergeResult::Skipped))
        .count();
    assert_eq!(skipped, 1);
}
