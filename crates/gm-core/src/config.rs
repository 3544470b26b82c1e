use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::{GmProjectTemplate, TeamTemplate};

/// Full application configuration, loaded from environment variables / a
/// `.env` file, with the OS environment taking precedence over the file.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the declarative project/team template file (`orchestra.yml`).
    pub config_file: String,
    /// Directory for per-session JSON artifacts (`teams-<sid>.json`).
    pub outputs_dir: String,
    /// Path to the SQLite database file.
    pub db_path: String,
    /// Default host repository path used when a launch omits one.
    pub default_repo_path: String,

    pub host: String,
    pub port: u16,

    /// Path to the external coding-agent CLI binary (e.g. `claude`).
    pub claude_bin: String,
    /// Path to the separately managed orchestrator binary (out of scope,
    /// carried through only as a configuration pass-through value).
    pub orchestrator_bin: String,

    pub cost_per_1m_input: f64,
    pub cost_per_1m_output: f64,
    pub chars_per_token: u32,

    /// Pipeline tuning, defaulted to the design's literal constants but
    /// overridable (mainly for tests that want a faster poll loop).
    pub tuning: PipelineTuning,
}

/// Tunable constants for the General Manager pipeline. Field names mirror
/// the symbols used in the pipeline's design (`K`, `P`, `T`, `B`, `T_max`).
#[derive(Debug, Clone, Copy)]
pub struct PipelineTuning {
    /// K: number of stderr matches of the same critical pattern before the
    /// resource-exhaustion watchdog kills a session.
    pub resource_kill_threshold: u32,
    /// P: seconds between "waiting" phase polls of session status.
    pub wait_poll_interval_s: u64,
    /// T: wall-clock timeout (seconds) for the conflict-resolution agent.
    pub conflict_agent_timeout_s: u64,
    /// B: max build-fix attempts.
    pub max_build_fix_attempts: u32,
    /// T_max: max test-fix attempts.
    pub max_test_fix_attempts: u32,
    /// Wall-clock timeout (seconds) for build/test shell commands.
    pub shell_timeout_s: u64,
    /// Wall-clock timeout (seconds) for repair-agent subprocesses
    /// (build-fix / test-fix), matching the conflict agent's bound.
    pub repair_agent_timeout_s: u64,
    /// Grace period (seconds) before SIGKILL on a cancelled session.
    pub cancel_grace_s: u64,
    /// Grace period (seconds) used during shutdown's cancel_all.
    pub shutdown_grace_s: u64,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            resource_kill_threshold: 2,
            wait_poll_interval_s: 5,
            conflict_agent_timeout_s: 600,
            max_build_fix_attempts: 3,
            max_test_fix_attempts: 3,
            shell_timeout_s: 300,
            repair_agent_timeout_s: 600,
            cancel_grace_s: 10,
            shutdown_grace_s: 5,
        }
    }
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u32(key: &str, dotenv: &HashMap<String, String>, default: u32) -> u32 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_f64(key: &str, dotenv: &HashMap<String, String>, default: f64) -> f64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn resolve_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}/{rest}");
        }
    }
    path.to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        let outputs_dir = resolve_tilde(&get_str("GM_OUTPUTS_DIR", &dotenv, "outputs"));
        let db_path = resolve_tilde(&get_str("GM_DB_PATH", &dotenv, "gm.db"));
        let config_file = resolve_tilde(&get_str(
            "GM_CONFIG_FILE",
            &dotenv,
            "config/orchestra.yml",
        ));

        let tuning = PipelineTuning {
            resource_kill_threshold: get_u32("GM_RESOURCE_KILL_THRESHOLD", &dotenv, 2),
            wait_poll_interval_s: get_u64("GM_WAIT_POLL_INTERVAL_S", &dotenv, 5),
            conflict_agent_timeout_s: get_u64("GM_CONFLICT_AGENT_TIMEOUT_S", &dotenv, 600),
            max_build_fix_attempts: get_u32("GM_MAX_BUILD_FIX_ATTEMPTS", &dotenv, 3),
            max_test_fix_attempts: get_u32("GM_MAX_TEST_FIX_ATTEMPTS", &dotenv, 3),
            shell_timeout_s: get_u64("GM_SHELL_TIMEOUT_S", &dotenv, 300),
            repair_agent_timeout_s: get_u64("GM_REPAIR_AGENT_TIMEOUT_S", &dotenv, 600),
            cancel_grace_s: get_u64("GM_CANCEL_GRACE_S", &dotenv, 10),
            shutdown_grace_s: get_u64("GM_SHUTDOWN_GRACE_S", &dotenv, 5),
        };

        Ok(Config {
            config_file,
            outputs_dir,
            db_path,
            default_repo_path: get_str("GM_DEFAULT_REPO_PATH", &dotenv, "."),
            host: get_str("GM_HOST", &dotenv, "0.0.0.0"),
            port: get_u16("GM_PORT", &dotenv, 8080),
            claude_bin: get_str("GM_CLAUDE_BIN", &dotenv, "claude"),
            orchestrator_bin: get_str(
                "GM_ORCHESTRATOR_BIN",
                &dotenv,
                "target/release/agent-orchestra",
            ),
            cost_per_1m_input: get_f64("GM_COST_PER_1M_INPUT", &dotenv, 3.0),
            cost_per_1m_output: get_f64("GM_COST_PER_1M_OUTPUT", &dotenv, 15.0),
            chars_per_token: get_u32("GM_CHARS_PER_TOKEN", &dotenv, 4),
            tuning,
        })
    }
}

/// Raw shape of the declarative configuration file (`orchestra.yml`).
#[derive(Debug, Deserialize, Default)]
struct OrchestraFile {
    #[serde(default)]
    teams: TeamsSection,
    #[serde(default)]
    gm_projects: HashMap<String, GmProjectTemplate>,
}

#[derive(Debug, Deserialize, Default)]
struct TeamsSection {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    definitions: HashMap<String, TeamTemplate>,
}

/// Project templates read from `gm_projects` in the config file, for any
/// operator-facing caller that wants to list launchable projects.
pub fn load_gm_project_templates(config_file: &str) -> Vec<(String, GmProjectTemplate)> {
    let Ok(contents) = std::fs::read_to_string(config_file) else {
        return Vec::new();
    };
    let parsed: OrchestraFile = match serde_yaml::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("failed to parse {config_file}: {e}");
            return Vec::new();
        }
    };
    parsed.gm_projects.into_iter().collect()
}

/// Team templates read from `teams.definitions`, only when `teams.enabled`.
pub fn load_team_templates(config_file: &str) -> Vec<(String, TeamTemplate)> {
    let Ok(contents) = std::fs::read_to_string(config_file) else {
        return Vec::new();
    };
    let parsed: OrchestraFile = match serde_yaml::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("failed to parse {config_file}: {e}");
            return Vec::new();
        }
    };
    if !parsed.teams.enabled {
        return Vec::new();
    }
    parsed.teams.definitions.into_iter().collect()
}

/// Single template lookup, used by `launch_project` callers that already
/// know the project name.
pub fn find_gm_project_template(
    config_file: &str,
    name: &str,
) -> Result<GmProjectTemplate> {
    load_gm_project_templates(config_file)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, t)| t)
        .with_context(|| format!("no gm_projects entry named '{name}' in {config_file}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORCHESTRA_YML: &str = r#"
gm_projects:
  widgets:
    description: "builds the widgets service"
    repo_path: /repos/widgets
    build_command: "cargo build"
    test_command: "cargo test"
    agents:
      - team: alpha
        task: "add the new endpoint"
      - team: beta
        task: "add the regression test"

teams:
  enabled: true
  definitions:
    alpha:
      description: "backend specialists"
"#;

    fn write_config(contents: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestra.yml");
        std::fs::write(&path, contents).unwrap();
        let path_str = path.to_string_lossy().into_owned();
        (dir, path_str)
    }

    #[test]
    fn missing_config_file_yields_empty_templates() {
        assert!(load_gm_project_templates("/nonexistent/orchestra.yml").is_empty());
        assert!(load_team_templates("/nonexistent/orchestra.yml").is_empty());
    }

    #[test]
    fn gm_projects_are_parsed_with_their_agent_list() {
        let (_dir, path) = write_config(ORCHESTRA_YML);
        let templates = load_gm_project_templates(&path);
        assert_eq!(templates.len(), 1);
        let (name, template) = &templates[0];
        assert_eq!(name, "widgets");
        assert_eq!(template.repo_path, "/repos/widgets");
        assert_eq!(template.build_command.as_deref(), Some("cargo build"));
        assert_eq!(template.agents.len(), 2);
        assert_eq!(template.agents[0].team, "alpha");
    }

    #[test]
    fn team_templates_are_empty_unless_enabled() {
        let (_dir, path) = write_config(ORCHESTRA_YML);
        let teams = load_team_templates(&path);
        assert_eq!(teams.len(), 1);
        assert_eq!(teams[0].0, "alpha");

        let disabled = ORCHESTRA_YML.replace("enabled: true", "enabled: false");
        let (_dir2, path2) = write_config(&disabled);
        assert!(load_team_templates(&path2).is_empty());
    }

    #[test]
    fn find_gm_project_template_errors_on_unknown_name() {
        let (_dir, path) = write_config(ORCHESTRA_YML);
        assert!(find_gm_project_template(&path, "widgets").is_ok());
        assert!(find_gm_project_template(&path, "does-not-exist").is_err());
    }

    #[test]
    fn resolve_tilde_expands_leading_home() {
        std::env::set_var("HOME", "/home/gm");
        assert_eq!(resolve_tilde("~/outputs"), "/home/gm/outputs");
        assert_eq!(resolve_tilde("/already/absolute"), "/already/absolute");
    }

    #[test]
    fn pipeline_tuning_defaults_match_the_documented_constants() {
        let tuning = PipelineTuning::default();
        assert_eq!(tuning.resource_kill_threshold, 2);
        assert_eq!(tuning.wait_poll_interval_s, 5);
        assert_eq!(tuning.conflict_agent_timeout_s, 600);
        assert_eq!(tuning.max_build_fix_attempts, 3);
        assert_eq!(tuning.max_test_fix_attempts, 3);
    }
}
