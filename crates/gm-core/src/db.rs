use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::types::{
    AgentSession, CostBreakdown, DecisionGate, DecisionStatus, LogEntry, LogLevel, MergeResult,
    Project, ProjectPhase, SessionStatus, Stats,
};

const SCHEMA_SQL: &str = include_str!("../../../schema.sql");

pub struct Db {
    conn: Mutex<Connection>,
}

// ── Timestamp helpers ─────────────────────────────────────────────────────

fn parse_ts(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| ndt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_ts)
}

fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn to_json_list(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn from_json_list(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

// ── Row mappers ───────────────────────────────────────────────────────────

// Expected column order:
// id, name, repo_path, build_command, test_command, phase, agent_count,
// completed_count, failed_count, merged_count, build_attempts, test_attempts,
// merge_order, current_merge, started_at, completed_at, error_message
fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let merge_order_str: String = row.get(12)?;
    let started_at_str: String = row.get(14)?;
    let completed_at_str: Option<String> = row.get(15)?;
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        repo_path: row.get(2)?,
        build_command: row.get(3)?,
        test_command: row.get(4)?,
        phase: ProjectPhase::from_str_or(&row.get::<_, String>(5)?, ProjectPhase::Created),
        agent_count: row.get(6)?,
        completed_count: row.get(7)?,
        failed_count: row.get(8)?,
        merged_count: row.get(9)?,
        build_attempts: row.get(10)?,
        test_attempts: row.get(11)?,
        merge_order: from_json_list(&merge_order_str),
        current_merge: row.get(13)?,
        error_message: row.get(16)?,
        started_at: parse_ts(&started_at_str),
        completed_at: parse_ts_opt(&completed_at_str),
    })
}

// Expected column order:
// session_id, project_id, team_name, task, status, repo_path, branch,
// worktree_path, output_filename, files_changed, merge_order_index,
// merge_result, cost_usd, input_tokens, output_tokens, started_at, completed_at
fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentSession> {
    let files_changed_str: String = row.get(9)?;
    let merge_result_str: Option<String> = row.get(11)?;
    let started_at_str: String = row.get(15)?;
    let completed_at_str: Option<String> = row.get(16)?;
    Ok(AgentSession {
        session_id: row.get(0)?,
        project_id: row.get(1)?,
        team_name: row.get(2)?,
        task: row.get(3)?,
        status: SessionStatus::from_str_or(&row.get::<_, String>(4)?, SessionStatus::Pending),
        repo_path: row.get(5)?,
        branch: row.get(6)?,
        worktree_path: row.get(7)?,
        output_filename: row.get(8)?,
        files_changed: from_json_list(&files_changed_str),
        merge_order_index: row.get(10)?,
        merge_result: merge_result_str.as_deref().and_then(MergeResult::from_str_opt),
        cost_usd: row.get(12)?,
        input_tokens: row.get(13)?,
        output_tokens: row.get(14)?,
        started_at: parse_ts(&started_at_str),
        completed_at: parse_ts_opt(&completed_at_str),
    })
}

fn row_to_log_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    let ts_str: String = row.get(1)?;
    let level_str: String = row.get(2)?;
    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: parse_ts(&ts_str),
        level: match level_str.as_str() {
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        },
        message: row.get(3)?,
        source: row.get(4)?,
    })
}

fn row_to_decision_gate(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecisionGate> {
    let status_str: String = row.get(4)?;
    Ok(DecisionGate {
        id: row.get(0)?,
        project_id: row.get(1)?,
        kind: row.get(2)?,
        payload: row.get(3)?,
        status: match status_str.as_str() {
            "approved" => DecisionStatus::Approved,
            "rejected" => DecisionStatus::Rejected,
            _ => DecisionStatus::Pending,
        },
    })
}

// ── Db impl ───────────────────────────────────────────────────────────────

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open SQLite database at {path:?}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("failed to set PRAGMAs")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn migrate(&mut self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema migrations")?;
        // Idempotent column additions for DBs created before these columns existed.
        // ALTER TABLE fails if the column already exists; ignore that error.
        let alters = ["ALTER TABLE agent_sessions ADD COLUMN output_filename TEXT"];
        for sql in alters {
            let _ = conn.execute(sql, []);
        }
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────────

    pub fn insert_project(&self, project: &Project) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO projects \
             (id, name, repo_path, build_command, test_command, phase, agent_count, \
              completed_count, failed_count, merged_count, build_attempts, test_attempts, \
              merge_order, current_merge, started_at, completed_at, error_message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                project.id,
                project.name,
                project.repo_path,
                project.build_command,
                project.test_command,
                project.phase.as_str(),
                project.agent_count,
                project.completed_count,
                project.failed_count,
                project.merged_count,
                project.build_attempts,
                project.test_attempts,
                to_json_list(&project.merge_order),
                project.current_merge,
                fmt_ts(&project.started_at),
                project.completed_at.as_ref().map(fmt_ts),
                project.error_message,
            ],
        )
        .context("insert_project")?;
        Ok(())
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT id, name, repo_path, build_command, test_command, phase, agent_count, \
             completed_count, failed_count, merged_count, build_attempts, test_attempts, \
             merge_order, current_merge, started_at, completed_at, error_message \
             FROM projects WHERE id = ?1",
            params![id],
            row_to_project,
        )
        .optional()
        .context("get_project")
    }

    pub fn list_projects(&self, limit: i64, offset: i64) -> Result<Vec<Project>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, name, repo_path, build_command, test_command, phase, agent_count, \
             completed_count, failed_count, merged_count, build_attempts, test_attempts, \
             merge_order, current_merge, started_at, completed_at, error_message \
             FROM projects ORDER BY started_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        stmt.query_map(params![limit, offset], row_to_project)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list_projects")
    }

    pub fn set_project_phase(&self, id: &str, phase: ProjectPhase) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET phase = ?1 WHERE id = ?2",
            params![phase.as_str(), id],
        )
        .context("set_project_phase")?;
        Ok(())
    }

    pub fn set_project_error(&self, id: &str, message: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET error_message = ?1 WHERE id = ?2",
            params![message, id],
        )
        .context("set_project_error")?;
        Ok(())
    }

    pub fn set_project_completed(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET phase = 'completed', completed_at = ?1 WHERE id = ?2",
            params![now_str(), id],
        )
        .context("set_project_completed")?;
        Ok(())
    }

    pub fn set_project_failed(&self, id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET phase = 'failed', completed_at = ?1, error_message = ?2 \
             WHERE id = ?3",
            params![now_str(), reason, id],
        )
        .context("set_project_failed")?;
        Ok(())
    }

    pub fn set_merge_order(&self, id: &str, order: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET merge_order = ?1 WHERE id = ?2",
            params![to_json_list(order), id],
        )
        .context("set_merge_order")?;
        Ok(())
    }

    pub fn set_current_merge(&self, id: &str, session_id: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET current_merge = ?1 WHERE id = ?2",
            params![session_id, id],
        )
        .context("set_current_merge")?;
        Ok(())
    }

    pub fn set_agent_count(&self, id: &str, count: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET agent_count = ?1 WHERE id = ?2",
            params![count, id],
        )
        .context("set_agent_count")?;
        Ok(())
    }

    pub fn increment_completed_count(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET completed_count = completed_count + 1 WHERE id = ?1",
            params![id],
        )
        .context("increment_completed_count")?;
        Ok(())
    }

    pub fn increment_failed_count(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET failed_count = failed_count + 1 WHERE id = ?1",
            params![id],
        )
        .context("increment_failed_count")?;
        Ok(())
    }

    pub fn increment_merged_count(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET merged_count = merged_count + 1 WHERE id = ?1",
            params![id],
        )
        .context("increment_merged_count")?;
        Ok(())
    }

    pub fn increment_build_attempts(&self, id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET build_attempts = build_attempts + 1 WHERE id = ?1",
            params![id],
        )
        .context("increment_build_attempts")?;
        conn.query_row(
            "SELECT build_attempts FROM projects WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .context("increment_build_attempts read back")
    }

    pub fn increment_test_attempts(&self, id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE projects SET test_attempts = test_attempts + 1 WHERE id = ?1",
            params![id],
        )
        .context("increment_test_attempts")?;
        conn.query_row(
            "SELECT test_attempts FROM projects WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .context("increment_test_attempts read back")
    }

    // ── Agent sessions ────────────────────────────────────────────────────

    pub fn insert_session(&self, session: &AgentSession) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO agent_sessions \
             (session_id, project_id, team_name, task, status, repo_path, branch, \
              worktree_path, output_filename, files_changed, merge_order_index, \
              merge_result, cost_usd, input_tokens, output_tokens, started_at, completed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                session.session_id,
                session.project_id,
                session.team_name,
                session.task,
                session.status.as_str(),
                session.repo_path,
                session.branch,
                session.worktree_path,
                session.output_filename,
                to_json_list(&session.files_changed),
                session.merge_order_index,
                session.merge_result.map(|m| m.as_str()),
                session.cost_usd,
                session.input_tokens,
                session.output_tokens,
                fmt_ts(&session.started_at),
                session.completed_at.as_ref().map(fmt_ts),
            ],
        )
        .context("insert_session")?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<AgentSession>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT session_id, project_id, team_name, task, status, repo_path, branch, \
             worktree_path, output_filename, files_changed, merge_order_index, \
             merge_result, cost_usd, input_tokens, output_tokens, started_at, completed_at \
             FROM agent_sessions WHERE session_id = ?1",
            params![session_id],
            row_to_session,
        )
        .optional()
        .context("get_session")
    }

    pub fn list_sessions_for_project(&self, project_id: &str) -> Result<Vec<AgentSession>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT session_id, project_id, team_name, task, status, repo_path, branch, \
             worktree_path, output_filename, files_changed, merge_order_index, \
             merge_result, cost_usd, input_tokens, output_tokens, started_at, completed_at \
             FROM agent_sessions WHERE project_id = ?1 ORDER BY started_at ASC",
        )?;
        stmt.query_map(params![project_id], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list_sessions_for_project")
    }

    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let completed_at = if status.is_terminal() {
            Some(now_str())
        } else {
            None
        };
        conn.execute(
            "UPDATE agent_sessions SET status = ?1, completed_at = COALESCE(?2, completed_at) \
             WHERE session_id = ?3",
            params![status.as_str(), completed_at, session_id],
        )
        .context("set_session_status")?;
        Ok(())
    }

    pub fn set_session_files_changed(&self, session_id: &str, files: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE agent_sessions SET files_changed = ?1 WHERE session_id = ?2",
            params![to_json_list(files), session_id],
        )
        .context("set_session_files_changed")?;
        Ok(())
    }

    pub fn set_session_merge_order_index(&self, session_id: &str, index: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE agent_sessions SET merge_order_index = ?1 WHERE session_id = ?2",
            params![index, session_id],
        )
        .context("set_session_merge_order_index")?;
        Ok(())
    }

    pub fn set_session_merge_result(
        &self,
        session_id: &str,
        result: MergeResult,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE agent_sessions SET merge_result = ?1 WHERE session_id = ?2",
            params![result.as_str(), session_id],
        )
        .context("set_session_merge_result")?;
        Ok(())
    }

    pub fn set_session_output_filename(&self, session_id: &str, filename: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE agent_sessions SET output_filename = ?1 WHERE session_id = ?2",
            params![filename, session_id],
        )
        .context("set_session_output_filename")?;
        Ok(())
    }

    pub fn set_session_usage(
        &self,
        session_id: &str,
        cost_usd: f64,
        input_tokens: i64,
        output_tokens: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE agent_sessions SET cost_usd = ?1, input_tokens = ?2, output_tokens = ?3 \
             WHERE session_id = ?4",
            params![cost_usd, input_tokens, output_tokens, session_id],
        )
        .context("set_session_usage")?;
        Ok(())
    }

    // ── Log entries ───────────────────────────────────────────────────────

    pub fn append_log(
        &self,
        project_id: Option<&str>,
        session_id: Option<&str>,
        level: LogLevel,
        message: &str,
        source: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO log_entries (project_id, session_id, timestamp, level, message, source) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![project_id, session_id, now_str(), level.as_str(), message, source],
        )
        .context("append_log")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_logs_for_project(&self, project_id: &str, limit: i64) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, message, source FROM log_entries \
             WHERE project_id = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        stmt.query_map(params![project_id, limit], row_to_log_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list_logs_for_project")
    }

    // ── Decision gates ────────────────────────────────────────────────────

    pub fn insert_decision_gate(&self, project_id: &str, kind: &str, payload: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO decision_gates (project_id, kind, payload, status, created_at) \
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![project_id, kind, payload, now_str()],
        )
        .context("insert_decision_gate")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_decision_status(&self, id: i64, status: DecisionStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let status_str = match status {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Approved => "approved",
            DecisionStatus::Rejected => "rejected",
        };
        conn.execute(
            "UPDATE decision_gates SET status = ?1 WHERE id = ?2",
            params![status_str, id],
        )
        .context("set_decision_status")?;
        Ok(())
    }

    pub fn list_pending_decisions(&self, project_id: &str) -> Result<Vec<DecisionGate>> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, project_id, kind, payload, status FROM decision_gates \
             WHERE project_id = ?1 AND status = 'pending' ORDER BY id ASC",
        )?;
        stmt.query_map(params![project_id], row_to_decision_gate)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list_pending_decisions")
    }

    // ── Aggregate statistics ──────────────────────────────────────────────

    pub fn stats(&self) -> Result<Stats> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let total_executions: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))
            .context("stats total_executions")?;
        let total_agents_run: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent_sessions", [], |r| r.get(0))
            .context("stats total_agents_run")?;
        let successes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM agent_sessions WHERE status = 'completed'",
                [],
                |r| r.get(0),
            )
            .context("stats successes")?;
        let success_rate = if total_agents_run > 0 {
            successes as f64 / total_agents_run as f64
        } else {
            0.0
        };
        let total_cost: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(cost_usd), 0.0) FROM agent_sessions",
                [],
                |r| r.get(0),
            )
            .context("stats total_cost")?;
        let last_execution: Option<String> = conn
            .query_row(
                "SELECT started_at FROM projects ORDER BY started_at DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()
            .context("stats last_execution")?;
        Ok(Stats {
            total_executions,
            total_agents_run,
            success_rate,
            total_cost,
            last_execution: last_execution.map(|s| parse_ts(&s)),
        })
    }

    pub fn cost_breakdown(&self) -> Result<CostBreakdown> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let total_cost: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(cost_usd), 0.0) FROM agent_sessions",
                [],
                |r| r.get(0),
            )
            .context("cost_breakdown total")?;

        let mut by_team = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT team_name, COALESCE(SUM(cost_usd), 0.0) FROM agent_sessions \
             GROUP BY team_name",
        )?;
        for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))? {
            let (team, cost) = row.context("cost_breakdown by_team row")?;
            by_team.insert(team, cost);
        }

        let mut by_day = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT substr(started_at, 1, 10), COALESCE(SUM(cost_usd), 0.0) FROM agent_sessions \
             GROUP BY substr(started_at, 1, 10)",
        )?;
        for row in stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))? {
            let (day, cost) = row.context("cost_breakdown by_day row")?;
            by_day.insert(day, cost);
        }

        Ok(CostBreakdown {
            total_cost,
            by_team,
            by_day,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentSession;
    use chrono::Utc;

    fn open() -> Db {
        let mut db = Db::open(":memory:").unwrap();
        db.migrate().unwrap();
        db
    }

    fn make_project(id: &str) -> Project {
        Project {
            id: id.to_string(),
            name: "demo".to_string(),
            repo_path: "/repo".to_string(),
            build_command: None,
            test_command: None,
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
        }
    }

    fn make_session(sid: &str, project_id: &str) -> AgentSession {
        AgentSession {
            session_id: sid.to_string(),
            project_id: Some(project_id.to_string()),
            team_name: "alpha".to_string(),
            task: "do the thing".to_string(),
            status: SessionStatus::Running,
            repo_path: "/repo".to_string(),
            branch: Some("team/alpha".to_string()),
            worktree_path: Some("/repo/.worktrees/alpha".to_string()),
            output_filename: None,
            files_changed: Vec::new(),
            merge_order_index: None,
            merge_result: None,
            cost_usd: None,
            input_tokens: None,
            output_tokens: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut db = Db::open(":memory:").unwrap();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn project_round_trips_through_insert_and_get() {
        let db = open();
        let project = make_project("proj-1");
        db.insert_project(&project).unwrap();
        let fetched = db.get_project("proj-1").unwrap().unwrap();
        assert_eq!(fetched.id, "proj-1");
        assert_eq!(fetched.phase, ProjectPhase::Created);
        assert_eq!(fetched.merge_order, Vec::<String>::new());
    }

    #[test]
    fn missing_project_returns_none_not_an_error() {
        let db = open();
        assert!(db.get_project("does-not-exist").unwrap().is_none());
    }

    #[test]
    fn set_merge_order_and_counters_persist() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();

        db.set_merge_order("proj-1", &["a".to_string(), "b".to_string()]).unwrap();

        let fetched = db.get_project("proj-1").unwrap().unwrap();
        assert_eq!(fetched.merge_order, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn session_round_trips_and_lists_under_its_project() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();
        db.insert_session(&make_session("sess-1", "proj-1")).unwrap();
        db.insert_session(&make_session("sess-2", "proj-1")).unwrap();

        let fetched = db.get_session("sess-1").unwrap().unwrap();
        assert_eq!(fetched.team_name, "alpha");
        assert_eq!(fetched.status, SessionStatus::Running);

        let sessions = db.list_sessions_for_project("proj-1").unwrap();
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn session_status_and_files_changed_update_in_place() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();
        db.insert_session(&make_session("sess-1", "proj-1")).unwrap();

        db.set_session_status("sess-1", SessionStatus::Completed).unwrap();
        db.set_session_files_changed("sess-1", &["a.rs".to_string()]).unwrap();
        db.set_session_merge_order_index("sess-1", 0).unwrap();
        db.set_session_merge_result("sess-1", MergeResult::Merged).unwrap();

        let fetched = db.get_session("sess-1").unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert_eq!(fetched.files_changed, vec!["a.rs".to_string()]);
        assert_eq!(fetched.merge_order_index, Some(0));
        assert_eq!(fetched.merge_result, Some(MergeResult::Merged));
    }

    #[test]
    fn build_and_test_attempt_counters_increment_and_return_new_value() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();

        assert_eq!(db.increment_build_attempts("proj-1").unwrap(), 1);
        assert_eq!(db.increment_build_attempts("proj-1").unwrap(), 2);
        assert_eq!(db.increment_test_attempts("proj-1").unwrap(), 1);
    }

    #[test]
    fn logs_are_appended_and_listed_most_recent_last() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();
        db.append_log(Some("proj-1"), None, LogLevel::Info, "started", Some("pipeline")).unwrap();
        db.append_log(Some("proj-1"), None, LogLevel::Warn, "hiccup", Some("pipeline")).unwrap();

        let logs = db.list_logs_for_project("proj-1", 10).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "started");
        assert_eq!(logs[1].level, LogLevel::Warn);
    }

    #[test]
    fn decision_gates_default_to_pending_and_are_listed() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();
        let id = db.insert_decision_gate("proj-1", "merge_conflict", "{}").unwrap();

        let pending = db.list_pending_decisions("proj-1").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);

        db.set_decision_status(id, DecisionStatus::Approved).unwrap();
        assert!(db.list_pending_decisions("proj-1").unwrap().is_empty());
    }

    #[test]
    fn stats_reflect_inserted_rows() {
        let db = open();
        db.insert_project(&make_project("proj-1")).unwrap();
        db.insert_session(&make_session("sess-1", "proj-1")).unwrap();
        db.set_session_status("sess-1", SessionStatus::Completed).unwrap();
        db.set_session_usage("sess-1", 1.5, 100, 200).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.total_agents_run, 1);
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.total_cost, 1.5);

        let breakdown = db.cost_breakdown().unwrap();
        assert_eq!(breakdown.total_cost, 1.5);
        assert_eq!(breakdown.by_team.get("alpha"), Some(&1.5));
    }
}
