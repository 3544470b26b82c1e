//! Thin wrapper around the `git` CLI.
//!
//! Every call shells out with `-C <dir>` rather than changing the process's
//! working directory, so a single `Git` handle is safe to share across
//! concurrently-running sessions.

use std::process::Command;

use anyhow::{anyhow, Context, Result};

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

pub struct Git {
    pub repo_path: String,
}

impl Git {
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn exec(&self, dir: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .with_context(|| format!("failed to spawn git -C {dir} {}", args.join(" ")))?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    fn exec_repo(&self, args: &[&str]) -> Result<ExecResult> {
        let repo = self.repo_path.clone();
        self.exec(&repo, args)
    }

    pub fn rev_parse_head(&self) -> Result<String> {
        self.rev_parse("HEAD")
    }

    pub fn rev_parse(&self, refname: &str) -> Result<String> {
        let result = self.exec_repo(&["rev-parse", refname])?;
        if !result.success() {
            return Err(anyhow!(
                "git rev-parse {refname} failed: {}",
                result.combined_output()
            ));
        }
        Ok(result.stdout.trim().to_string())
    }

    pub fn current_branch(&self) -> Result<String> {
        let result = self.exec_repo(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !result.success() {
            return Err(anyhow!(
                "git rev-parse --abbrev-ref HEAD failed: {}",
                result.combined_output()
            ));
        }
        Ok(result.stdout.trim().to_string())
    }

    /// Create `branch` pointing at the repo's current HEAD, then add an
    /// auxiliary checkout of it at `worktree_path`.
    pub fn create_worktree(&self, branch: &str, worktree_path: &str) -> Result<()> {
        let branch_result = self.exec_repo(&["branch", branch, "HEAD"])?;
        if !branch_result.success() {
            return Err(anyhow!(
                "git branch {branch} HEAD failed: {}",
                branch_result.combined_output()
            ));
        }
        let wt_result = self.exec_repo(&["worktree", "add", worktree_path, branch])?;
        if !wt_result.success() {
            // Roll back the partially-created branch.
            let _ = self.exec_repo(&["branch", "-D", branch]);
            return Err(anyhow!(
                "git worktree add {worktree_path} {branch} failed: {}",
                wt_result.combined_output()
            ));
        }
        Ok(())
    }

    /// List auxiliary checkouts whose branch begins with `team/`.
    pub fn list_team_worktrees(&self) -> Result<Vec<(String, String)>> {
        let result = self.exec_repo(&["worktree", "list", "--porcelain"])?;
        if !result.success() {
            return Err(anyhow!(
                "git worktree list failed: {}",
                result.combined_output()
            ));
        }
        let mut out = Vec::new();
        let mut cur_path: Option<String> = None;
        for line in result.stdout.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                cur_path = Some(p.to_string());
            } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                if b.starts_with("team/") {
                    if let Some(path) = cur_path.take() {
                        out.push((b.to_string(), path));
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn remove_worktree(&self, worktree_path: &str) -> Result<()> {
        let result = self.exec_repo(&["worktree", "remove", "--force", worktree_path])?;
        if !result.success() && !result.combined_output().contains("is not a working tree") {
            return Err(anyhow!(
                "git worktree remove --force {worktree_path} failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let result = self.exec_repo(&["rev-parse", "--verify", "--quiet", branch])?;
        Ok(result.success())
    }

    pub fn delete_branch_force(&self, branch: &str) -> Result<()> {
        let result = self.exec_repo(&["branch", "-D", branch])?;
        if !result.success() && !result.combined_output().contains("not found") {
            return Err(anyhow!(
                "git branch -D {branch} failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }

    pub fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        let result = self.exec_repo(&["merge-base", a, b])?;
        if !result.success() {
            return Err(anyhow!(
                "git merge-base {a} {b} failed: {}",
                result.combined_output()
            ));
        }
        Ok(result.stdout.trim().to_string())
    }

    pub fn diff_range(&self, base: &str, tip: &str) -> Result<String> {
        let result = self.exec_repo(&["diff", &format!("{base}..{tip}")])?;
        if !result.success() {
            return Err(anyhow!(
                "git diff {base}..{tip} failed: {}",
                result.combined_output()
            ));
        }
        Ok(result.stdout)
    }

    pub fn diff_stat_range(&self, base: &str, tip: &str) -> Result<String> {
        let result = self.exec_repo(&["diff", "--stat", &format!("{base}..{tip}")])?;
        if !result.success() {
            return Err(anyhow!(
                "git diff --stat {base}..{tip} failed: {}",
                result.combined_output()
            ));
        }
        Ok(result.stdout)
    }

    pub fn diff_name_only_range(&self, base: &str, tip: &str) -> Result<Vec<String>> {
        let result = self.exec_repo(&["diff", "--name-only", &format!("{base}..{tip}")])?;
        if !result.success() {
            return Err(anyhow!(
                "git diff --name-only {base}..{tip} failed: {}",
                result.combined_output()
            ));
        }
        Ok(result
            .stdout
            .lines()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Non-fast-forward merge of `branch` into the repo's current branch.
    pub fn merge_no_ff(&self, branch: &str, message: &str) -> Result<ExecResult> {
        self.exec_repo(&["merge", "--no-ff", "-m", message, branch])
    }

    pub fn abort_merge(&self) -> Result<ExecResult> {
        self.exec_repo(&["merge", "--abort"])
    }

    /// Paths still carrying unresolved conflict markers (`git status`'s `U`
    /// states), relative to the repo root.
    pub fn conflicted_paths(&self) -> Result<Vec<String>> {
        let result = self.exec_repo(&["diff", "--name-only", "--diff-filter=U"])?;
        if !result.success() {
            return Err(anyhow!(
                "git diff --diff-filter=U failed: {}",
                result.combined_output()
            ));
        }
        Ok(result
            .stdout
            .lines()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    pub fn stage_all(&self) -> Result<()> {
        let result = self.exec_repo(&["add", "-A"])?;
        if !result.success() {
            return Err(anyhow!("git add -A failed: {}", result.combined_output()));
        }
        Ok(())
    }

    pub fn status_porcelain(&self) -> Result<String> {
        let result = self.exec_repo(&["status", "--porcelain"])?;
        if !result.success() {
            return Err(anyhow!(
                "git status --porcelain failed: {}",
                result.combined_output()
            ));
        }
        Ok(result.stdout)
    }

    /// Commit whatever is currently staged. Returns `false` if nothing was
    /// staged (no commit made).
    pub fn commit(&self, message: &str) -> Result<bool> {
        if self.status_porcelain()?.trim().is_empty() {
            return Ok(false);
        }
        let result = self.exec_repo(&["commit", "-m", message])?;
        if !result.success() {
            return Err(anyhow!("git commit failed: {}", result.combined_output()));
        }
        Ok(true)
    }

    /// Commit a conflict resolution: try `--no-edit` (keeps the merge's
    /// in-progress message) and fall back to a fresh message.
    pub fn commit_merge_resolution(&self, fallback_message: &str) -> Result<bool> {
        let no_edit = self.exec_repo(&["commit", "--no-edit"])?;
        if no_edit.success() {
            return Ok(true);
        }
        if self.status_porcelain()?.trim().is_empty() {
            return Ok(false);
        }
        let result = self.exec_repo(&["commit", "-m", fallback_message])?;
        if !result.success() {
            return Err(anyhow!(
                "git commit (fallback) failed: {}",
                result.combined_output()
            ));
        }
        Ok(true)
    }

    pub fn push(&self, branch: &str) -> Result<ExecResult> {
        self.exec_repo(&["push", "origin", branch])
    }
}
