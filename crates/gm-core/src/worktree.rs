//! Worktree Manager (spec §4.1): create/list/diff/merge/discard isolated
//! repository checkouts, one dedicated branch per agent session.

use anyhow::{anyhow, Context, Result};

use crate::git::Git;

/// One auxiliary checkout, as returned by `create`/`list`.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub branch: String,
    pub path: String,
}

/// Outcome of `merge`.
#[derive(Debug)]
pub enum MergeOutcome {
    Ok,
    Conflict { paths: Vec<String> },
}

fn branch_name(sid: &str) -> String {
    format!("team/{sid}")
}

fn worktree_path(repo: &str, sid: &str) -> String {
    format!("{}/.worktrees/{sid}", repo.trim_end_matches('/'))
}

/// Wraps a host repository path; every operation is additionally
/// parameterized by a session-id.
pub struct WorktreeManager {
    repo_path: String,
}

impl WorktreeManager {
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn git(&self) -> Git {
        Git::new(self.repo_path.clone())
    }

    /// `create(sid)`: derive branch/worktree path, capture the current base,
    /// branch off HEAD, and add the auxiliary checkout.
    pub fn create(&self, sid: &str) -> Result<Worktree> {
        let git = self.git();
        let branch = branch_name(sid);
        let path = worktree_path(&self.repo_path, sid);
        std::fs::create_dir_all(
            std::path::Path::new(&path)
                .parent()
                .ok_or_else(|| anyhow!("worktree path {path} has no parent"))?,
        )
        .with_context(|| format!("failed to create .worktrees directory for {path}"))?;
        git.create_worktree(&branch, &path)
            .with_context(|| format!("create worktree for session {sid}"))?;
        Ok(Worktree { branch, path })
    }

    /// `list()`: enumerate auxiliary checkouts on `team/*` branches.
    pub fn list(&self) -> Result<Vec<Worktree>> {
        Ok(self
            .git()
            .list_team_worktrees()?
            .into_iter()
            .map(|(branch, path)| Worktree { branch, path })
            .collect())
    }

    fn merge_base_and_tip(&self, sid: &str) -> Result<(String, String)> {
        let git = self.git();
        let branch = branch_name(sid);
        let head = git.rev_parse_head()?;
        let base = git.merge_base(&head, &branch)?;
        Ok((base, branch))
    }

    /// `diff(sid)`: unified diff from merge-base to branch tip, plus the base.
    pub fn diff(&self, sid: &str) -> Result<(String, String)> {
        let (base, branch) = self.merge_base_and_tip(sid)?;
        let diff = self.git().diff_range(&base, &branch)?;
        Ok((diff, base))
    }

    /// `stat(sid)`: name-stat summary from merge-base to branch tip, plus base.
    pub fn stat(&self, sid: &str) -> Result<(String, String)> {
        let (base, branch) = self.merge_base_and_tip(sid)?;
        let stat = self.git().diff_stat_range(&base, &branch)?;
        Ok((stat, base))
    }

    /// `files_changed(sid)`: the set of paths modified from base to tip.
    pub fn files_changed(&self, sid: &str) -> Result<Vec<String>> {
        let (base, branch) = self.merge_base_and_tip(sid)?;
        self.git().diff_name_only_range(&base, &branch)
    }

    /// `merge(sid)`: remove the auxiliary checkout (force), then
    /// non-fast-forward merge the session branch; delete the branch on
    /// success. Conflicts are reported distinctly from other failures.
    pub fn merge(&self, sid: &str) -> Result<MergeOutcome> {
        let git = self.git();
        let branch = branch_name(sid);
        let path = worktree_path(&self.repo_path, sid);

        git.remove_worktree(&path)
            .with_context(|| format!("remove worktree before merge for session {sid}"))?;

        let message = format!("Merge session {sid}");
        let result = git.merge_no_ff(&branch, &message)?;
        if result.success() {
            git.delete_branch_force(&branch)
                .with_context(|| format!("delete branch {branch} after successful merge"))?;
            return Ok(MergeOutcome::Ok);
        }

        let conflicts = git.conflicted_paths().unwrap_or_default();
        if !conflicts.is_empty() {
            return Ok(MergeOutcome::Conflict { paths: conflicts });
        }
        Err(anyhow!(
            "git merge --no-ff {branch} failed (no conflicts detected): {}",
            result.combined_output()
        ))
    }

    /// `discard(sid)`: force-remove the checkout and force-delete the
    /// branch. Idempotent — missing artifacts are not errors.
    pub fn discard(&self, sid: &str) -> Result<()> {
        let git = self.git();
        let branch = branch_name(sid);
        let path = worktree_path(&self.repo_path, sid);
        if let Err(e) = git.remove_worktree(&path) {
            tracing::warn!(sid, error = %e, "discard: worktree remove failed (continuing)");
        }
        if let Err(e) = git.delete_branch_force(&branch) {
            tracing::warn!(sid, error = %e, "discard: branch delete failed (continuing)");
        }
        Ok(())
    }

    /// Undo an in-progress conflicted merge in the host repository.
    pub fn abort_merge(&self) -> Result<()> {
        let result = self.git().abort_merge()?;
        if !result.success() {
            return Err(anyhow!(
                "git merge --abort failed: {}",
                result.combined_output()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Git;

    fn init_repo(dir: &std::path::Path) {
        let git = Git::new(dir.to_string_lossy().into_owned());
        git.exec(dir.to_str().unwrap(), &["init", "-q"]).unwrap();
        git.exec(dir.to_str().unwrap(), &["config", "user.email", "t@example.com"])
            .unwrap();
        git.exec(dir.to_str().unwrap(), &["config", "user.name", "T"])
            .unwrap();
        std::fs::write(dir.join("README.md"), "hi\n").unwrap();
        git.stage_all().unwrap();
        git.commit("initial").unwrap();
    }

    #[test]
    fn create_then_discard_is_a_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let mgr = WorktreeManager::new(tmp.path().to_string_lossy().into_owned());

        let before = mgr.list().unwrap().len();
        let wt = mgr.create("s1").unwrap();
        assert!(std::path::Path::new(&wt.path).exists());
        assert_eq!(mgr.list().unwrap().len(), before + 1);

        mgr.discard("s1").unwrap();
        assert!(!std::path::Path::new(&wt.path).exists());
        assert_eq!(mgr.list().unwrap().len(), before);
    }

    #[test]
    fn discard_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let mgr = WorktreeManager::new(tmp.path().to_string_lossy().into_owned());
        mgr.create("s1").unwrap();
        mgr.discard("s1").unwrap();
        // Second call on an already-discarded session is still Ok.
        mgr.discard("s1").unwrap();
    }

    #[test]
    fn disjoint_changes_merge_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let mgr = WorktreeManager::new(tmp.path().to_string_lossy().into_owned());

        let wt = mgr.create("s1").unwrap();
        std::fs::write(std::path::Path::new(&wt.path).join("a.txt"), "a\n").unwrap();
        let git = Git::new(wt.path.clone());
        git.stage_all().unwrap();
        git.commit("add a.txt").unwrap();

        let files = mgr.files_changed("s1").unwrap();
        assert_eq!(files, vec!["a.txt".to_string()]);

        match mgr.merge("s1").unwrap() {
            MergeOutcome::Ok => {}
            MergeOutcome::Conflict { paths } => panic!("unexpected conflict: {paths:?}"),
        }
        assert!(tmp.path().join("a.txt").exists());
        assert!(!Git::new(tmp.path().to_string_lossy().into_owned())
            .branch_exists("team/s1")
            .unwrap());
    }
}
