//! Prompt construction for every flavor of agent the pipeline spawns: the
//! per-task session prompt (§4.3) and the three one-shot repair-agent
//! prompts (§4.4: conflict resolution, build fix, test fix).

/// Prompt for a regular agent session, built from `(team_name, task)`.
pub fn build_task_prompt(team_name: &str, task: &str) -> String {
    format!(
        "You are the \"{team_name}\" team. Complete the following task in this \
         repository working copy, making whatever code changes are necessary. \
         Leave the working tree in a state where your changes are ready to be \
         committed.\n\nTask:\n{task}\n"
    )
}

/// Prompt for the conflict-resolution agent, listing the conflicted paths.
pub fn build_conflict_prompt(paths: &[String]) -> String {
    let list = paths.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n");
    format!(
        "A git merge in this repository has left the following files with \
         unresolved conflict markers:\n\n{list}\n\n\
         Resolve every conflict by editing the files to keep the correct \
         combined behavior (do not simply pick one side blindly), remove all \
         conflict markers (<<<<<<<, =======, >>>>>>>), and stage the resolved \
         files with `git add`. Do not commit."
    )
}

/// Prompt for the build-fix repair agent, with truncated failure output.
pub fn build_build_fix_prompt(attempt: u32, tail_output: &str) -> String {
    format!(
        "The project's build command failed (fix attempt {attempt}). Fix only \
         the compilation errors shown below, with the smallest change that \
         makes the build succeed. Do not refactor unrelated code.\n\n\
         Build output (tail):\n```\n{tail_output}\n```\n"
    )
}

/// Prompt for the test-fix repair agent, with truncated failure output.
pub fn build_test_fix_prompt(attempt: u32, tail_output: &str) -> String {
    format!(
        "The project's test suite failed (fix attempt {attempt}). Fix the \
         implementation so the tests pass; do not modify the tests \
         themselves. Make the smallest change that makes the suite pass.\n\n\
         Test output (tail):\n```\n{tail_output}\n```\n"
    )
}

/// Truncate to the last `max_bytes` bytes on a UTF-8 char boundary, per the
/// build-fix loop's "last 4096 bytes" capture rule.
pub fn tail_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
