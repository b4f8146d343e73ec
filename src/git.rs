use crate::utils::{run_command, run_command_untrimmed};
use anyhow::Context;
use std::path::{Path, PathBuf};

/// Files staged for the commit being created, as absolute paths.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StagedChanges {
    /// Added or modified files, whose new content must be pushed.
    pub to_update: Vec<PathBuf>,
    /// Deleted files.
    pub to_delete: Vec<PathBuf>,
    /// Staged files whose working tree copy differs from the index. Their local file is
    /// not what the commit contains.
    pub partially_staged: Vec<PathBuf>,
}

/// Top-level directory of the repository containing the current directory.
pub fn find_git_root() -> anyhow::Result<PathBuf> {
    let root = run_command(["git", "rev-parse", "--show-toplevel"])
        .context("cannot find the root of the git repository")?;
    Ok(PathBuf::from(root))
}

/// Reads the staged changes with `git status`. Anything git writes to stderr aborts.
pub fn staged_changes(git_root: &Path) -> anyhow::Result<StagedChanges> {
    let root = git_root.to_string_lossy();
    let status = run_command_untrimmed([
        "git",
        "-C",
        &*root,
        "--no-pager",
        "status",
        "--porcelain",
        "-z",
    ])
    .context("cannot read git status")?;
    parse_status(&status, git_root)
}

/// Parses `git status --porcelain -z` output. The index column says what the commit
/// contains; a file is only pushed when its working tree column is clean, otherwise the
/// local file differs from the committed content.
pub fn parse_status(output: &str, git_root: &Path) -> anyhow::Result<StagedChanges> {
    let mut changes = StagedChanges::default();
    let mut records = output.split('\0').filter(|record| !record.is_empty());

    while let Some(record) = records.next() {
        let (code, path) = record
            .split_at_checked(3)
            .with_context(|| format!("malformed git status entry `{record}`"))?;
        let mut code = code.chars();
        let index = code.next().unwrap_or(' ');
        let worktree = code.next().unwrap_or(' ');
        let path = git_root.join(path);

        // Renames and copies are followed by the source path.
        if matches!(index, 'R' | 'C') {
            let source = records
                .next()
                .with_context(|| format!("missing source path for `{record}`"))?;
            if index == 'R' {
                changes.to_delete.push(git_root.join(source));
            }
        }
        match (index, worktree) {
            ('A' | 'M' | 'R' | 'C', ' ') => changes.to_update.push(path),
            ('A' | 'M' | 'R' | 'C', 'M' | 'D' | 'T') => changes.partially_staged.push(path),
            ('D', _) => changes.to_delete.push(path),
            _ => {}
        }
    }

    Ok(changes)
}
