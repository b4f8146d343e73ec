use crate::utils::run_command;
use anyhow::Context;
use std::path::{Path, PathBuf};

const HOOK_MARKER: &str = "# installed by sitesync";

fn hook_script() -> String {
    format!("#!/bin/sh\n{HOOK_MARKER}\nexec sitesync\n")
}

/// Path of the pre-commit hook, honoring `core.hooksPath` through `git rev-parse`.
pub fn pre_commit_hook_path(git_root: &Path) -> anyhow::Result<PathBuf> {
    let root = git_root.to_string_lossy();
    let hooks_dir = run_command(["git", "-C", &*root, "rev-parse", "--git-path", "hooks"])
        .context("cannot locate the git hooks directory")?;
    Ok(git_root.join(hooks_dir).join("pre-commit"))
}

/// Writes a pre-commit hook running `sitesync`. An existing hook that was not written by
/// this tool is only replaced with `force`.
pub fn install_pre_commit(hook_path: &Path, force: bool) -> anyhow::Result<()> {
    if hook_path.exists() && !force {
        let existing = std::fs::read_to_string(hook_path).unwrap_or_default();
        if !existing.contains(HOOK_MARKER) {
            return Err(anyhow::anyhow!(
                "{} already exists; use --force to replace it",
                hook_path.display()
            ));
        }
    }

    if let Some(dir) = hook_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }
    std::fs::write(hook_path, hook_script())
        .with_context(|| format!("cannot write {}", hook_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(hook_path)
            .context("cannot read hook metadata")?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(hook_path, perms).context("cannot make hook executable")?;
    }

    Ok(())
}
