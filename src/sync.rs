use crate::config::{Config, ConfigError, SITE_FILES_DIR};
use crate::git::StagedChanges;
use crate::utils::run_shell;
use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

#[derive(Debug)]
pub enum SyncError {
    /// The remote file was modified without going through this repository, pushing the
    /// local file would overwrite those changes.
    NotSynced { file: PathBuf },
    /// A command failed or the configuration is incomplete.
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for SyncError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(error)
    }
}

impl From<ConfigError> for SyncError {
    fn from(error: ConfigError) -> Self {
        Self::Failed(error.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The file is not below `sites/<site>/files`.
    OutsideFileTree,
    /// No section of the site or global configuration matches the file.
    NotMarked,
    /// The update command pushed the file to `remote_file`.
    Pushed { remote_file: String },
}

/// A file below `sites/<site>/files`.
#[derive(Debug, PartialEq, Eq)]
struct SiteFile {
    site: String,
    /// Path inside the site file tree, with a leading `/`. This is the sync rule name.
    relative_path: String,
}

impl SiteFile {
    fn locate(path: &Path, sites_root: &Path) -> Option<Self> {
        let mut components = path.strip_prefix(sites_root).ok()?.components();
        let site = match components.next()? {
            Component::Normal(site) => site.to_string_lossy().to_string(),
            _ => return None,
        };
        if components.next()? != Component::Normal(SITE_FILES_DIR.as_ref()) {
            return None;
        }
        let relative_path = slash_path(components.as_path());
        if relative_path == "/" {
            return None;
        }
        Some(Self {
            site,
            relative_path,
        })
    }
}

fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Pushes staged site files to their remote destination, one at a time.
pub struct SiteSync<'a> {
    config: &'a Config,
    modified_sites: BTreeSet<String>,
}

impl<'a> SiteSync<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            modified_sites: BTreeSet::new(),
        }
    }

    /// Synchronizes every staged file below the sites root, stopping at the first error.
    /// Marked files with unstaged changes abort the run before anything is pushed.
    pub fn sync_changes(
        &mut self,
        changes: &StagedChanges,
    ) -> Result<Vec<(PathBuf, SyncOutcome)>, SyncError> {
        let config = self.config;
        let sites_root = config.sites_root();

        // The local file of these is not what gets committed, refuse before pushing anything.
        for path in changes.partially_staged.iter().filter(|p| p.starts_with(sites_root)) {
            if let Some(file) = SiteFile::locate(path, sites_root) {
                if config.has_section(&file.site, &file.relative_path) {
                    return Err(anyhow::anyhow!(
                        "{} has changes that are not staged; stage or stash them so that the \
                        pushed file matches the commit",
                        path.display()
                    )
                    .into());
                }
            }
        }

        let mut outcomes = Vec::new();
        for path in changes.to_update.iter().filter(|p| p.starts_with(sites_root)) {
            let outcome = self.sync_file(path)?;
            outcomes.push((path.clone(), outcome));
        }

        for path in changes.to_delete.iter().filter(|p| p.starts_with(sites_root)) {
            if let Some(file) = SiteFile::locate(path, sites_root) {
                if config.has_section(&file.site, &file.relative_path) {
                    tracing::warn!(
                        "{} - deleted locally, the remote copy is left untouched",
                        path.display()
                    );
                }
            }
        }

        Ok(outcomes)
    }

    pub fn sync_file(&mut self, path: &Path) -> Result<SyncOutcome, SyncError> {
        let Some(file) = SiteFile::locate(path, self.config.sites_root()) else {
            tracing::info!("{} - not part of a site file tree", path.display());
            return Ok(SyncOutcome::OutsideFileTree);
        };

        if !self.modified_sites.is_empty() && !self.modified_sites.contains(&file.site) {
            tracing::warn!(
                "files of more than one site are modified in this commit (`{}` and {:?})",
                file.site,
                self.modified_sites
            );
        }
        self.modified_sites.insert(file.site.clone());

        if !self.config.has_section(&file.site, &file.relative_path) {
            println!("{} - Not marked to be synced.", path.display());
            return Ok(SyncOutcome::NotMarked);
        }

        let remote_file = self.config.destination(&file.site, &file.relative_path)?;
        let context = self.context(&file, path, &remote_file)?;

        // Check that the file was correctly synced before overwriting it
        if self.remote_file_exists(&file.site, &context)?
            && !self.check_synced(&file.site, &context)?
        {
            return Err(SyncError::NotSynced {
                file: path.to_path_buf(),
            });
        }

        println!("{} - Syncing.", file.relative_path);
        let profile = self.config.profile(&file.site)?;
        let command = profile
            .commands
            .update
            .render(&context)
            .map_err(anyhow::Error::from)?;
        run_shell(&command, self.config.git_root())?
            .check()
            .with_context(|| format!("cannot push {} to {remote_file}", path.display()))?;

        Ok(SyncOutcome::Pushed { remote_file })
    }

    fn context(
        &self,
        file: &SiteFile,
        local_file: &Path,
        remote_file: &str,
    ) -> Result<BTreeMap<String, String>, SyncError> {
        let git_root = self.config.git_root();
        let repo_file = local_file
            .strip_prefix(git_root)
            .map(|path| slash_path(path).trim_start_matches('/').to_string())
            .with_context(|| format!("{} is outside of the repository", local_file.display()))?;

        let mut context = self.config.profile(&file.site)?.items.clone();
        context.extend([
            ("git_root".to_string(), git_root.to_string_lossy().to_string()),
            (
                "site_root".to_string(),
                self.config.site_root(&file.site).to_string_lossy().to_string(),
            ),
            ("site".to_string(), file.site.clone()),
            ("local_file".to_string(), local_file.to_string_lossy().to_string()),
            ("remote_file".to_string(), remote_file.to_string()),
            ("repo_file".to_string(), repo_file),
        ]);
        Ok(context)
    }

    /// Runs `remote_exists`, which must print `yes` when the remote file exists.
    fn remote_file_exists(
        &self,
        site: &str,
        context: &BTreeMap<String, String>,
    ) -> anyhow::Result<bool> {
        let profile = self.config.profile(site)?;
        let command = profile.commands.remote_exists.render(context)?;
        let output = run_shell(&command, self.config.git_root())?;
        // An unreachable remote shows up here, and is fatal.
        output
            .check()
            .with_context(|| format!("cannot check whether `{}` exists", context["remote_file"]))?;
        Ok(output.first_line() == "yes")
    }

    /// Fetches the remote file with `orig_file_command` and compares it with `remote_diff`.
    /// Any output of the comparison, or a failing exit code, means the remote has drifted.
    fn check_synced(
        &self,
        site: &str,
        context: &BTreeMap<String, String>,
    ) -> anyhow::Result<bool> {
        let profile = self.config.profile(site)?;
        let command = profile.commands.orig_file.render(context)?;
        let output = run_shell(&command, self.config.git_root())?;
        output
            .check()
            .with_context(|| format!("cannot fetch remote copy of `{}`", context["remote_file"]))?;
        let orig_file = output.first_line().trim();
        if orig_file.is_empty() {
            return Err(anyhow::anyhow!(
                "`{command}` did not print the path of the fetched copy"
            ));
        }
        let orig_file = self.config.git_root().join(orig_file);
        let _cleanup = RemoveOnDrop::new(orig_file.clone());

        let mut context = context.clone();
        context.insert(
            "orig_file".to_string(),
            orig_file.to_string_lossy().to_string(),
        );
        let command = profile.commands.remote_diff.render(&context)?;
        let diff = run_shell(&command, self.config.git_root())?;
        if diff.has_errors() {
            tracing::warn!("`{command}` reported errors: {}", diff.stderr.trim_end());
        }
        Ok(diff.stdout.is_empty() && !diff.has_errors() && diff.status.success())
    }
}

/// Removes the fetched copy of a remote file once the comparison is over.
struct RemoveOnDrop {
    path: PathBuf,
}

impl RemoveOnDrop {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            if error.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("cannot remove {}: {error}", self.path.display());
            }
        }
    }
}
