//! Scratch git repositories with a local directory standing in for the remote host.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Pushes into `<repo>/remote`, and compares the remote copy against the committed file.
pub const GLOBAL: &str = r#"
[global]
remote_root = "{git_root}/remote"
update_command = "mkdir -p $(dirname {remote_root}{remote_file}) && cp {local_file} {remote_root}{remote_file}"
remote_exists = "test -e {remote_root}{remote_file} && echo yes || echo no"
orig_file_command = "cp {remote_root}{remote_file} {git_root}/orig.tmp && echo orig.tmp"
remote_diff = "git show HEAD:{repo_file} | diff - {orig_file}"

["/index.html"]
"#;

pub fn has_git() -> bool {
    let found = which::which("git").is_ok();
    if !found {
        eprintln!("git not found, skipping");
    }
    found
}

pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.org")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.org")
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

pub struct GitRepo {
    dir: TempDir,
}

impl GitRepo {
    pub fn init() -> Self {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "-q"]);
        Self { dir }
    }

    /// A repository with the remote configuration and one committed site file.
    pub fn with_site(content: &str) -> Self {
        let repo = Self::init();
        repo.write("global.toml", GLOBAL);
        repo.write("sites/blog/files/index.html", content);
        repo.git(&["add", "."]);
        repo.git(&["commit", "-q", "--no-verify", "-m", "initial"]);
        repo
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self, args: &[&str]) {
        git(self.root(), args);
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.root().join(relative)).ok()
    }
}
