use anyhow::Context;
use clap::Parser;
use sitesync::config::{Config, GLOBAL_CONFIG_FILE, SITES_DIR, write_template};
use sitesync::git::{find_git_root, staged_changes};
use sitesync::hook::{install_pre_commit, pre_commit_hook_path};
use sitesync::sync::{SiteSync, SyncError};

/// Pushes committed site files to their remote location, refusing to overwrite remote
/// files that were changed outside of the repository.
#[derive(clap::Parser)]
#[clap(version)]
struct Args {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[clap(subcommand)]
    cmd: Option<Command>,
}

#[derive(clap::Parser)]
enum Command {
    /// Create a starter global configuration and the sites directory.
    Init,
    /// Install `sitesync` as the pre-commit hook of the current repository.
    Install {
        /// Replace an existing pre-commit hook
        #[clap(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let git_root = find_git_root()?;
    match args.cmd {
        None => run_hook(&git_root)?,
        Some(Command::Init) => {
            let config_path = git_root.join(GLOBAL_CONFIG_FILE);
            if config_path.exists() {
                return Err(anyhow::anyhow!(
                    "{} already exists, not doing anything with it",
                    config_path.display()
                ));
            }
            write_template(&config_path)?;
            println!("Created config file at {}", config_path.display());

            let sites_root = git_root.join(SITES_DIR);
            std::fs::create_dir_all(&sites_root)
                .with_context(|| format!("cannot create {}", sites_root.display()))?;
            println!("Put each site under {}/<site>/files", sites_root.display());
        }
        Some(Command::Install { force }) => {
            let hook_path = pre_commit_hook_path(&git_root)?;
            install_pre_commit(&hook_path, force)?;
            println!("Installed pre-commit hook at {}", hook_path.display());
        }
    }

    Ok(())
}

fn run_hook(git_root: &std::path::Path) -> anyhow::Result<()> {
    for program in ["git", "sh"] {
        which::which(program).with_context(|| format!("`{program}` was not found in PATH"))?;
    }

    let config = Config::load(git_root).context("cannot load sitesync configuration")?;
    let changes = staged_changes(git_root)?;

    let mut sync = SiteSync::new(&config);
    match sync.sync_changes(&changes) {
        Ok(_) => {}
        Err(SyncError::NotSynced { file }) => {
            eprintln!(
                "File wasn't synced: someone probably modified it on the remote location \
                without using this repository. Synchronizing it now would result in data loss.\n{}",
                file.display()
            );
            std::process::exit(1);
        }
        Err(SyncError::Failed(error)) => {
            eprintln!("Sync failure: {error:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn setup_logging(verbose: u8) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
