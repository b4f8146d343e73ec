use anyhow::Context;
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Run a command from an array, collecting its trimmed stdout.
/// Fails if the command exits unsuccessfully or writes anything to stderr.
pub fn run_command<'a, Args: AsRef<[&'a str]>>(args: Args) -> anyhow::Result<String> {
    Ok(run_command_untrimmed(args)?.trim().to_string())
}

/// [`run_command`] for output where leading whitespace is significant.
pub fn run_command_untrimmed<'a, Args: AsRef<[&'a str]>>(args: Args) -> anyhow::Result<String> {
    let args = args.as_ref();
    let mut cmd = Command::new(args[0]);
    cmd.args(&args[1..]);
    tracing::debug!("+ {cmd:?}");

    let out = cmd
        .output()
        .with_context(|| format!("cannot run `{}`", args.join(" ")))?;
    let output = ShellOutput::new(&out.stdout, &out.stderr, out.status);
    output
        .check()
        .with_context(|| format!("command `{}` failed", args.join(" ")))?;
    Ok(output.stdout)
}

/// Run `command` through `sh -c` in `cwd`. The output is returned as-is, callers decide
/// what counts as a failure.
pub fn run_shell(command: &str, cwd: &Path) -> anyhow::Result<ShellOutput> {
    tracing::debug!("+ sh -c {command:?} (in {})", cwd.display());
    let out = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("cannot spawn shell for `{command}`"))?;
    Ok(ShellOutput::new(&out.stdout, &out.stderr, out.status))
}

#[derive(Debug)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl ShellOutput {
    fn new(stdout: &[u8], stderr: &[u8], status: ExitStatus) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
            status,
        }
    }

    /// First line of stdout, without the line terminator.
    pub fn first_line(&self) -> &str {
        self.stdout.lines().next().unwrap_or("").trim_end_matches('\r')
    }

    pub fn has_errors(&self) -> bool {
        !self.stderr.trim().is_empty()
    }

    /// Anything on stderr is treated as a failure, as is a non-zero exit code.
    pub fn check(&self) -> anyhow::Result<()> {
        if self.has_errors() {
            return Err(anyhow::anyhow!(
                "command reported errors (exit code {:?}). STDERR:\n{}",
                self.status.code(),
                self.stderr.trim_end()
            ));
        }
        if !self.status.success() {
            return Err(anyhow::anyhow!(
                "command failed with exit code {:?}. STDOUT:\n{}",
                self.status.code(),
                self.stdout.trim_end()
            ));
        }
        Ok(())
    }
}
