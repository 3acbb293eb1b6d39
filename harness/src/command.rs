//! Running external build-system and helper commands.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Locate `program` on `PATH` (or accept it as an explicit path).
pub fn find_tool(program: impl AsRef<OsStr>) -> Result<PathBuf> {
    let program = program.as_ref();
    which::which(program).map_err(|err| {
        Error::Execution(format!(
            "required tool `{}` not found: {err}",
            program.to_string_lossy()
        ))
    })
}

/// Run `program args...` in `cwd` and fail unless it exits successfully.
pub async fn check_cmd<I, S>(program: impl AsRef<OsStr>, args: I, cwd: &Path) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = find_tool(program)?;
    let mut cmd = Command::new(&program);
    cmd.args(args).current_dir(cwd).kill_on_drop(true);
    let rendered = render(&cmd);
    debug!(command = %rendered, cwd = %cwd.display(), "running command");

    let status = cmd.status().await?;
    if !status.success() {
        return Err(Error::Command {
            command: rendered,
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Run a command and return its stdout, failing on a non-zero exit.
pub async fn check_output<I, S>(program: impl AsRef<OsStr>, args: I, cwd: &Path) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = find_tool(program)?;
    let mut cmd = Command::new(&program);
    cmd.args(args).current_dir(cwd).kill_on_drop(true);
    let rendered = render(&cmd);
    debug!(command = %rendered, cwd = %cwd.display(), "capturing command output");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(Error::Command {
            command: rendered,
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn render(cmd: &Command) -> String {
    let std = cmd.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command() {
        let dir = tempfile::tempdir().unwrap();
        check_cmd("true", std::iter::empty::<&str>(), dir.path())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_command_reports_status() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_cmd("false", std::iter::empty::<&str>(), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Command { ref command, .. } if command.ends_with("false")));
    }

    #[tokio::test]
    async fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = check_output("echo", ["hello"], dir.path()).await.unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn missing_tool_is_an_execution_error() {
        let err = find_tool("definitely-not-a-real-tool-4711").unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
    }
}
