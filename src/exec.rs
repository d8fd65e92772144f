//! Subprocess execution shared by the package and service managers

use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Run `program` with `args` and extra environment, returning stdout
///
/// A non-zero exit is reported as [`Error::CommandFailed`] with the captured
/// stderr; failing to spawn is an [`Error::Io`].
pub async fn run_command(program: &str, args: &[&str], envs: &[(&str, &str)]) -> Result<String> {
    let command_line = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    debug!(command = %command_line, "Running command");

    let output = Command::new(program)
        .args(args)
        .envs(envs.iter().copied())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: command_line,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let out = run_command("sh", &["-c", "echo hello"], &[])
            .await
            .expect("sh should run");
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn failing_command_reports_status_and_stderr() {
        let err = run_command("sh", &["-c", "echo boom >&2; exit 3"], &[])
            .await
            .unwrap_err();
        match err {
            Error::CommandFailed {
                command,
                status,
                stderr,
            } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(status, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn environment_is_passed_through() {
        let out = run_command("sh", &["-c", "echo $NODEADM_TEST_VAR"], &[("NODEADM_TEST_VAR", "set")])
            .await
            .expect("sh should run");
        assert_eq!(out.trim(), "set");
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let err = run_command("nodeadm-definitely-not-a-program", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
