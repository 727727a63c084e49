//! Process spawning and termination for service units

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::units::Service;

/// Spawn one command line of a service (ExecStart=, ExecStop=, ExecReload=)
pub fn spawn_command(
    service: &Service,
    command_line: &str,
    extra_env: &[(&str, String)],
) -> Result<Child, SpawnError> {
    let command_line = substitute_specifiers(command_line, service);
    let (program, args) = parse_command(&command_line)?;

    let mut cmd = Command::new(&program);
    cmd.args(&args);

    if let Some(wd) = &service.service.working_directory {
        cmd.current_dir(wd);
    }
    for (key, value) in &service.service.environment {
        cmd.env(key, value);
    }
    for (key, value) in extra_env {
        cmd.env(key, value);
    }

    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::inherit());
    cmd.stderr(Stdio::inherit());

    cmd.spawn()
        .map_err(|e| SpawnError::Spawn(format!("{}: {}", program, e)))
}

/// Run a command line to completion, failing on non-zero exit
pub async fn run_command(
    service: &Service,
    command_line: &str,
    extra_env: &[(&str, String)],
) -> Result<(), SpawnError> {
    let mut child = spawn_command(service, command_line, extra_env)?;
    let status = child
        .wait()
        .await
        .map_err(|e| SpawnError::Spawn(e.to_string()))?;
    check_status(command_line, status)
}

/// Map an exit status to an error when it is not success
pub fn check_status(command_line: &str, status: ExitStatus) -> Result<(), SpawnError> {
    if status.success() {
        Ok(())
    } else {
        Err(SpawnError::Exited {
            command: command_line.to_string(),
            code: status.code(),
        })
    }
}

/// SIGTERM the child, then SIGKILL it if it outlives `timeout`
///
/// Returns the exit code, or None if the process was killed by a signal.
pub async fn terminate(name: &str, mut child: Child, timeout: Duration) -> Option<i32> {
    if let Some(pid) = child.id() {
        log::info!("Stopping {} (PID {})", name, pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            log::debug!("SIGTERM to {} failed: {}", pid, e);
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            log::warn!("Failed to wait for {}: {}", name, e);
            None
        }
        Err(_) => {
            log::warn!("Timeout stopping {}, sending SIGKILL", name);
            if let Err(e) = child.kill().await {
                log::warn!("SIGKILL for {} failed: {}", name, e);
            }
            None
        }
    }
}

/// Split a command line into program and arguments
fn parse_command(cmd: &str) -> Result<(String, Vec<String>), SpawnError> {
    // Special prefixes (-, @, +, !, !!) are accepted but not interpreted
    let cmd = cmd.trim_start_matches(['-', '@', '+', '!']);

    let mut parts = shlex::split(cmd)
        .ok_or_else(|| SpawnError::InvalidCommand(cmd.to_string()))?
        .into_iter();

    let program = parts
        .next()
        .ok_or_else(|| SpawnError::InvalidCommand(cmd.to_string()))?;

    Ok((program, parts.collect()))
}

/// Substitute %n, %N and %% specifiers
pub fn substitute_specifiers(s: &str, service: &Service) -> String {
    let short = service
        .name
        .strip_suffix(".service")
        .unwrap_or(&service.name);

    s.replace("%%", "\u{0}")
        .replace("%n", &service.name)
        .replace("%N", short)
        .replace('\u{0}', "%")
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Service {0} has no ExecStart")]
    NoExecStart(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("'{command}' exited with code {code:?}")]
    Exited { command: String, code: Option<i32> },

    #[error("Start timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_prefix_and_quotes() {
        let (program, args) = parse_command(r#"-/bin/sh -c "echo hi""#).unwrap();
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c", "echo hi"]);
    }

    #[test]
    fn test_parse_command_empty() {
        assert!(matches!(parse_command("  "), Err(SpawnError::InvalidCommand(_))));
    }

    #[test]
    fn test_substitute_specifiers() {
        let svc = Service::new("web.service".into());
        assert_eq!(
            substitute_specifiers("/bin/run %n %N 100%%", &svc),
            "/bin/run web.service web 100%"
        );
    }

    #[tokio::test]
    async fn test_run_command_exit_code() {
        let svc = Service::new("t.service".into());
        assert!(run_command(&svc, "/bin/true", &[]).await.is_ok());
        let err = run_command(&svc, "/bin/sh -c 'exit 3'", &[]).await.unwrap_err();
        assert!(matches!(err, SpawnError::Exited { code: Some(3), .. }));
    }
}
