// Remote command execution restricted to an allowlist.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("the parameter 'cmd' is required")]
    MissingCommand,

    #[error("server does not allow to execute '{0}'")]
    NotAllowed(String),

    #[error("failed to start '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Failed(String),

    #[error("'{0}' timed out after {1:?}")]
    TimedOut(String, Duration),
}

/// Set of program names the server may run. Empty allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAllowlist {
    commands: BTreeSet<String>,
}

impl CommandAllowlist {
    /// Parse a comma-separated list; blank entries are ignored.
    pub fn parse(list: &str) -> Self {
        let commands = list
            .split(',')
            // Trimmed on purpose so `--commands "ls, pwd"` allows `pwd`.
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        Self { commands }
    }

    pub fn allows(&self, cmd: &str) -> bool {
        self.commands.contains(cmd)
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }
}

/// Run `cmd` with `args` if the allowlist permits it and return its stdout.
///
/// The program is started directly, never through a shell.
pub async fn execute(
    allowlist: &CommandAllowlist,
    cmd: &str,
    args: &[String],
    limit: Duration,
) -> Result<String, CommandError> {
    if cmd.is_empty() {
        return Err(CommandError::MissingCommand);
    }
    if !allowlist.allows(cmd) {
        warn!("rejected command '{}'", cmd);
        return Err(CommandError::NotAllowed(cmd.to_string()));
    }

    info!("executing {} {:?}", cmd, args);
    let mut process = Command::new(cmd);
    process
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout(limit, process.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(CommandError::Spawn {
                cmd: cmd.to_string(),
                source,
            })
        }
        Err(_) => return Err(CommandError::TimedOut(cmd.to_string(), limit)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut message = match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        if !stderr.trim().is_empty() {
            message.push_str(": ");
            message.push_str(stderr.trim());
        }
        return Err(CommandError::Failed(message));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_allowlist_parse() {
        let list = CommandAllowlist::parse(",echo, ls ,,");
        assert!(list.allows("echo"));
        assert!(list.allows("ls"));
        assert!(!list.allows("rm"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["echo", "ls"]);
        assert!(CommandAllowlist::parse("").is_empty());
    }

    #[tokio::test]
    async fn test_execute_requires_cmd() {
        let list = CommandAllowlist::parse("echo");
        let err = execute(&list, "", &[], LIMIT).await.unwrap_err();
        assert_eq!(err.to_string(), "the parameter 'cmd' is required");
    }

    #[tokio::test]
    async fn test_execute_rejects_unlisted() {
        let list = CommandAllowlist::parse("echo");
        let err = execute(&list, "rm", &["-rf".into(), "/".into()], LIMIT)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "server does not allow to execute 'rm'");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_echo() {
        let list = CommandAllowlist::parse("echo");
        let out = execute(&list, "echo", &["hello".into(), "world".into()], LIMIT)
            .await
            .unwrap();
        assert_eq!(out, "hello world\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_reports_failure() {
        let list = CommandAllowlist::parse("false");
        let err = execute(&list, "false", &[], LIMIT).await.unwrap_err();
        assert!(matches!(err, CommandError::Failed(ref m) if m.starts_with("exit status 1")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_times_out() {
        let list = CommandAllowlist::parse("sleep");
        let err = execute(&list, "sleep", &["5".into()], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut(..)));
    }
}
