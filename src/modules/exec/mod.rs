// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::{raise_error, run_with_timeout};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

#[cfg(test)]
pub mod fake;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// An external program invocation. Arguments registered with [`CommandSpec::secret_arg`]
/// are masked whenever the command is displayed or logged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    secret_args: Vec<usize>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            secret_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret_args.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for (index, arg) in self.args.iter().enumerate() {
            if self.secret_args.contains(&index) {
                write!(f, " ***")?;
            } else if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Converts a nonzero exit into a provisioning error carrying both output streams.
    pub fn ensure_success(self, spec: &CommandSpec) -> KeyKeeperResult<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(raise_error!(
            format!(
                "Command `{}` exited with status {}; stdout: {:?}; stderr: {:?}",
                spec,
                self.status
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".into()),
                self.stdout.trim(),
                self.stderr.trim()
            ),
            ErrorCode::ProvisioningFailed
        ))
    }
}

pub trait CommandRunner {
    /// Runs the command to completion. A nonzero exit is *not* an error here; failing to
    /// spawn or wait for the process is.
    async fn run(&self, spec: &CommandSpec) -> KeyKeeperResult<CommandOutput>;

    /// True when commands are only logged. Callers that also touch the filesystem
    /// directly use this to skip those writes too.
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs commands on the host with `tokio::process`. In dry-run mode every command is logged
/// and reported as successful without being executed.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for SystemRunner {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    async fn run(&self, spec: &CommandSpec) -> KeyKeeperResult<CommandOutput> {
        if self.dry_run {
            info!("dry-run (USE_REAL_MAIL_SERVER is not true), skipping: {}", spec);
            return Ok(CommandOutput::ok(format!("dry-run: {}", spec)));
        }
        debug!("executing: {}", spec);

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            raise_error!(
                format!("Failed to spawn `{}`: {}", spec, e),
                ErrorCode::CommandFailed
            )
        })?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await.map_err(|e| {
                raise_error!(
                    format!("Failed to write stdin of `{}`: {}", spec, e),
                    ErrorCode::CommandFailed
                )
            })?;
        }

        let output = run_with_timeout!(
            COMMAND_TIMEOUT,
            child.wait_with_output(),
            raise_error!(
                format!(
                    "`{}` did not finish within {}s",
                    spec,
                    COMMAND_TIMEOUT.as_secs()
                ),
                ErrorCode::CommandFailed
            )
        )?
        .map_err(|e| {
            raise_error!(
                format!("Failed to wait for `{}`: {}", spec, e),
                ErrorCode::CommandFailed
            )
        })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_masks_secret_arguments() {
        let spec = CommandSpec::new("postfixadmin-cli")
            .args(["mailbox", "add", "alice@keykeeper.world", "--password"])
            .secret_arg("hunter2")
            .arg("--name")
            .arg("Alice Liddell");
        let shown = spec.to_string();
        assert!(!shown.contains("hunter2"));
        assert_eq!(
            shown,
            "postfixadmin-cli mailbox add alice@keykeeper.world --password *** --name 'Alice Liddell'"
        );
    }

    #[test]
    fn nonzero_exit_becomes_provisioning_error() {
        let spec = CommandSpec::new("postmap").arg("/etc/postfix/virtual_mailbox_passwd");
        let output = CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: "postmap: fatal: open database".into(),
        };
        let error = output.ensure_success(&spec).unwrap_err();
        assert_eq!(error.code(), ErrorCode::ProvisioningFailed);
        assert!(error.message().contains("postmap: fatal: open database"));
    }

    #[tokio::test]
    async fn dry_run_does_not_execute() {
        let runner = SystemRunner::new(true);
        let output = runner
            .run(&CommandSpec::new("definitely-not-a-real-binary"))
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.starts_with("dry-run:"));
    }

    #[tokio::test]
    async fn missing_program_is_a_command_error() {
        let runner = SystemRunner::new(false);
        let error = runner
            .run(&CommandSpec::new("definitely-not-a-real-binary-kk"))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::CommandFailed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdin_is_forwarded() {
        let runner = SystemRunner::new(false);
        let output = runner
            .run(&CommandSpec::new("cat").stdin("piped secret"))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "piped secret");
    }
}
