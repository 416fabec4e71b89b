// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::{CreateAccount, MailAddress};
use crate::modules::error::KeyKeeperResult;
use crate::modules::exec::{CommandRunner, CommandSpec};
use tracing::info;

/// `postfixadmin-cli`, either on the host or inside the mail server container.
#[derive(Clone, Debug)]
pub struct PostfixAdminCli {
    program: String,
    container: Option<String>,
}

impl PostfixAdminCli {
    pub fn docker(container: &str, program: &str) -> Self {
        Self {
            program: program.to_string(),
            container: Some(container.to_string()),
        }
    }

    pub fn direct(program: &str) -> Self {
        Self {
            program: program.to_string(),
            container: None,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &self.container {
            Some(container) => CommandSpec::new("docker")
                .args(["exec", container.as_str(), self.program.as_str()])
                .args(args),
            None => CommandSpec::new(self.program.as_str()).args(args),
        }
    }

    async fn succeeds<R: CommandRunner>(
        &self,
        runner: &R,
        spec: &CommandSpec,
    ) -> KeyKeeperResult<bool> {
        Ok(runner.run(spec).await?.success())
    }

    async fn run_checked<R: CommandRunner>(
        &self,
        runner: &R,
        spec: CommandSpec,
    ) -> KeyKeeperResult<String> {
        let output = runner.run(&spec).await?.ensure_success(&spec)?;
        Ok(output.stdout.trim().to_string())
    }

    /// Adds the mailbox, or resets its password when it already exists. The domain is
    /// added first if postfixadmin does not know it.
    pub async fn create<R: CommandRunner>(
        &self,
        runner: &R,
        address: &MailAddress,
        request: &CreateAccount,
    ) -> KeyKeeperResult<String> {
        let mut output = Vec::new();

        let domain_view = self.command(["domain", "view", address.domain.as_str()]);
        if !self.succeeds(runner, &domain_view).await? {
            output.push(
                self.run_checked(runner, self.command(["domain", "add", address.domain.as_str()]))
                    .await?,
            );
        }

        let name = request
            .display_name
            .clone()
            .unwrap_or_else(|| address.username.clone());
        let exists = self.exists(runner, address).await?;
        let action = if exists { "update" } else { "add" };
        let spec = self
            .command(["mailbox", action, address.email.as_str(), "--password"])
            .secret_arg(request.password.as_str())
            .arg("--password2")
            .secret_arg(request.password.as_str())
            .args(["--name", name.as_str()])
            .args(["--quota".to_string(), request.quota_mb.to_string()])
            .args(["--active", "1"]);
        output.push(self.run_checked(runner, spec).await?);

        info!(
            "Provisioned mailbox {} via {} ({})",
            address, self.program, action
        );
        Ok(output
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }

    pub async fn delete<R: CommandRunner>(
        &self,
        runner: &R,
        address: &MailAddress,
    ) -> KeyKeeperResult<String> {
        let output = self
            .run_checked(
                runner,
                self.command(["mailbox", "delete", address.email.as_str()]),
            )
            .await?;
        info!("Deleted mailbox {} via {}", address, self.program);
        Ok(output)
    }

    pub async fn exists<R: CommandRunner>(
        &self,
        runner: &R,
        address: &MailAddress,
    ) -> KeyKeeperResult<bool> {
        self.succeeds(
            runner,
            &self.command(["mailbox", "view", address.email.as_str()]),
        )
        .await
    }
}
