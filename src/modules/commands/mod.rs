// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::error::KeyKeeperResult;
use crate::modules::settings::cli::Settings;
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

pub mod account;
pub mod doctor;
pub mod mailbox;
pub mod session;

#[derive(Clone, Debug, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Provision a mailbox for an application user, link it and store the encrypted password
    CreateAccount {
        user_id: String,
        /// Defaults to the user's email
        email: Option<String>,
        /// Defaults to a generated 16-character password
        password: Option<String>,
    },
    /// Read-only report on a user's mail linkage
    Diagnose {
        user_id: String,
        #[clap(long)]
        json: bool,
    },
    /// Diagnose, then propose .env changes and follow-up commands
    Fix {
        user_id: String,
        #[clap(long, default_value = ".env")]
        env_file: PathBuf,
        /// Write the proposed changes to the env file
        #[clap(long)]
        apply: bool,
    },
    /// Link an existing virtual mail user to an application user
    Link {
        user_id: String,
        virtual_user_id: u64,
    },
    /// Remove a mailbox and its virtual user row
    DeleteAccount { email: String },
    /// Delete expired login challenges and sessions
    Sweep,
    /// Issue a single-use login challenge
    Challenge {
        user_id: String,
        #[clap(long, default_value_t = 300)]
        ttl_secs: u64,
    },
    /// Consume a challenge and open a session
    Login {
        user_id: String,
        challenge: String,
        #[clap(long)]
        ip: Option<String>,
        #[clap(long)]
        user_agent: Option<String>,
        #[clap(long, default_value_t = 86400)]
        ttl_secs: u64,
    },
    /// End a session
    Logout { token: String },
    /// List the newest messages in a folder of the user's mailbox
    Inbox {
        user_id: String,
        #[clap(long, default_value = "INBOX")]
        folder: String,
        #[clap(long, default_value_t = 20)]
        limit: u32,
        #[clap(long, default_value_t = 0)]
        offset: u32,
        /// Include bodies and attachments
        #[clap(long)]
        body: bool,
    },
    /// Show one message
    Read {
        user_id: String,
        uid: u32,
        #[clap(long, default_value = "INBOX")]
        folder: String,
        /// Set \Seen after reading
        #[clap(long)]
        mark_read: bool,
    },
    /// Change the seen, flagged or answered flags of a message
    Flag {
        user_id: String,
        uid: u32,
        #[clap(long, default_value = "INBOX")]
        folder: String,
        #[clap(long)]
        seen: Option<bool>,
        #[clap(long)]
        flagged: Option<bool>,
        #[clap(long)]
        answered: Option<bool>,
    },
    /// Move a message to Trash, or expunge it with --permanent
    Remove {
        user_id: String,
        uid: u32,
        #[clap(long, default_value = "INBOX")]
        folder: String,
        #[clap(long)]
        permanent: bool,
    },
    /// Send a message from the user's mailbox
    Send {
        user_id: String,
        #[clap(long, required = true)]
        to: Vec<String>,
        #[clap(long)]
        cc: Vec<String>,
        #[clap(long)]
        bcc: Vec<String>,
        #[clap(long)]
        subject: String,
        #[clap(long)]
        text: Option<String>,
        #[clap(long)]
        html: Option<String>,
        /// Mark the message as PGP encrypted
        #[clap(long)]
        encrypted: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateAccount { .. } => "create-account",
            Command::Diagnose { .. } => "diagnose",
            Command::Fix { .. } => "fix",
            Command::Link { .. } => "link",
            Command::DeleteAccount { .. } => "delete-account",
            Command::Sweep => "sweep",
            Command::Challenge { .. } => "challenge",
            Command::Login { .. } => "login",
            Command::Logout { .. } => "logout",
            Command::Inbox { .. } => "inbox",
            Command::Read { .. } => "read",
            Command::Flag { .. } => "flag",
            Command::Remove { .. } => "remove",
            Command::Send { .. } => "send",
        }
    }

    pub async fn execute(&self, settings: &Settings) -> KeyKeeperResult<()> {
        match self {
            Command::CreateAccount {
                user_id,
                email,
                password,
            } => {
                account::cmd_create_account(
                    settings,
                    user_id,
                    email.as_deref(),
                    password.as_deref(),
                )
                .await
            }
            Command::Diagnose { user_id, json } => {
                doctor::cmd_diagnose(settings, user_id, *json).await
            }
            Command::Fix {
                user_id,
                env_file,
                apply,
            } => doctor::cmd_fix(settings, user_id, env_file, *apply).await,
            Command::Link {
                user_id,
                virtual_user_id,
            } => account::cmd_link(settings, user_id, *virtual_user_id).await,
            Command::DeleteAccount { email } => account::cmd_delete_account(settings, email).await,
            Command::Sweep => session::cmd_sweep(settings).await,
            Command::Challenge { user_id, ttl_secs } => {
                session::cmd_challenge(settings, user_id, Duration::from_secs(*ttl_secs)).await
            }
            Command::Login {
                user_id,
                challenge,
                ip,
                user_agent,
                ttl_secs,
            } => {
                session::cmd_login(
                    settings,
                    user_id,
                    challenge,
                    ip.as_deref(),
                    user_agent.as_deref(),
                    Duration::from_secs(*ttl_secs),
                )
                .await
            }
            Command::Logout { token } => session::cmd_logout(settings, token).await,
            Command::Inbox {
                user_id,
                folder,
                limit,
                offset,
                body,
            } => mailbox::cmd_inbox(settings, user_id, folder, *limit, *offset, *body).await,
            Command::Read {
                user_id,
                uid,
                folder,
                mark_read,
            } => mailbox::cmd_read(settings, user_id, *uid, folder, *mark_read).await,
            Command::Flag {
                user_id,
                uid,
                folder,
                seen,
                flagged,
                answered,
            } => {
                mailbox::cmd_flag(
                    settings,
                    user_id,
                    *uid,
                    folder,
                    mailbox::flag_update(*seen, *flagged, *answered),
                )
                .await
            }
            Command::Remove {
                user_id,
                uid,
                folder,
                permanent,
            } => mailbox::cmd_remove(settings, user_id, *uid, folder, *permanent).await,
            Command::Send {
                user_id,
                to,
                cc,
                bcc,
                subject,
                text,
                html,
                encrypted,
            } => {
                let message = mailbox::outgoing_message(
                    to,
                    cc,
                    bcc,
                    subject,
                    text.clone(),
                    html.clone(),
                    *encrypted,
                );
                mailbox::cmd_send(settings, user_id, &message).await
            }
        }
    }
}

/// Pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> KeyKeeperResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| {
        crate::raise_error!(
            format!("Failed to render output: {}", e),
            crate::modules::error::code::ErrorCode::InternalError
        )
    })?;
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Command {
        let mut argv = vec!["keykeeper-mail"];
        argv.extend_from_slice(args);
        Settings::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn defaults_follow_the_operator_scripts() {
        assert_eq!(
            parse(&["fix", "u1"]),
            Command::Fix {
                user_id: "u1".into(),
                env_file: PathBuf::from(".env"),
                apply: false,
            }
        );
        assert_eq!(
            parse(&["inbox", "u1"]),
            Command::Inbox {
                user_id: "u1".into(),
                folder: "INBOX".into(),
                limit: 20,
                offset: 0,
                body: false,
            }
        );
        assert_eq!(
            parse(&["create-account", "u1"]),
            Command::CreateAccount {
                user_id: "u1".into(),
                email: None,
                password: None,
            }
        );
    }

    #[test]
    fn repeated_and_tri_state_options() {
        match parse(&[
            "send", "u1", "--to", "a@keykeeper.world", "--to", "b@keykeeper.world", "--subject",
            "hi",
        ]) {
            Command::Send { to, cc, subject, .. } => {
                assert_eq!(to, vec!["a@keykeeper.world", "b@keykeeper.world"]);
                assert!(cc.is_empty());
                assert_eq!(subject, "hi");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            parse(&["flag", "u1", "7", "--seen", "false"]),
            Command::Flag {
                user_id: "u1".into(),
                uid: 7,
                folder: "INBOX".into(),
                seen: Some(false),
                flagged: None,
                answered: None,
            }
        );
        assert_eq!(parse(&["link", "u1", "42"]).name(), "link");
    }

    #[test]
    fn send_requires_a_recipient() {
        assert!(Settings::try_parse_from(["keykeeper-mail", "send", "u1", "--subject", "hi"]).is_err());
    }
}
