// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::KeyKeeperResult;
use crate::raise_error;
use std::sync::Mutex;

enum Scripted {
    Output(CommandOutput),
    SpawnError,
}

/// Records every command and answers from a script keyed by a substring of the
/// displayed command line. Unscripted commands succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    script: Mutex<Vec<(String, Scripted)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, pattern: &str, output: CommandOutput) -> Self {
        self.script
            .lock()
            .unwrap()
            .push((pattern.to_string(), Scripted::Output(output)));
        self
    }

    pub fn fail(self, pattern: &str, status: i32, stderr: &str) -> Self {
        self.respond(
            pattern,
            CommandOutput {
                status: Some(status),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        )
    }

    pub fn unspawnable(self, pattern: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push((pattern.to_string(), Scripted::SpawnError));
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(pattern)).count()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> KeyKeeperResult<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.to_string();
        let script = self.script.lock().unwrap();
        match script.iter().find(|(pattern, _)| line.contains(pattern.as_str())) {
            Some((_, Scripted::Output(output))) => Ok(output.clone()),
            Some((_, Scripted::SpawnError)) => Err(raise_error!(
                format!("Failed to spawn `{}`: No such file or directory", line),
                ErrorCode::CommandFailed
            )),
            None => Ok(CommandOutput::ok("")),
        }
    }
}
