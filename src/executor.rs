//! Runs configured programs for `cmd` messages.
//!
//! Lookups are exact matches on the trimmed phrase; nothing here touches the
//! interpreter, its history, or the keyboard.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{CommandSpec, ConfigManager, ConfiguredCommand};
use crate::interpreter::{CmdOutcome, CommandResult, Output};

pub const NO_MATCH_MESSAGE: &str = "no matching command";
pub const MISCONFIGURED_MESSAGE: &str = "command misconfigured";

#[derive(Clone)]
pub struct CommandExecutor {
    config: ConfigManager,
}

impl CommandExecutor {
    pub fn new(config: ConfigManager) -> Self {
        Self { config }
    }

    pub async fn execute(&self, text: &str) -> CommandResult {
        let commands = self.config.commands();
        let timeout = self.config.get().command_timeout();

        let Some(command) = match_command(text, &commands) else {
            info!("No configured command matches {:?}", text);
            return failure(format!("no matching command: {text}"), NO_MATCH_MESSAGE);
        };

        let argv = match build_argv(command) {
            Some(argv) if !argv.is_empty() => argv,
            _ => {
                warn!("Configured command {:?} has no runnable program", text);
                return failure(format!("command misconfigured: {text}"), MISCONFIGURED_MESSAGE);
            }
        };

        info!("▶️  Running configured command {:?}: {:?}", text, argv);
        run_program(text, &argv, timeout).await
    }
}

fn failure(display: String, message: &str) -> CommandResult {
    CommandResult::command(
        display,
        CmdOutcome {
            ok: false,
            message: message.to_string(),
        },
    )
}

fn outcome(ok: bool, message: String) -> CommandResult {
    CommandResult::command(message.clone(), CmdOutcome { ok, message })
}

pub fn match_command<'a>(
    text: &str,
    commands: &'a [ConfiguredCommand],
) -> Option<&'a ConfiguredCommand> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    commands.iter().find(|command| {
        let candidate = command.match_string.trim();
        !candidate.is_empty() && candidate == text
    })
}

/// `None` when the command line cannot be split (e.g. an unclosed quote).
pub fn build_argv(command: &ConfiguredCommand) -> Option<Vec<String>> {
    let mut argv: Vec<String> = match &command.command {
        CommandSpec::Line(line) if line.trim().is_empty() => Vec::new(),
        CommandSpec::Line(line) => shell_words::split(line).ok()?,
        CommandSpec::Argv(parts) => parts
            .iter()
            .filter(|part| !part.trim().is_empty())
            .cloned()
            .collect(),
        CommandSpec::Missing => Vec::new(),
    };

    argv.extend(
        command
            .args
            .iter()
            .filter(|arg| !arg.trim().is_empty())
            .cloned(),
    );
    Some(argv)
}

async fn run_program(text: &str, argv: &[String], timeout: Option<Duration>) -> CommandResult {
    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(err) => {
            warn!("Failed to launch {:?}: {err}", argv[0]);
            return outcome(false, format!("command error: {err}"));
        }
    };

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Configured command {:?} timed out after {:?}", text, limit);
                return outcome(
                    false,
                    format!("command timed out after {}s: {text}", limit.as_secs()),
                );
            }
        },
        None => child.wait_with_output().await,
    };

    let output = match waited {
        Ok(output) => output,
        Err(err) => return outcome(false, format!("command error: {err}")),
    };

    if output.status.success() {
        info!("✅ Command {:?} succeeded", text);
        return outcome(true, format!("command succeeded: {text}"));
    }

    let code = output
        .status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string());
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let mut message = format!("command failed: {text} (exit {code})");
    if !stderr.is_empty() {
        message.push_str(" - ");
        message.push_str(&stderr);
    }
    warn!("{message}");
    outcome(false, message)
}

/// Pulls `(ok, message)` out of an executor result for the wire.
pub fn outcome_fields(result: &CommandResult) -> (bool, String) {
    match &result.output {
        Output::CmdOutcome(outcome) => (outcome.ok, outcome.message.clone()),
        _ => (false, result.display_text.clone()),
    }
}
