//! Turns transcribed phrases into text to type or editing actions.
//!
//! The interpreter is a small state machine (active / paused) plus a bounded
//! history of injected utterances used by the "undo last sentence" command.

use crate::logging::{record_command_trace, CommandTraceRecord, TraceStepRecord};
use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

pub const HISTORY_MAX_LEN: usize = 300;
pub const HISTORY_ENTRY_MAX_CHARS: usize = 4000;
pub const CLEAR_BACKSPACE_MAX: usize = 200;

/// Applied in order; later entries see the output of earlier ones.
const ALIASES: &[(&str, &str)] = &[
    ("豆号", "逗号"),
    ("都好", "逗号"),
    ("据号", "句号"),
    ("聚好", "句号"),
    ("句点", "句号"),
];

const PUNCTUATION: &[(&str, &str)] = &[
    ("逗号", "，"),
    ("句号", "。"),
    ("问号", "？"),
    ("感叹号", "！"),
    ("冒号", "："),
    ("分号", "；"),
    ("顿号", "、"),
];

const PAUSE_PHRASES: &[&str] = &["暂停输入", "暂停", "停止输入"];
const RESUME_PHRASES: &[&str] = &["继续输入", "继续", "恢复输入"];
const ENTER_PHRASES: &[&str] = &[
    "换行", "回车", "下一行", "enter", "ENTER", "回车键", "enter键", "Enter",
];
const TAB_PHRASES: &[&str] = &["tab", "TAB", "制表符", "制表", "tab键", "TAB键", "Tab"];
const ESCAPE_PHRASES: &[&str] = &["esc", "ESC", "escape", "ESC键", "esc键", "Escape"];
const UNDO_PHRASES: &[&str] = &["删除上一句", "撤回上一句", "撤销上一句", "删掉上一句"];
const CLEAR_PHRASES: &[&str] = &["清空", "清除全部", "全部删除"];

static DELETE_N_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(删除|退格)\s*(\d+)\s*(个字|次)?").expect("valid delete-n regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Backspace(usize),
    Enter,
    Tab,
    Escape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutcome {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Empty,
    TypeText(String),
    Action(EditAction),
    CmdOutcome(CmdOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// False only for free text that matched no control phrase.
    pub handled: bool,
    pub display_text: String,
    pub output: Output,
}

impl CommandResult {
    fn display(display_text: impl Into<String>) -> Self {
        Self {
            handled: true,
            display_text: display_text.into(),
            output: Output::Empty,
        }
    }

    fn action(display_text: impl Into<String>, action: EditAction) -> Self {
        Self {
            handled: true,
            display_text: display_text.into(),
            output: Output::Action(action),
        }
    }

    pub fn command(display_text: impl Into<String>, outcome: CmdOutcome) -> Self {
        Self {
            handled: true,
            display_text: display_text.into(),
            output: Output::CmdOutcome(outcome),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpreterState {
    #[default]
    Active,
    Paused,
}

/// Bounded FIFO of injected free-text utterances, newest at the back.
#[derive(Debug, Default)]
pub struct History {
    entries: VecDeque<String>,
}

impl History {
    pub fn push(&mut self, text: &str) {
        let entry: String = text.chars().take(HISTORY_ENTRY_MAX_CHARS).collect();
        if self.entries.len() == HISTORY_MAX_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop_back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct CommandInterpreter {
    state: InterpreterState,
    history: History,
}

impl CommandInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InterpreterState {
        self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn handle(&mut self, raw_text: &str) -> CommandResult {
        let mut steps = if tracing::level_enabled!(tracing::Level::DEBUG) {
            Some(Vec::new())
        } else {
            None
        };

        let text = normalize(raw_text, steps.as_mut());
        let result = self.decide(raw_text, &text);

        if let Some(steps) = steps {
            record_command_trace(CommandTraceRecord::new(
                raw_text.to_string(),
                text,
                describe_output(&result),
                steps,
            ));
        }

        result
    }

    fn decide(&mut self, raw_text: &str, text: &str) -> CommandResult {
        if PAUSE_PHRASES.contains(&text) {
            self.state = InterpreterState::Paused;
            return CommandResult::display("⏸ input paused");
        }

        if RESUME_PHRASES.contains(&text) {
            self.state = InterpreterState::Active;
            return CommandResult::display("▶️ input resumed");
        }

        if self.state == InterpreterState::Paused {
            return CommandResult::display(format!("⏸ (paused) {raw_text}"));
        }

        if ENTER_PHRASES.contains(&text) {
            return CommandResult::action("↩️ line break", EditAction::Enter);
        }

        if TAB_PHRASES.contains(&text) {
            return CommandResult::action("↹ tab", EditAction::Tab);
        }

        if ESCAPE_PHRASES.contains(&text) {
            return CommandResult::action("⎋ escape", EditAction::Escape);
        }

        if let Some((_, symbol)) = PUNCTUATION.iter().find(|(name, _)| *name == text) {
            return CommandResult {
                handled: true,
                display_text: format!("⌨️ {text}"),
                output: Output::TypeText((*symbol).to_string()),
            };
        }

        if UNDO_PHRASES.contains(&text) {
            return match self.history.pop() {
                Some(last) => CommandResult::action(
                    format!("⌫ removed last sentence: {last}"),
                    EditAction::Backspace(last.chars().count()),
                ),
                None => CommandResult::display("⚠️ nothing to remove"),
            };
        }

        if let Some(count) = parse_delete_count(text) {
            return CommandResult::action(
                format!("⌫ delete {count} characters"),
                EditAction::Backspace(count),
            );
        }

        if CLEAR_PHRASES.contains(&text) {
            return CommandResult::action("🧹 clear", EditAction::Backspace(CLEAR_BACKSPACE_MAX));
        }

        CommandResult {
            handled: false,
            display_text: raw_text.to_string(),
            output: Output::TypeText(raw_text.to_string()),
        }
    }

    /// Remember free text that was actually typed so it can be undone later.
    pub fn record_output(&mut self, typed: &str) {
        if typed.is_empty() || typed == "\n" {
            return;
        }
        self.history.push(typed);
    }
}

fn normalize(raw_text: &str, mut steps: Option<&mut Vec<TraceStepRecord>>) -> String {
    let trimmed = raw_text.trim().to_string();
    if let Some(steps) = steps.as_mut() {
        steps.push(TraceStepRecord::new("trim", raw_text.to_string(), trimmed.clone()));
    }

    let mut current = trimmed;
    for (alias, canonical) in ALIASES {
        if !current.contains(alias) {
            continue;
        }
        let replaced = current.replace(alias, canonical);
        if let Some(steps) = steps.as_mut() {
            steps.push(TraceStepRecord::new(
                format!("alias {alias} → {canonical}"),
                current.clone(),
                replaced.clone(),
            ));
        }
        current = replaced;
    }

    current
}

/// Counts that do not fit in `usize` are treated as no match.
fn parse_delete_count(text: &str) -> Option<usize> {
    let captures = DELETE_N_REGEX.captures(text)?;
    captures.get(2)?.as_str().parse().ok()
}

fn describe_output(result: &CommandResult) -> String {
    match &result.output {
        Output::Empty => format!("display only: {}", result.display_text),
        Output::TypeText(text) if result.handled => format!("type symbol {text:?}"),
        Output::TypeText(text) => format!("type free text ({} chars)", text.chars().count()),
        Output::Action(action) => format!("action {action:?}"),
        Output::CmdOutcome(outcome) => format!("command ok={}", outcome.ok),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_and_record(interpreter: &mut CommandInterpreter, text: &str) {
        let result = interpreter.handle(text);
        assert!(!result.handled);
        if let Output::TypeText(typed) = result.output {
            interpreter.record_output(&typed);
        }
    }

    #[test]
    fn free_text_falls_through_untouched() {
        let mut interpreter = CommandInterpreter::new();
        let result = interpreter.handle("  你好世界 ");
        assert!(!result.handled);
        assert_eq!(result.output, Output::TypeText("  你好世界 ".to_string()));
    }

    #[test]
    fn aliases_resolve_to_punctuation() {
        let mut interpreter = CommandInterpreter::new();
        assert_eq!(
            interpreter.handle("豆号").output,
            Output::TypeText("，".to_string())
        );
        assert_eq!(
            interpreter.handle(" 句点 ").output,
            Output::TypeText("。".to_string())
        );
        assert_eq!(
            interpreter.handle("感叹号").output,
            Output::TypeText("！".to_string())
        );
    }

    #[test]
    fn key_phrases_map_to_actions() {
        let mut interpreter = CommandInterpreter::new();
        assert_eq!(
            interpreter.handle("换行").output,
            Output::Action(EditAction::Enter)
        );
        assert_eq!(
            interpreter.handle("TAB键").output,
            Output::Action(EditAction::Tab)
        );
        assert_eq!(
            interpreter.handle("Escape").output,
            Output::Action(EditAction::Escape)
        );
    }

    #[test]
    fn pause_gates_everything_until_resume() {
        let mut interpreter = CommandInterpreter::new();

        let paused = interpreter.handle("暂停输入");
        assert_eq!(paused.output, Output::Empty);
        assert_eq!(interpreter.state(), InterpreterState::Paused);

        for text in ["hello", "换行", "逗号", "删除3个字"] {
            let result = interpreter.handle(text);
            assert_eq!(result.output, Output::Empty, "{text} leaked while paused");
            assert!(result.display_text.contains(text));
        }

        let resumed = interpreter.handle("继续");
        assert_eq!(resumed.output, Output::Empty);
        assert_eq!(interpreter.state(), InterpreterState::Active);
        assert_eq!(
            interpreter.handle("hello").output,
            Output::TypeText("hello".to_string())
        );
    }

    #[test]
    fn undo_pops_last_utterance() {
        let mut interpreter = CommandInterpreter::new();
        type_and_record(&mut interpreter, "hello");

        let result = interpreter.handle("删除上一句");
        assert_eq!(result.output, Output::Action(EditAction::Backspace(5)));
        assert!(interpreter.history().is_empty());

        let again = interpreter.handle("撤销上一句");
        assert_eq!(again.output, Output::Empty);
        assert!(again.handled);
    }

    #[test]
    fn undo_counts_characters_not_bytes() {
        let mut interpreter = CommandInterpreter::new();
        type_and_record(&mut interpreter, "中文测试");
        assert_eq!(
            interpreter.handle("删掉上一句").output,
            Output::Action(EditAction::Backspace(4))
        );
    }

    #[test]
    fn delete_n_parsing() {
        let mut interpreter = CommandInterpreter::new();
        assert_eq!(
            interpreter.handle("删除5个字").output,
            Output::Action(EditAction::Backspace(5))
        );
        assert_eq!(
            interpreter.handle("退格 12 次").output,
            Output::Action(EditAction::Backspace(12))
        );

        let bare = interpreter.handle("删除");
        assert!(!bare.handled);
        assert_eq!(bare.output, Output::TypeText("删除".to_string()));
    }

    #[test]
    fn oversized_delete_count_is_free_text() {
        let mut interpreter = CommandInterpreter::new();
        let text = "删除99999999999999999999999个字";
        assert_eq!(
            interpreter.handle(text).output,
            Output::TypeText(text.to_string())
        );
    }

    #[test]
    fn clear_uses_fixed_bound() {
        let mut interpreter = CommandInterpreter::new();
        assert_eq!(
            interpreter.handle("清空").output,
            Output::Action(EditAction::Backspace(CLEAR_BACKSPACE_MAX))
        );
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = History::default();
        for i in 0..=HISTORY_MAX_LEN {
            history.push(&format!("entry-{i}"));
        }
        assert_eq!(history.len(), HISTORY_MAX_LEN);
        assert_eq!(history.iter().next(), Some("entry-1"));
        assert_eq!(history.pop().as_deref(), Some("entry-300"));
    }

    #[test]
    fn history_truncates_long_entries() {
        let mut history = History::default();
        history.push(&"字".repeat(HISTORY_ENTRY_MAX_CHARS + 10));
        assert_eq!(
            history.pop().map(|entry| entry.chars().count()),
            Some(HISTORY_ENTRY_MAX_CHARS)
        );
    }

    #[test]
    fn bare_line_breaks_are_not_recorded() {
        let mut interpreter = CommandInterpreter::new();
        interpreter.record_output("\n");
        interpreter.record_output("");
        assert!(interpreter.history().is_empty());
    }
}
