use owo_colors::OwoColorize;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::fmt;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

const TRACE_TARGET: &str = "lanvoice::command_trace";
const PREVIEW_CHAR_LIMIT: usize = 120;
const TARGET_GUTTER_WIDTH: usize = 24;
const TIMESTAMP_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// How one phrase travelled through the interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTraceRecord {
    pub input: String,
    pub normalized: String,
    pub decision: String,
    pub steps: Vec<TraceStepRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStepRecord {
    pub name: String,
    pub before: String,
    pub after: String,
}

impl CommandTraceRecord {
    pub fn new(
        input: String,
        normalized: String,
        decision: String,
        steps: Vec<TraceStepRecord>,
    ) -> Self {
        Self {
            input,
            normalized,
            decision,
            steps,
        }
    }

    pub fn render_pretty(&self, use_color: bool) -> String {
        let changed: Vec<&TraceStepRecord> =
            self.steps.iter().filter(|step| step.changed()).collect();

        let mut lines = vec![format!("┌─ Command ({} normalization steps)", changed.len())];
        lines.push(format!("│ IN  : {}", preview(&self.input, use_color)));
        for step in changed {
            lines.push(format!("│ • {}", step.name));
            lines.push(format!("│   {}", step.diff_line(use_color)));
        }
        lines.push(format!("│ NORM: {}", preview(&self.normalized, use_color)));
        lines.push(format!("│ → {}", self.decision));
        lines.push("└─".to_string());
        lines.join("\n")
    }
}

impl TraceStepRecord {
    pub fn new(name: impl Into<String>, before: String, after: String) -> Self {
        Self {
            name: name.into(),
            before,
            after,
        }
    }

    pub fn changed(&self) -> bool {
        self.before != self.after
    }

    fn diff_line(&self, use_color: bool) -> String {
        let diff = TextDiff::from_chars(&self.before, &self.after);
        let mut rendered = String::new();
        for change in diff.iter_all_changes() {
            let fragment = escape_fragment(change.value());
            let styled = match (change.tag(), use_color) {
                (_, false) => match change.tag() {
                    ChangeTag::Delete => format!("[-{fragment}]"),
                    ChangeTag::Insert => format!("[+{fragment}]"),
                    ChangeTag::Equal => fragment,
                },
                (ChangeTag::Delete, true) => fragment.red().strikethrough().to_string(),
                (ChangeTag::Insert, true) => fragment.green().to_string(),
                (ChangeTag::Equal, true) => fragment.dimmed().to_string(),
            };
            rendered.push_str(&styled);
        }
        rendered
    }
}

fn escape_fragment(value: &str) -> String {
    let mut rendered = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => rendered.push('⏎'),
            '\t' => rendered.push('⇥'),
            ' ' => rendered.push('·'),
            c if c.is_control() => rendered.push_str(&format!("\\u{{{:04X}}}", c as u32)),
            c => rendered.push(c),
        }
    }
    rendered
}

fn preview(value: &str, use_color: bool) -> String {
    let mut shown: String = value.chars().take(PREVIEW_CHAR_LIMIT).collect();
    if value.chars().count() > PREVIEW_CHAR_LIMIT {
        shown.push_str("...");
    }
    let escaped = escape_fragment(&shown);
    if use_color {
        escaped.cyan().to_string()
    } else {
        escaped
    }
}

#[derive(Debug, Default)]
struct TraceVisitor {
    trace_json: Option<String>,
}

impl tracing::field::Visit for TraceVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "trace_json" {
            self.trace_json = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "trace_json" && self.trace_json.is_none() {
            self.trace_json = Some(format!("{value:?}"));
        }
    }
}

/// `timestamp level target: message`, plus a rendered block for command traces.
#[derive(Debug, Default)]
pub struct LanvoiceFormatter;

impl LanvoiceFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl<S, N> FormatEvent<S, N> for LanvoiceFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let use_color = writer.has_ansi_escapes();

        write_prefix(&mut writer, metadata, use_color)?;

        if metadata.target() == TRACE_TARGET {
            let mut visitor = TraceVisitor::default();
            event.record(&mut visitor);
            if let Some(json) = visitor.trace_json {
                return match serde_json::from_str::<CommandTraceRecord>(&json) {
                    Ok(record) => writeln!(writer, "\n{}", record.render_pretty(use_color)),
                    Err(err) => writeln!(writer, "unrenderable command trace: {err}"),
                };
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writer.write_char('\n')
    }
}

pub fn record_command_trace(record: CommandTraceRecord) {
    if !tracing::level_enabled!(Level::DEBUG) {
        return;
    }
    match serde_json::to_string(&record) {
        Ok(json) => tracing::event!(
            target: TRACE_TARGET,
            Level::DEBUG,
            trace_json = json.as_str(),
            "command trace"
        ),
        Err(err) => tracing::event!(
            target: TRACE_TARGET,
            Level::DEBUG,
            "command trace (serialization failure: {err})"
        ),
    }
}

fn write_prefix(
    writer: &mut Writer<'_>,
    metadata: &tracing::Metadata<'_>,
    use_color: bool,
) -> fmt::Result {
    let timestamp = format_timestamp();
    let level = format!("{:>5}", metadata.level());
    let target = format!("{:<width$}", metadata.target(), width = TARGET_GUTTER_WIDTH);

    if use_color {
        write!(
            writer,
            "{} {} {}: ",
            timestamp.dimmed(),
            color_level(&level, *metadata.level()),
            target.blue().dimmed()
        )
    } else {
        write!(writer, "{timestamp} {level} {target}: ")
    }
}

fn color_level(text: &str, level: Level) -> String {
    match level {
        Level::ERROR => text.red().bold().to_string(),
        Level::WARN => text.yellow().bold().to_string(),
        Level::INFO => text.green().to_string(),
        Level::DEBUG => text.cyan().to_string(),
        Level::TRACE => text.dimmed().to_string(),
    }
}

fn format_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| "0000-00-00 00:00:00".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_render_marks_alias_edits() {
        let record = CommandTraceRecord::new(
            " 豆号".to_string(),
            "逗号".to_string(),
            "type symbol \"，\"".to_string(),
            vec![
                TraceStepRecord::new("trim", " 豆号".to_string(), "豆号".to_string()),
                TraceStepRecord::new("alias 豆号 → 逗号", "豆号".to_string(), "逗号".to_string()),
            ],
        );

        let rendered = record.render_pretty(false);
        assert!(rendered.contains("2 normalization steps"));
        assert!(rendered.contains("[-豆][+逗]号"));
        assert!(rendered.contains("→ type symbol"));
    }

    #[test]
    fn unchanged_steps_are_hidden() {
        let record = CommandTraceRecord::new(
            "hi".to_string(),
            "hi".to_string(),
            "type free text (2 chars)".to_string(),
            vec![TraceStepRecord::new("trim", "hi".to_string(), "hi".to_string())],
        );
        assert!(!record.render_pretty(false).contains("• trim"));
    }
}
