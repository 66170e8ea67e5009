use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dedup::DedupGate;
use crate::input::{InjectionError, InputInjector};
use crate::interpreter::{CommandInterpreter, EditAction, Output};
use crate::notify::Notifier;

pub const TEST_INJECT_SENTINEL: &str = "__TEST_INJECT__";
pub const TEST_INJECT_TEXT: &str = "[Injection Test] 123 ABC 中文 测试";
pub const TEST_INJECT_CONFIRMATION: &str = "✅ 如果你看到这行文字，说明注入成功！ (injection works)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Blank after trimming.
    Ignored,
    /// Identical to the previous message inside the dedup window.
    Suppressed,
    /// Nothing typed; the text was shown to the user instead.
    Displayed(String),
    Injected(Output),
    Diagnostic { ok: bool },
    Failed(String),
}

/// The parts of [`Config`] the input service reads; reapplied on reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub dedup_window: Duration,
    /// Click at the pointer before injecting anything.
    pub focus_click: bool,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dedup_window: config.dedup_window(),
            focus_click: config.focus_click,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Dedup → diagnostic bypass → interpreter → injector → history.
pub struct InputService {
    interpreter: CommandInterpreter,
    dedup: DedupGate,
    focus_click: bool,
    injector: Box<dyn InputInjector>,
    notifier: Arc<dyn Notifier>,
}

impl InputService {
    pub fn new(
        injector: Box<dyn InputInjector>,
        notifier: Arc<dyn Notifier>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            interpreter: CommandInterpreter::new(),
            dedup: DedupGate::new(settings.dedup_window),
            focus_click: settings.focus_click,
            injector,
            notifier,
        }
    }

    pub fn interpreter(&self) -> &CommandInterpreter {
        &self.interpreter
    }

    /// Interpreter state and history survive; the dedup slot is kept too.
    pub fn apply_settings(&mut self, settings: ServiceSettings) {
        self.dedup.set_window(settings.dedup_window);
        self.focus_click = settings.focus_click;
        debug!("Input settings now {:?}", settings);
    }

    pub fn handle_text(&mut self, raw: &str) -> HandleOutcome {
        self.handle_text_at(raw, Instant::now())
    }

    pub fn handle_text_at(&mut self, raw: &str, now: Instant) -> HandleOutcome {
        let text = raw.trim();
        if text.is_empty() {
            return HandleOutcome::Ignored;
        }

        if self.dedup.should_suppress_at(text, now) {
            info!("⏭️  Duplicate message dropped: {}", text);
            return HandleOutcome::Suppressed;
        }

        if text == TEST_INJECT_SENTINEL {
            return self.run_diagnostic();
        }

        let result = self.interpreter.handle(text);
        if result.output == Output::Empty {
            self.notifier.notify("Command", &result.display_text);
            return HandleOutcome::Displayed(result.display_text);
        }

        self.focus_target();
        if let Err(err) = self.apply(&result.output) {
            error!("❌ Injection failed: {err}");
            self.notifier.notify("Input failed", &err.to_string());
            return HandleOutcome::Failed(err.to_string());
        }

        if !result.handled {
            if let Output::TypeText(typed) = &result.output {
                self.interpreter.record_output(typed);
            }
        }

        debug!("Applied {:?}", result.output);
        HandleOutcome::Injected(result.output)
    }

    /// A failed click never blocks the injection that follows it.
    fn focus_target(&mut self) {
        if !self.focus_click {
            return;
        }
        if let Err(err) = self.injector.focus_target() {
            debug!("Focus click skipped: {err}");
        }
    }

    fn apply(&mut self, output: &Output) -> Result<(), InjectionError> {
        match output {
            Output::TypeText(text) => self.injector.type_text(text),
            Output::Action(EditAction::Backspace(count)) => {
                if *count == 0 {
                    return Ok(());
                }
                self.injector.backspace(*count)
            }
            Output::Action(EditAction::Enter) => self.injector.press_enter(),
            Output::Action(EditAction::Tab) => self.injector.press_tab(),
            Output::Action(EditAction::Escape) => self.injector.press_escape(),
            Output::Empty | Output::CmdOutcome(_) => Ok(()),
        }
    }

    fn run_diagnostic(&mut self) -> HandleOutcome {
        self.notifier.notify(
            "Test injection",
            "Focus a text field on this computer; typing two test lines now…",
        );
        self.focus_target();

        let injected = self
            .injector
            .type_text(TEST_INJECT_TEXT)
            .and_then(|_| self.injector.press_enter())
            .and_then(|_| self.injector.type_text(TEST_INJECT_CONFIRMATION))
            .and_then(|_| self.injector.press_enter());

        match injected {
            Ok(()) => {
                self.notifier.notify(
                    "Test injection succeeded",
                    "Two test lines should now be visible in the focused field.",
                );
                HandleOutcome::Diagnostic { ok: true }
            }
            Err(err) => {
                warn!("Test injection failed: {err}");
                self.notifier
                    .notify("Test injection failed", &err.to_string());
                HandleOutcome::Diagnostic { ok: false }
            }
        }
    }
}

enum DispatchRequest {
    Handle {
        text: String,
        reply: oneshot::Sender<HandleOutcome>,
    },
    Reconfigure(ServiceSettings),
}

/// Serializes every caller onto one thread that owns the [`InputService`].
/// The thread exits once the last handle is dropped.
#[derive(Clone)]
pub struct InputDispatcher {
    tx: mpsc::UnboundedSender<DispatchRequest>,
}

impl InputDispatcher {
    pub fn spawn(mut service: InputService) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DispatchRequest>();

        thread::Builder::new()
            .name("input-dispatcher".to_string())
            .spawn(move || {
                while let Some(request) = rx.blocking_recv() {
                    match request {
                        DispatchRequest::Handle { text, reply } => {
                            let _ = reply.send(service.handle_text(&text));
                        }
                        DispatchRequest::Reconfigure(settings) => service.apply_settings(settings),
                    }
                }
                debug!("Input dispatcher stopped");
            })?;

        Ok(Self { tx })
    }

    pub async fn dispatch(&self, text: impl Into<String>) -> HandleOutcome {
        let (reply, response) = oneshot::channel();
        let request = DispatchRequest::Handle {
            text: text.into(),
            reply,
        };

        if self.tx.send(request).is_err() {
            return HandleOutcome::Failed("input dispatcher is not running".to_string());
        }

        response
            .await
            .unwrap_or_else(|_| HandleOutcome::Failed("input dispatcher dropped request".to_string()))
    }

    /// Queued behind any text already sent, so earlier messages see the old
    /// settings.
    pub fn reconfigure(&self, settings: ServiceSettings) {
        if self.tx.send(DispatchRequest::Reconfigure(settings)).is_err() {
            warn!("Input dispatcher is not running; settings dropped");
        }
    }
}
