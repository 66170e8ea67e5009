use arboard::Clipboard;
use enigo::{Button, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const PASTE_SETTLE_DELAY: Duration = Duration::from_millis(30);
const CLIPBOARD_SETTLE_DELAY: Duration = Duration::from_millis(50);
const FOCUS_SETTLE_DELAY: Duration = Duration::from_millis(60);

#[derive(Debug, Error)]
pub enum InjectionError {
    #[error("failed to initialize input backend: {0}")]
    Init(String),
    #[error("OS accepted only {sent} of {total} input events")]
    PartialDelivery { sent: usize, total: usize },
    #[error("key {key} could not be sent: {message}")]
    Key { key: String, message: String },
    #[error("clipboard error: {0}")]
    Clipboard(String),
    #[error("pointer click failed: {0}")]
    Pointer(String),
}

/// Keyboard capabilities the input service drives. Both OS variants expose
/// the same set so callers never branch on platform.
pub trait InputInjector: Send {
    fn name(&self) -> &'static str;
    /// Clicks where the pointer is so the window under it takes focus.
    fn focus_target(&mut self) -> Result<(), InjectionError>;
    fn type_text(&mut self, text: &str) -> Result<(), InjectionError>;
    fn backspace(&mut self, count: usize) -> Result<(), InjectionError>;
    fn press_enter(&mut self) -> Result<(), InjectionError>;
    fn press_tab(&mut self) -> Result<(), InjectionError>;
    fn press_escape(&mut self) -> Result<(), InjectionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMethod {
    /// Synthetic events on Windows, clipboard paste everywhere else.
    #[default]
    Auto,
    Synthetic,
    Clipboard,
    DryRun,
}

impl InputMethod {
    pub fn resolve(self) -> Self {
        match self {
            InputMethod::Auto if cfg!(target_os = "windows") => InputMethod::Synthetic,
            InputMethod::Auto => InputMethod::Clipboard,
            other => other,
        }
    }
}

pub fn build_injector(method: InputMethod) -> Result<Box<dyn InputInjector>, InjectionError> {
    let injector: Box<dyn InputInjector> = match method.resolve() {
        InputMethod::Synthetic => Box::new(SyntheticInjector::new()?),
        InputMethod::Clipboard => Box::new(ClipboardInjector::new()?),
        InputMethod::DryRun | InputMethod::Auto => Box::new(RecordingInjector::new()),
    };
    info!("⌨️  Input method: {}", injector.name());
    Ok(injector)
}

fn new_enigo() -> Result<Enigo, InjectionError> {
    Enigo::new(&Settings::default()).map_err(|e| InjectionError::Init(e.to_string()))
}

fn click(enigo: &mut Enigo, key: Key) -> Result<(), InjectionError> {
    enigo
        .key(key, Direction::Click)
        .map_err(|e| InjectionError::Key {
            key: format!("{key:?}"),
            message: e.to_string(),
        })
}

fn click_pointer(enigo: &mut Enigo) -> Result<(), InjectionError> {
    enigo
        .button(Button::Left, Direction::Click)
        .map_err(|e| InjectionError::Pointer(e.to_string()))?;
    thread::sleep(FOCUS_SETTLE_DELAY);
    Ok(())
}

fn click_times(enigo: &mut Enigo, key: Key, times: usize) -> Result<(), InjectionError> {
    for sent in 0..times {
        if let Err(err) = click(enigo, key) {
            debug!("Key repeat stopped after {sent}/{times}: {err}");
            return Err(InjectionError::PartialDelivery { sent, total: times });
        }
    }
    Ok(())
}

/// Emits every character as a Unicode key-down/key-up pair.
pub struct SyntheticInjector {
    enigo: Enigo,
}

impl SyntheticInjector {
    pub fn new() -> Result<Self, InjectionError> {
        Ok(Self { enigo: new_enigo()? })
    }
}

impl InputInjector for SyntheticInjector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn focus_target(&mut self) -> Result<(), InjectionError> {
        click_pointer(&mut self.enigo)
    }

    fn type_text(&mut self, text: &str) -> Result<(), InjectionError> {
        let total = text.chars().count();
        for (sent, ch) in text.chars().enumerate() {
            if let Err(err) = click(&mut self.enigo, Key::Unicode(ch)) {
                debug!("Unicode injection stopped at {sent}/{total}: {err}");
                return Err(InjectionError::PartialDelivery { sent, total });
            }
        }
        Ok(())
    }

    fn backspace(&mut self, count: usize) -> Result<(), InjectionError> {
        click_times(&mut self.enigo, Key::Backspace, count)
    }

    fn press_enter(&mut self) -> Result<(), InjectionError> {
        click(&mut self.enigo, Key::Return)
    }

    fn press_tab(&mut self) -> Result<(), InjectionError> {
        click(&mut self.enigo, Key::Tab)
    }

    fn press_escape(&mut self) -> Result<(), InjectionError> {
        click(&mut self.enigo, Key::Escape)
    }
}

/// Places text on the clipboard and sends the platform paste shortcut.
pub struct ClipboardInjector {
    enigo: Enigo,
    clipboard: Clipboard,
}

impl ClipboardInjector {
    pub fn new() -> Result<Self, InjectionError> {
        let clipboard = Clipboard::new().map_err(|e| InjectionError::Clipboard(e.to_string()))?;
        Ok(Self {
            enigo: new_enigo()?,
            clipboard,
        })
    }

    fn paste_modifier() -> Key {
        #[cfg(target_os = "macos")]
        {
            Key::Meta
        }
        #[cfg(not(target_os = "macos"))]
        {
            Key::Control
        }
    }

    fn send_paste(&mut self) -> Result<(), InjectionError> {
        let modifier = Self::paste_modifier();
        self.enigo
            .key(modifier, Direction::Press)
            .map_err(|e| InjectionError::Key {
                key: format!("{modifier:?}"),
                message: e.to_string(),
            })?;

        let pasted = click(&mut self.enigo, Key::Unicode('v'));
        thread::sleep(PASTE_SETTLE_DELAY);

        // Always release the modifier, even when the click failed.
        let released = self
            .enigo
            .key(modifier, Direction::Release)
            .map_err(|e| InjectionError::Key {
                key: format!("{modifier:?}"),
                message: e.to_string(),
            });

        pasted.and(released)
    }
}

impl InputInjector for ClipboardInjector {
    fn name(&self) -> &'static str {
        "clipboard-paste"
    }

    fn focus_target(&mut self) -> Result<(), InjectionError> {
        click_pointer(&mut self.enigo)
    }

    fn type_text(&mut self, text: &str) -> Result<(), InjectionError> {
        if text.is_empty() {
            return Ok(());
        }
        self.clipboard
            .set_text(text)
            .map_err(|e| InjectionError::Clipboard(e.to_string()))?;
        thread::sleep(CLIPBOARD_SETTLE_DELAY);
        self.send_paste()
    }

    fn backspace(&mut self, count: usize) -> Result<(), InjectionError> {
        click_times(&mut self.enigo, Key::Backspace, count)
    }

    fn press_enter(&mut self) -> Result<(), InjectionError> {
        click(&mut self.enigo, Key::Return)
    }

    fn press_tab(&mut self) -> Result<(), InjectionError> {
        click(&mut self.enigo, Key::Tab)
    }

    fn press_escape(&mut self) -> Result<(), InjectionError> {
        click(&mut self.enigo, Key::Escape)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedEvent {
    FocusClick,
    Text(String),
    Backspace(usize),
    Enter,
    Tab,
    Escape,
}

/// Logs and records events instead of touching the OS. Backs the `dry-run`
/// input method; clones share one event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingInjector {
    events: Arc<Mutex<Vec<InjectedEvent>>>,
    fail_next: Arc<Mutex<Option<String>>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<InjectedEvent> {
        self.events.lock().expect("event log lock poisoned").clone()
    }

    /// Make the next operation fail with `message` instead of recording.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().expect("failure slot lock poisoned") = Some(message.into());
    }

    fn record(&self, event: InjectedEvent) -> Result<(), InjectionError> {
        if let Some(message) = self
            .fail_next
            .lock()
            .expect("failure slot lock poisoned")
            .take()
        {
            return Err(InjectionError::Key {
                key: format!("{event:?}"),
                message,
            });
        }
        debug!("(dry-run) {:?}", event);
        self.events
            .lock()
            .expect("event log lock poisoned")
            .push(event);
        Ok(())
    }
}

impl InputInjector for RecordingInjector {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn focus_target(&mut self) -> Result<(), InjectionError> {
        self.record(InjectedEvent::FocusClick)
    }

    fn type_text(&mut self, text: &str) -> Result<(), InjectionError> {
        if text.is_empty() {
            return Ok(());
        }
        self.record(InjectedEvent::Text(text.to_string()))
    }

    fn backspace(&mut self, count: usize) -> Result<(), InjectionError> {
        if count == 0 {
            return Ok(());
        }
        self.record(InjectedEvent::Backspace(count))
    }

    fn press_enter(&mut self) -> Result<(), InjectionError> {
        self.record(InjectedEvent::Enter)
    }

    fn press_tab(&mut self) -> Result<(), InjectionError> {
        self.record(InjectedEvent::Tab)
    }

    fn press_escape(&mut self) -> Result<(), InjectionError> {
        self.record(InjectedEvent::Escape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_per_platform() {
        let resolved = InputMethod::Auto.resolve();
        if cfg!(target_os = "windows") {
            assert_eq!(resolved, InputMethod::Synthetic);
        } else {
            assert_eq!(resolved, InputMethod::Clipboard);
        }
        assert_eq!(InputMethod::DryRun.resolve(), InputMethod::DryRun);
    }

    #[test]
    fn input_method_parses_kebab_case() {
        let method: InputMethod = serde_json::from_str("\"dry-run\"").unwrap();
        assert_eq!(method, InputMethod::DryRun);
    }

    #[test]
    fn recording_injector_shares_log_between_clones() {
        let recorder = RecordingInjector::new();
        let mut injector = recorder.clone();
        injector.type_text("hi").unwrap();
        injector.backspace(0).unwrap();
        injector.backspace(2).unwrap();
        injector.press_enter().unwrap();
        assert_eq!(
            recorder.events(),
            vec![
                InjectedEvent::Text("hi".to_string()),
                InjectedEvent::Backspace(2),
                InjectedEvent::Enter,
            ]
        );
    }

    #[test]
    fn recording_injector_fails_once_on_request() {
        let recorder = RecordingInjector::new();
        let mut injector = recorder.clone();
        recorder.fail_next("denied");
        assert!(injector.press_tab().is_err());
        assert!(injector.press_tab().is_ok());
        assert_eq!(recorder.events(), vec![InjectedEvent::Tab]);
    }
}
