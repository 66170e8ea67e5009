//! Fire-and-forget user notifications.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info, warn};

const APP_NAME: &str = "LAN Voice Input";

/// Sink for short user-facing messages. Must never fail or block the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!("🔔 {title}: {message}");
    }
}

/// Logs every notification and, while enabled, shows it on the desktop from
/// a worker thread.
pub struct DesktopNotifier {
    enabled: AtomicBool,
    queue: Mutex<Option<Sender<(String, String)>>>,
}

impl DesktopNotifier {
    pub fn new(enabled: bool) -> Self {
        let (tx, rx) = mpsc::channel::<(String, String)>();
        let spawned = thread::Builder::new()
            .name("desktop-notify".to_string())
            .spawn(move || {
                for (title, message) in rx {
                    show_desktop_notification(&title, &message);
                }
            });

        let queue = match spawned {
            Ok(_) => Some(tx),
            Err(err) => {
                warn!("Desktop notifications disabled: {err}");
                None
            }
        };

        Self::with_queue(queue, enabled)
    }

    fn with_queue(queue: Option<Sender<(String, String)>>, enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            queue: Mutex::new(queue),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.swap(enabled, Ordering::SeqCst) != enabled {
            debug!("Desktop notifications {}", if enabled { "on" } else { "off" });
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) {
        TracingNotifier.notify(title, message);
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }

        let Ok(mut queue) = self.queue.lock() else {
            return;
        };
        let delivered = queue
            .as_ref()
            .map(|tx| tx.send((title.to_string(), message.to_string())).is_ok())
            .unwrap_or(false);
        if !delivered {
            *queue = None;
        }
    }
}

fn show_desktop_notification(title: &str, message: &str) {
    let result = if cfg!(target_os = "macos") {
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            escape_applescript(message),
            escape_applescript(title)
        );
        Command::new("osascript")
            .arg("-e")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
    } else if cfg!(target_os = "windows") {
        return;
    } else {
        Command::new("notify-send")
            .arg("--app-name")
            .arg(APP_NAME)
            .arg(title)
            .arg(message)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
    };

    if let Err(err) = result {
        debug!("Desktop notification failed: {err}");
    }
}

fn escape_applescript(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notifier_only_logs() {
        let (tx, rx) = mpsc::channel();
        let notifier = DesktopNotifier::with_queue(Some(tx), true);

        notifier.notify("Phone connected", "clients: 1");
        assert_eq!(
            rx.try_recv().unwrap(),
            ("Phone connected".to_string(), "clients: 1".to_string())
        );

        notifier.set_enabled(false);
        notifier.notify("Phone disconnected", "clients: 0");
        assert!(rx.try_recv().is_err());

        notifier.set_enabled(true);
        notifier.notify("Service stopped", "bye");
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn applescript_quotes_are_escaped() {
        assert_eq!(escape_applescript(r#"say "hi" \ bye"#), r#"say \"hi\" \\ bye"#);
    }
}
