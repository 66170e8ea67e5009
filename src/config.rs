use anyhow::{anyhow, Context, Result};
use jsonc_parser::{parse_to_serde_value, ParseOptions};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time;

use crate::input::InputMethod;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// First port tried for the HTTP listener.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// First port tried for the WebSocket listener.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,

    /// LAN address advertised to phones; detected when unset.
    #[serde(default)]
    pub advertised_host: Option<String>,

    #[serde(default)]
    pub input_method: InputMethod,

    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,

    /// Click at the pointer position before typing so the window under it
    /// has focus.
    #[serde(default = "default_focus_click")]
    pub focus_click: bool,

    /// Larger WebSocket messages close the connection.
    #[serde(default = "default_ws_max_message_bytes")]
    pub ws_max_message_bytes: usize,

    /// 0 disables keepalive pings.
    #[serde(default = "default_ws_ping_interval_ms")]
    pub ws_ping_interval_ms: u64,

    #[serde(default = "default_ws_ping_timeout_ms")]
    pub ws_ping_timeout_ms: u64,

    /// 0 disables the limit.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_desktop_notifications")]
    pub desktop_notifications: bool,

    #[serde(default)]
    pub index_path: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_commands",
        serialize_with = "serialize_commands"
    )]
    pub commands: Vec<ConfiguredCommand>,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_ws_port() -> u16 {
    8765
}

fn default_port_attempts() -> u16 {
    50
}

fn default_dedup_window_ms() -> u64 {
    1200
}

fn default_focus_click() -> bool {
    true
}

fn default_ws_max_message_bytes() -> usize {
    1_000_000
}

fn default_ws_ping_interval_ms() -> u64 {
    20_000
}

fn default_ws_ping_timeout_ms() -> u64 {
    10_000
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_desktop_notifications() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            port_attempts: default_port_attempts(),
            advertised_host: None,
            input_method: InputMethod::default(),
            dedup_window_ms: default_dedup_window_ms(),
            focus_click: default_focus_click(),
            ws_max_message_bytes: default_ws_max_message_bytes(),
            ws_ping_interval_ms: default_ws_ping_interval_ms(),
            ws_ping_timeout_ms: default_ws_ping_timeout_ms(),
            command_timeout_secs: default_command_timeout_secs(),
            desktop_notifications: default_desktop_notifications(),
            index_path: None,
            commands: Vec::new(),
        }
    }
}

impl Config {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

/// A phrase that runs an external program when sent as a `cmd` message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfiguredCommand {
    pub match_string: String,
    pub command: CommandSpec,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CommandSpec {
    /// Shell-style command line, split into words before running.
    Line(String),
    Argv(Vec<String>),
    #[default]
    Missing,
}

impl ConfiguredCommand {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let match_string = object
            .get("match-string")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let command = match object.get("command") {
            Some(Value::String(line)) => CommandSpec::Line(line.clone()),
            Some(Value::Array(items)) => CommandSpec::Argv(items.iter().map(stringify).collect()),
            _ => CommandSpec::Missing,
        };

        let args = match object.get("args") {
            Some(Value::Array(items)) => items.iter().map(stringify).collect(),
            _ => Vec::new(),
        };

        Some(Self {
            match_string,
            command,
            args,
        })
    }

    fn to_value(&self) -> Value {
        let command = match &self.command {
            CommandSpec::Line(line) => Value::String(line.clone()),
            CommandSpec::Argv(argv) => Value::from(argv.clone()),
            CommandSpec::Missing => Value::Null,
        };
        serde_json::json!({
            "match-string": self.match_string,
            "command": command,
            "args": self.args,
        })
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Non-object entries are dropped; a malformed entry never rejects the file.
fn deserialize_commands<'de, D>(deserializer: D) -> Result<Vec<ConfiguredCommand>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::Array(items) => items.iter().filter_map(ConfiguredCommand::from_value).collect(),
        _ => Vec::new(),
    })
}

fn serialize_commands<S>(commands: &[ConfiguredCommand], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let values: Vec<Value> = commands.iter().map(ConfiguredCommand::to_value).collect();
    values.serialize(serializer)
}

#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<ConfigManagerInner>,
}

struct ConfigManagerInner {
    config: RwLock<Config>,
    config_path: Option<PathBuf>,
    change_tx: watch::Sender<Config>,
    watcher_active: AtomicBool,
}

impl ConfigManager {
    /// Loads `explicit_path`, else the per-user config file, creating the
    /// file with defaults when missing.
    pub fn load(explicit_path: Option<PathBuf>) -> Result<Self> {
        let path = match explicit_path {
            Some(path) => path,
            None => Self::config_dir()?.join("config.jsonc"),
        };
        Self::load_from(path)
    }

    pub fn load_from(path: PathBuf) -> Result<Self> {
        let config = if path.exists() {
            Self::read_config_from_disk(&path)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
            let default_config = Config::default();
            Self::write_config_file(&path, &default_config)?;
            tracing::info!("Created default config at: {:?}", path);
            default_config
        };

        tracing::info!("Loaded config from: {:?}", path);
        Ok(Self::build(config, Some(path)))
    }

    /// A manager that never touches the filesystem.
    pub fn from_config(config: Config) -> Self {
        Self::build(config, None)
    }

    fn build(config: Config, config_path: Option<PathBuf>) -> Self {
        let (change_tx, _) = watch::channel(config.clone());
        Self {
            inner: Arc::new(ConfigManagerInner {
                config: RwLock::new(config),
                config_path,
                change_tx,
                watcher_active: AtomicBool::new(false),
            }),
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        let dir = directories::ProjectDirs::from("", "", "lanvoice-rs")
            .context("Failed to get config directory")?
            .config_dir()
            .to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create config directory")?;
        Ok(dir)
    }

    pub fn start_watching(&self) {
        let Some(path) = self.inner.config_path.clone() else {
            return;
        };
        if self.inner.watcher_active.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut last_state = Self::file_state(&path);

        tokio::spawn(async move {
            let mut ticker = time::interval(Duration::from_millis(500));

            loop {
                ticker.tick().await;

                let current_state = Self::file_state(&path);
                if current_state == last_state {
                    continue;
                }
                last_state = current_state;

                match Self::read_config_from_disk(&path) {
                    Ok(new_config) => {
                        let mut guard = inner.config.write().expect("config lock poisoned");
                        if *guard != new_config {
                            *guard = new_config.clone();
                            drop(guard);

                            tracing::info!(
                                commands = new_config.commands.len(),
                                "Reloaded config from: {:?}",
                                path
                            );
                            let _ = inner.change_tx.send(new_config);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Failed to reload config: {err:#}");
                    }
                }
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.inner.change_tx.subscribe()
    }

    pub fn get(&self) -> Config {
        self.inner
            .config
            .read()
            .expect("config lock poisoned")
            .clone()
    }

    /// Snapshot of the configured phrase → program mappings.
    pub fn commands(&self) -> Vec<ConfiguredCommand> {
        self.inner
            .config
            .read()
            .expect("config lock poisoned")
            .commands
            .clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut Config)) -> Result<()> {
        let config = {
            let mut guard = self.inner.config.write().expect("config lock poisoned");
            apply(&mut guard);
            guard.clone()
        };

        if let Some(path) = &self.inner.config_path {
            Self::write_config_file(path, &config)?;
            tracing::info!("Saved config to: {:?}", path);
        }

        let _ = self.inner.change_tx.send(config);
        Ok(())
    }

    fn read_config_from_disk(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {:?}", path))?;
        Self::parse_config(&content)
    }

    fn write_config_file(path: &Path, config: &Config) -> Result<()> {
        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config file at {:?}", path))
    }

    fn parse_config(content: &str) -> Result<Config> {
        let value = parse_to_serde_value(content, &ParseOptions::default())
            .context("Failed to parse config as JSONC")?
            .ok_or_else(|| anyhow!("Config file did not contain a JSON value"))?;
        serde_json::from_value(value).context("Failed to deserialize config")
    }

    fn file_state(path: &Path) -> Option<(SystemTime, u64)> {
        let metadata = fs::metadata(path).ok()?;
        let modified = metadata.modified().ok()?;
        Some((modified, metadata.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonc_with_comments_and_partial_fields() {
        let config = ConfigManager::parse_config(
            r#"{
                // phones on the office wifi
                "advertised_host": "192.168.1.20",
                "input_method": "dry-run",
                "commands": [
                    { "match-string": "锁屏", "command": "loginctl lock-session" },
                ],
            }"#,
        )
        .unwrap();

        assert_eq!(config.advertised_host.as_deref(), Some("192.168.1.20"));
        assert_eq!(config.input_method, InputMethod::DryRun);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.ws_port, 8765);
        assert_eq!(config.dedup_window(), Duration::from_millis(1200));
        assert_eq!(
            config.commands,
            vec![ConfiguredCommand {
                match_string: "锁屏".to_string(),
                command: CommandSpec::Line("loginctl lock-session".to_string()),
                args: Vec::new(),
            }]
        );
    }

    #[test]
    fn malformed_command_entries_are_tolerated() {
        let config = ConfigManager::parse_config(
            r#"{
                "commands": [
                    "not an object",
                    { "match-string": "go", "command": ["open", 42, true], "args": "nope" },
                    { "command": 7 }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.commands.len(), 2);
        assert_eq!(
            config.commands[0].command,
            CommandSpec::Argv(vec!["open".into(), "42".into(), "true".into()])
        );
        assert!(config.commands[0].args.is_empty());
        assert_eq!(config.commands[1].match_string, "");
        assert_eq!(config.commands[1].command, CommandSpec::Missing);
    }

    #[test]
    fn non_list_commands_means_none() {
        let config = ConfigManager::parse_config(r#"{ "commands": { "a": 1 } }"#).unwrap();
        assert!(config.commands.is_empty());
    }

    #[test]
    fn commands_survive_a_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.jsonc");

        let manager = ConfigManager::load_from(path.clone()).unwrap();
        manager
            .update(|config| {
                config.commands.push(ConfiguredCommand {
                    match_string: "hi".to_string(),
                    command: CommandSpec::Argv(vec!["echo".to_string()]),
                    args: vec!["there".to_string()],
                });
            })
            .unwrap();

        let reloaded = ConfigManager::load_from(path).unwrap();
        assert_eq!(reloaded.commands(), manager.commands());
    }

    #[tokio::test]
    async fn edits_on_disk_reach_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.jsonc");
        let manager = ConfigManager::load_from(path.clone()).unwrap();
        let mut changes = manager.subscribe();
        manager.start_watching();

        fs::write(&path, r#"{ "dedup_window_ms": 300, "focus_click": false }"#).unwrap();

        tokio::time::timeout(Duration::from_secs(5), changes.changed())
            .await
            .unwrap()
            .unwrap();
        let reloaded = changes.borrow().clone();
        assert_eq!(reloaded.dedup_window(), Duration::from_millis(300));
        assert!(!reloaded.focus_click);
        assert_eq!(manager.get(), reloaded);
    }

    #[test]
    fn zero_timeout_disables_limit() {
        let config = Config {
            command_timeout_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.command_timeout(), None);
    }
}
