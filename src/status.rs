use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigManager;

pub const STATUS_FILE_NAME: &str = "service_status.json";

/// What tray or QR tooling needs to reach the running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSnapshot {
    pub running: bool,
    pub http_port: u16,
    pub ws_port: u16,
    pub url: String,
}

/// Writes service status for external tools to read
pub struct StatusWriter {
    status_file: PathBuf,
}

impl StatusWriter {
    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(&ConfigManager::config_dir()?))
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            status_file: dir.join(STATUS_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.status_file
    }

    pub fn write(&self, snapshot: &ServiceSnapshot) -> Result<()> {
        let json =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize service status")?;
        fs::write(&self.status_file, json).context("Failed to write service status")?;
        tracing::debug!("Wrote service status to {:?}", self.status_file);
        Ok(())
    }

    /// Removes the file so a stopped service never advertises a stale URL.
    pub fn clear(&self) -> Result<()> {
        if self.status_file.exists() {
            fs::remove_file(&self.status_file).context("Failed to remove service status file")?;
            tracing::debug!("Removed service status file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StatusWriter::in_dir(dir.path());
        writer
            .write(&ServiceSnapshot {
                running: true,
                http_port: 8081,
                ws_port: 8765,
                url: "http://192.168.1.5:8081?ws=8765".into(),
            })
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(writer.path()).unwrap()).unwrap();
        assert_eq!(written["http_port"], 8081);
        assert_eq!(written["url"], "http://192.168.1.5:8081?ws=8765");

        writer.clear().unwrap();
        assert!(!writer.path().exists());
        writer.clear().unwrap();
    }
}
