//! Append-only log of dispatched commands

use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// `commands.log` next to the config file (respecting XDG)
    pub fn default_location() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        Self::at(config_dir.join("cabin-voice").join("commands.log"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one dispatched command
    pub fn record(&self, tag: &str, text: &str) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(
            file,
            "[{}] {} | {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            tag,
            text
        )?;
        Ok(())
    }
}
