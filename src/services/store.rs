use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{EngineConfig, MonitoredTarget};

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(None);
    }

    let value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let data = serde_json::to_string_pretty(value).context("Failed to serialize")?;
    fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Copy a file that failed to load next to it, so a later save cannot lose it
fn backup_unreadable(path: &Path) {
    if !path.exists() {
        return;
    }

    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    let backup = path.with_file_name(name);

    match fs::copy(path, &backup) {
        Ok(_) => log::warn!("Kept unreadable {} as {}", path.display(), backup.display()),
        Err(e) => log::error!("Failed to back up {}: {}", path.display(), e),
    }
}

/// Settings document
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<EngineConfig> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    /// Unreadable settings are logged, backed up and replaced by defaults
    pub fn load_or_default(&self) -> EngineConfig {
        self.load().unwrap_or_else(|e| {
            log::error!("Error loading settings: {:#}", e);
            backup_unreadable(&self.path);
            EngineConfig::default()
        })
    }

    pub fn save(&self, settings: &EngineConfig) -> Result<()> {
        write_json(&self.path, settings).context("Error saving settings")
    }
}

/// Ordered list of monitored targets
#[derive(Debug, Clone)]
pub struct TargetStore {
    path: PathBuf,
}

impl TargetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<MonitoredTarget>> {
        let loaded: Vec<MonitoredTarget> = read_json(&self.path)?.unwrap_or_default();

        let mut targets: Vec<MonitoredTarget> = Vec::with_capacity(loaded.len());
        for target in loaded {
            if targets.iter().any(|t| t.name == target.name) {
                log::warn!("Ignoring duplicate target '{}' in {}", target.name, self.path.display());
                continue;
            }
            targets.push(target);
        }
        Ok(targets)
    }

    pub fn load_or_default(&self) -> Vec<MonitoredTarget> {
        self.load().unwrap_or_else(|e| {
            log::error!("Error loading monitored apps: {:#}", e);
            backup_unreadable(&self.path);
            Vec::new()
        })
    }

    pub fn save(&self, targets: &[MonitoredTarget]) -> Result<()> {
        write_json(&self.path, targets).context("Error saving monitored apps")
    }
}
