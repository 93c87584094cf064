use clap::Parser;
use std::path::PathBuf;

const APP_DIR: &str = "cpu-watchdog";

/// CPU Watchdog - restarts applications stuck at high CPU or gone missing
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 9999)]
    pub port: u16,

    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Settings file
    #[arg(short, long, env = "WATCHDOG_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Monitored applications file
    #[arg(short, long, env = "WATCHDOG_TARGETS")]
    pub targets: Option<PathBuf>,

    /// Start monitoring right away when an application is enabled
    #[arg(long, env = "WATCHDOG_AUTOSTART")]
    pub autostart: bool,
}

impl CommandArgs {
    pub fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(|| config_dir().join("settings.json"))
    }

    pub fn targets_path(&self) -> PathBuf {
        self.targets
            .clone()
            .unwrap_or_else(|| config_dir().join("monitored_apps.json"))
    }
}

/// Per-user config directory, the working directory when there is none
fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}
