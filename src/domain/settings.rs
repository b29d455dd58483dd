use crate::domain::ir_camera::{IrConfig, IrMode};
use crate::infrastructure::bluetooth::protocol::ReportMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Log output. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive such as "info" or "wiimote=debug"; `RUST_LOG` wins
    pub level: String,
    pub console: bool,
    /// Write rolling log files here; `None` keeps logs on the console only
    pub directory: Option<PathBuf>,
    /// "daily", "hourly", "minutely" or "never"
    pub rotation: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            directory: None,
            rotation: "daily".to_string(),
        }
    }
}

fn default_false() -> bool {
    false
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Connection Settings
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// 0 waits without limit
    #[serde(default = "default_memory_read_timeout_ms")]
    pub memory_read_timeout_ms: u64,
    #[serde(default = "default_report_mode")]
    pub initial_report_mode: ReportMode,
    #[serde(default = "default_false")]
    pub halt_on_protocol_error: bool,

    // IR Camera Settings
    /// Configure the camera as part of connecting
    #[serde(default = "default_false")]
    pub ir_enabled: bool,
    #[serde(default = "default_ir_mode")]
    pub ir_mode: IrMode,
    #[serde(default = "default_ir_sensitivity")]
    pub ir_sensitivity: usize,
    #[serde(default = "default_ir_init_delay_ms")]
    pub ir_init_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            known_addresses: Vec::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
            receive_timeout_ms: default_receive_timeout_ms(),
            memory_read_timeout_ms: default_memory_read_timeout_ms(),
            initial_report_mode: default_report_mode(),
            halt_on_protocol_error: false,
            ir_enabled: false,
            ir_mode: default_ir_mode(),
            ir_sensitivity: default_ir_sensitivity(),
            ir_init_delay_ms: default_ir_init_delay_ms(),
        }
    }
}

impl Settings {
    pub fn ir_config(&self) -> IrConfig {
        IrConfig {
            mode: self.ir_mode,
            sensitivity: self.ir_sensitivity,
        }
    }
}

fn default_receive_timeout_ms() -> u64 {
    1000
}
fn default_memory_read_timeout_ms() -> u64 {
    5000
}
fn default_report_mode() -> ReportMode {
    ReportMode::ButtonsAccel
}
fn default_ir_mode() -> IrMode {
    IrMode::Extended
}
fn default_ir_sensitivity() -> usize {
    2
}
fn default_ir_init_delay_ms() -> u64 {
    50
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is
    /// missing or unreadable
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("Wiimote");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_address(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.settings.known_addresses.iter().any(|a| a == address) {
            self.settings.known_addresses.push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_json() {
        let settings: Settings = serde_json::from_str(r#"{"ir_sensitivity": 4}"#).unwrap();
        assert_eq!(settings.ir_sensitivity, 4);
        assert_eq!(settings.receive_timeout_ms, 1000);
        assert_eq!(settings.initial_report_mode, ReportMode::ButtonsAccel);
        assert_eq!(settings.ir_mode, IrMode::Extended);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::from_path(path.clone());
        service.get_mut().ir_mode = IrMode::Basic;
        service.add_known_address("00:1f:32:aa:bb:cc").unwrap();
        service.add_known_address("00:1f:32:aa:bb:cc").unwrap();

        let reloaded = SettingsService::from_path(path);
        assert_eq!(reloaded.get().ir_mode, IrMode::Basic);
        assert_eq!(reloaded.get().known_addresses, vec!["00:1f:32:aa:bb:cc"]);
        assert_eq!(
            reloaded.get().last_connected_address.as_deref(),
            Some("00:1f:32:aa:bb:cc")
        );
    }

    #[test]
    fn test_partial_log_settings() {
        let settings: Settings =
            serde_json::from_str(r#"{"log_settings": {"directory": "logs"}}"#).unwrap();
        assert_eq!(settings.log_settings.directory, Some(PathBuf::from("logs")));
        assert_eq!(settings.log_settings.level, "info");
        assert!(settings.log_settings.console);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let service = SettingsService::from_path(dir.path().join("absent.json"));
        assert_eq!(service.get().ir_init_delay_ms, 50);
    }
}
