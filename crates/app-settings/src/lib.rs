use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

mod engine;

pub use engine::{EngineSettings, ENGINE_SETTINGS_FILE};

#[derive(Debug, Error)]
pub enum AppSettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Settings path unavailable")]
    MissingSettingsPath,

    #[error("Invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, AppSettingsError>;

/// Per-user state remembered between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub last_workdir: Option<PathBuf>,
    #[serde(default)]
    pub last_map: Option<PathBuf>,
}

impl AppSettings {
    pub fn load() -> Result<Self> {
        load_impl()
    }

    pub fn save(&self) -> Result<()> {
        save_impl(self)
    }

    pub fn remember_session(&mut self, workdir: PathBuf, map: Option<PathBuf>) {
        self.last_workdir = Some(workdir);
        if map.is_some() {
            self.last_map = map;
        }
    }
}

#[cfg(target_os = "windows")]
const REGISTRY_KEY: &str = "Software\\Vistoria";

#[cfg(target_os = "windows")]
fn load_impl() -> Result<AppSettings> {
    use winreg::enums::{HKEY_CURRENT_USER, KEY_READ};
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let Ok(key) = hkcu.open_subkey_with_flags(REGISTRY_KEY, KEY_READ) else {
        return Ok(AppSettings::default());
    };

    let path_value = |name: &str| key.get_value::<String, _>(name).ok().map(PathBuf::from);
    Ok(AppSettings {
        last_workdir: path_value("LastWorkdir"),
        last_map: path_value("LastMap"),
    })
}

#[cfg(target_os = "windows")]
fn save_impl(settings: &AppSettings) -> Result<()> {
    use winreg::enums::{HKEY_CURRENT_USER, KEY_WRITE};
    use winreg::RegKey;

    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (key, _) = hkcu.create_subkey_with_flags(REGISTRY_KEY, KEY_WRITE)?;

    for (name, value) in [
        ("LastWorkdir", &settings.last_workdir),
        ("LastMap", &settings.last_map),
    ] {
        match value {
            Some(path) => {
                let value = path.to_string_lossy();
                key.set_value(name, &value.as_ref())?;
            }
            None => {
                let _ = key.delete_value(name);
            }
        }
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
const SETTINGS_FILE: &str = "settings.json";

#[cfg(not(target_os = "windows"))]
fn load_impl() -> Result<AppSettings> {
    let path = settings_file_path()?;
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no remembered session");
            Ok(AppSettings::default())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(not(target_os = "windows"))]
fn save_impl(settings: &AppSettings) -> Result<()> {
    let path = settings_file_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

/// Per-user config directory: `~/.config/vistoria` on Linux, `~/Library/Application Support/br.Vistoria.vistoria`
/// on macOS.
#[cfg(not(target_os = "windows"))]
fn settings_file_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("br", "Vistoria", "vistoria")
        .ok_or(AppSettingsError::MissingSettingsPath)?;
    Ok(dirs.config_dir().join(SETTINGS_FILE))
}
