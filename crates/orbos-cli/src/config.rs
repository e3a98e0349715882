//! Operator configuration – reads/writes `~/.orbos/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use orbos_runtime::KernelConfig;
use orbos_types::LogLevel;
use serde::{Deserialize, Serialize};

/// Persisted configuration stored in `~/.orbos/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// File standing in for the reset-surviving backup register.
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,

    /// Resets tolerated before the CLI gives up instead of rebooting.
    #[serde(default = "default_max_resets")]
    pub max_resets: u32,

    #[serde(default)]
    pub kernel: KernelConfig,
}

fn default_backup_path() -> PathBuf {
    orbos_dir(&home()).join("backup.reg")
}

fn default_max_resets() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_path: default_backup_path(),
            max_resets: default_max_resets(),
            kernel: KernelConfig::default(),
        }
    }
}

fn home() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn orbos_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".orbos")
}

/// Return `$ORBOS_CONFIG`, or `~/.orbos/config.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os("ORBOS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| config_path_for_home(&home()))
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    orbos_dir(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ORBOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ORBOS_LOG_LEVEL` | `kernel.log_level` |
/// | `ORBOS_WATCHDOG_PERIOD_MS` | `kernel.hardware_watchdog_period_ms` (early warning moves to half) |
/// | `ORBOS_BACKUP_PATH` | `backup_path` |
/// | `ORBOS_MAX_RESETS` | `max_resets` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ORBOS_LOG_LEVEL")
        && let Ok(level) = v.parse::<LogLevel>()
    {
        cfg.kernel.log_level = level;
    }
    if let Ok(v) = std::env::var("ORBOS_WATCHDOG_PERIOD_MS")
        && let Ok(period) = v.parse::<u32>()
        && period > 1
    {
        cfg.kernel.hardware_watchdog_period_ms = period;
        cfg.kernel.hardware_early_warning_ms = period / 2;
    }
    if let Some(v) = std::env::var_os("ORBOS_BACKUP_PATH") {
        cfg.backup_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("ORBOS_MAX_RESETS")
        && let Ok(n) = v.parse::<u32>()
    {
        cfg.max_resets = n;
    }
}

/// The default configuration with `ORBOS_*` overrides applied.  Used when
/// there is no config file or it cannot be loaded.
pub fn default_with_env() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Save the config to disk, creating `~/.orbos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
