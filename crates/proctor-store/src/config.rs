//! Proctor configuration and storage factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use proctor_core::controller::EngineConfig;
use proctor_core::persistence::{KeyValueStore, MemoryStore};
use proctor_core::security::SecurityLevel;

use crate::file::FileStore;

/// Which backend holds persisted sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per key under `storage_dir`.
    #[default]
    File,
    /// Process-local; nothing survives a restart.
    Memory,
}

/// Top-level proctor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorConfig {
    #[serde(default)]
    pub security_level: SecurityLevel,
    #[serde(default = "default_autosave")]
    pub autosave_interval_secs: u64,
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
    /// Delay before a scheduled forced submission fires.
    #[serde(default = "default_grace")]
    pub escalation_grace_secs: u64,
    #[serde(default = "default_tab_switch_threshold")]
    pub tab_switch_threshold: usize,
    #[serde(default = "default_devtools_threshold")]
    pub devtools_threshold_px: u32,
    #[serde(default = "default_devtools_poll")]
    pub devtools_poll_ms: u64,
    #[serde(default = "default_time_warnings")]
    pub time_warnings_secs: Vec<u64>,
    #[serde(default = "default_max_sessions")]
    pub max_sessions_per_target: usize,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Request the camera at session start.
    #[serde(default = "default_true")]
    pub webcam: bool,
    /// Request screen capture at session start.
    #[serde(default)]
    pub screen_capture: bool,
}

fn default_autosave() -> u64 {
    30
}
fn default_snapshot_interval() -> u64 {
    60
}
fn default_grace() -> u64 {
    5
}
fn default_tab_switch_threshold() -> usize {
    3
}
fn default_devtools_threshold() -> u32 {
    proctor_core::security::DEFAULT_DEVTOOLS_THRESHOLD_PX
}
fn default_devtools_poll() -> u64 {
    1000
}
fn default_time_warnings() -> Vec<u64> {
    vec![300, 60]
}
fn default_max_sessions() -> usize {
    proctor_core::persistence::DEFAULT_MAX_SESSIONS_PER_TARGET
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("./proctor-data")
}
fn default_true() -> bool {
    true
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            security_level: SecurityLevel::default(),
            autosave_interval_secs: default_autosave(),
            snapshot_interval_secs: default_snapshot_interval(),
            escalation_grace_secs: default_grace(),
            tab_switch_threshold: default_tab_switch_threshold(),
            devtools_threshold_px: default_devtools_threshold(),
            devtools_poll_ms: default_devtools_poll(),
            time_warnings_secs: default_time_warnings(),
            max_sessions_per_target: default_max_sessions(),
            storage: StorageBackend::default(),
            storage_dir: default_storage_dir(),
            webcam: true,
            screen_capture: false,
        }
    }
}

impl ProctorConfig {
    /// The engine settings, with zero intervals clamped to one unit.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            security_level: self.security_level,
            autosave_interval: Duration::from_secs(self.autosave_interval_secs.max(1)),
            snapshot_interval: Duration::from_secs(self.snapshot_interval_secs.max(1)),
            escalation_grace: Duration::from_secs(self.escalation_grace_secs),
            tab_switch_threshold: self.tab_switch_threshold.max(1),
            devtools_threshold_px: self.devtools_threshold_px,
            devtools_poll_interval: Duration::from_millis(self.devtools_poll_ms.max(1)),
            time_warnings: self.time_warnings_secs.clone(),
            max_sessions_per_target: self.max_sessions_per_target.max(1),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `proctor.toml` in the current directory
/// 2. `~/.config/proctor/config.toml`
///
/// Environment variable overrides: `PROCTOR_SECURITY_LEVEL`, `PROCTOR_STORAGE_DIR`.
pub fn load_config() -> Result<ProctorConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ProctorConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("proctor.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|dir| dir.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            tracing::debug!("loaded config from {}", path.display());
            toml::from_str::<ProctorConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ProctorConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut ProctorConfig) -> Result<()> {
    if let Ok(level) = std::env::var("PROCTOR_SECURITY_LEVEL") {
        config.security_level = level
            .parse()
            .map_err(|e: String| anyhow::anyhow!("PROCTOR_SECURITY_LEVEL: {e}"))?;
    }

    if let Ok(dir) = std::env::var("PROCTOR_STORAGE_DIR") {
        config.storage_dir = PathBuf::from(dir);
    }

    let resolved = resolve_env_vars(&config.storage_dir.to_string_lossy());
    config.storage_dir = PathBuf::from(resolved);
    Ok(())
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("proctor"))
}

/// Create the storage backend described by the configuration.
pub fn create_store(config: &ProctorConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.storage {
        StorageBackend::File => {
            let store = FileStore::open(&config.storage_dir).with_context(|| {
                format!(
                    "failed to open storage directory: {}",
                    config.storage_dir.display()
                )
            })?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_PROCTOR_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_PROCTOR_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_PROCTOR_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        std::env::remove_var("_PROCTOR_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = ProctorConfig::default();
        assert_eq!(config.security_level, SecurityLevel::Standard);
        assert_eq!(config.autosave_interval_secs, 30);
        assert_eq!(config.escalation_grace_secs, 5);
        assert_eq!(config.time_warnings_secs, vec![300, 60]);
        assert!(config.webcam);
        assert!(!config.screen_capture);
    }

    #[test]
    fn parse_config() {
        let toml_str = r#"
security_level = "maximum"
snapshot_interval_secs = 15
escalation_grace_secs = 10
storage = "memory"
time_warnings_secs = [120]
"#;
        let config: ProctorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.security_level, SecurityLevel::Maximum);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.autosave_interval_secs, 30);

        let engine = config.engine_config();
        assert_eq!(engine.snapshot_interval, Duration::from_secs(15));
        assert_eq!(engine.escalation_grace, Duration::from_secs(10));
        assert_eq!(engine.time_warnings, vec![120]);
    }

    #[test]
    fn engine_config_clamps_zero_intervals() {
        let config = ProctorConfig {
            autosave_interval_secs: 0,
            devtools_poll_ms: 0,
            max_sessions_per_target: 0,
            ..Default::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.autosave_interval, Duration::from_secs(1));
        assert_eq!(engine.devtools_poll_interval, Duration::from_millis(1));
        assert_eq!(engine.max_sessions_per_target, 1);
    }

    #[test]
    fn load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proctor.toml");
        std::fs::write(&path, "security_level = \"high\"\nwebcam = false\n").unwrap();

        let config = load_config_from(Some(&path)).unwrap();
        assert!(!config.webcam);
        assert!(load_config_from(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn create_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProctorConfig {
            storage_dir: dir.path().join("data"),
            ..Default::default()
        };
        let store = create_store(&config).unwrap();
        store.set("k", "v").unwrap();
        assert!(dir.path().join("data").join("k.json").exists());
    }
}
