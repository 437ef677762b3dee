//! # Player mirror configuration
//!
//! YAML configuration for the player mirror engine:
//! - an embedded default document merged with an optional `config.yaml`
//! - environment variable overrides (`PLAYERMIRROR_CONFIG__mirror__poll_interval_ms=2000`)
//! - typed getters and setters with defaults
//!
//! There is no process-wide instance. Build a [`Config`] once and hand it
//! (usually as `Arc<Config>`) to whatever needs it.
//!
//! ## Usage
//!
//! ```no_run
//! use mirrorconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let period = config.get_poll_interval_ms()?;
//! config.set_min_reload_interval_ms(500)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info};

const DEFAULT_CONFIG: &str = include_str!("playermirror.yaml");

const ENV_CONFIG_DIR: &str = "PLAYERMIRROR_CONFIG";
const ENV_PREFIX: &str = "PLAYERMIRROR_CONFIG__";
const CONFIG_DIR_NAME: &str = ".playermirror";

const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const DEFAULT_MIN_RELOAD_INTERVAL_MS: u64 = 1000;
const DEFAULT_RELOAD_WORKERS: usize = 2;
const DEFAULT_SENTINEL_FALLBACK: &str = "adapter";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or($default)),
                Ok(Value::String(s)) => Ok(s.trim().parse::<u64>().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for the player mirror.
///
/// A config loaded with [`Config::load_config`] is backed by a `config.yaml`
/// file and every setter saves it. A config built with
/// [`Config::from_yaml_str`] is detached: it lives in memory only.
#[derive(Debug)]
pub struct Config {
    config_dir: Option<String>,
    path: Option<String>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Creates the directory if needed and checks it is a writable directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PLAYERMIRROR_CONFIG` environment variable
    /// 3. `.playermirror` in the current directory
    /// 4. `.playermirror` in the user's home directory
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// The embedded defaults are merged with `config.yaml` when it exists,
    /// environment overrides are applied, and the merged document is written
    /// back so the file always lists every known key.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path, "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut value, &lower_keys_value(external));
            }
            Err(_) => {
                info!(config_file = %path, "Config file not found, using default embedded config");
            }
        }

        let mut value = lower_keys_value(value);
        apply_env_overrides(&mut value, env::vars());

        let config = Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds a detached configuration from a YAML document merged over the
    /// embedded defaults. Nothing is read from or written to disk and the
    /// environment is ignored.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !yaml.trim().is_empty() {
            let external: Value = serde_yaml::from_str(yaml)?;
            merge_yaml(&mut value, &lower_keys_value(external));
        }

        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(lower_keys_value(value)),
        })
    }

    /// Detached configuration holding only the embedded defaults.
    pub fn defaults() -> Result<Self> {
        Self::from_yaml_str("")
    }

    /// Directory holding `config.yaml`, `None` for a detached config.
    pub fn directory(&self) -> Option<&str> {
        self.config_dir.as_deref()
    }

    pub fn config_file(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn data(&self) -> Result<MutexGuard<'_, Value>> {
        self.data
            .lock()
            .map_err(|_| anyhow!("configuration lock poisoned"))
    }

    /// Saves the current configuration to the config.yaml file.
    /// Detached configurations have nothing to save.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = {
            let data = self.data()?;
            serde_yaml::to_string(&*data)?
        };
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["mirror", "reload_workers"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data()?;
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data()?;
        get_value_internal(&data, path)
    }

    impl_u64_config!(
        get_poll_interval_ms,
        set_poll_interval_ms,
        &["mirror", "poll_interval_ms"],
        DEFAULT_POLL_INTERVAL_MS
    );

    impl_u64_config!(
        get_min_reload_interval_ms,
        set_min_reload_interval_ms,
        &["mirror", "min_reload_interval_ms"],
        DEFAULT_MIN_RELOAD_INTERVAL_MS
    );

    impl_usize_config!(
        get_reload_workers,
        set_reload_workers,
        &["mirror", "reload_workers"],
        DEFAULT_RELOAD_WORKERS
    );

    impl_string_config!(
        get_sentinel_fallback,
        set_sentinel_fallback,
        &["mirror", "sentinel_fallback"],
        DEFAULT_SENTINEL_FALLBACK
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["mirror", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(&Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a map", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

/// Applies `PLAYERMIRROR_CONFIG__a__b=value` variables onto the tree.
fn apply_env_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path = stripped.split("__").collect::<Vec<_>>();
        debug!(variable = %key, "Applying config override from environment");
        if let Err(err) = set_value_internal(config, &key_path, convert_env_value(&value)) {
            debug!(variable = %key, error = %err, "Ignoring config override");
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Recursively merges `external` into `default`.
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default ones.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::defaults().unwrap();
        assert_eq!(config.get_poll_interval_ms().unwrap(), 5000);
        assert_eq!(config.get_min_reload_interval_ms().unwrap(), 1000);
        assert_eq!(config.get_reload_workers().unwrap(), 2);
        assert_eq!(config.get_sentinel_fallback().unwrap(), "adapter");
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.config_file().is_none());
    }

    #[test]
    fn test_yaml_overrides_defaults_and_keys_are_lowercased() {
        let config = Config::from_yaml_str("Mirror:\n  Poll_Interval_Ms: 250\n").unwrap();
        assert_eq!(config.get_poll_interval_ms().unwrap(), 250);
        // untouched keys keep their defaults
        assert_eq!(config.get_min_reload_interval_ms().unwrap(), 1000);
    }

    #[test]
    fn test_wrong_type_falls_back_to_default() {
        let config = Config::from_yaml_str("mirror:\n  reload_workers: many\n").unwrap();
        assert_eq!(config.get_reload_workers().unwrap(), 2);
    }

    #[test]
    fn test_get_missing_path() {
        let config = Config::defaults().unwrap();
        let err = config.get_value(&["mirror", "nope"]).unwrap_err();
        assert!(err.to_string().contains("mirror.nope"));
    }

    #[test]
    fn test_env_overrides() {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG).unwrap();
        apply_env_overrides(
            &mut value,
            vec![
                (
                    "PLAYERMIRROR_CONFIG__mirror__min_reload_interval_ms".to_string(),
                    "42".to_string(),
                ),
                ("UNRELATED".to_string(), "1".to_string()),
            ],
        );
        let got = get_value_internal(&value, &["mirror", "min_reload_interval_ms"]).unwrap();
        assert_eq!(got, Value::Number(Number::from(42)));
    }

    #[test]
    fn test_load_config_writes_file_and_persists_updates() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().to_string();

        let config = Config::load_config(&dir_str).unwrap();
        assert!(dir.path().join("config.yaml").exists());

        config.set_reload_workers(4).unwrap();

        let reloaded = Config::load_config(&dir_str).unwrap();
        assert_eq!(reloaded.get_reload_workers().unwrap(), 4);
    }

    #[test]
    fn test_external_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "mirror:\n  sentinel_fallback: none\n",
        )
        .unwrap();

        let config = Config::load_config(&dir.path().to_string_lossy()).unwrap();
        assert_eq!(config.get_sentinel_fallback().unwrap(), "none");
        assert_eq!(config.get_poll_interval_ms().unwrap(), 5000);
    }
}
