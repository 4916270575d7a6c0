//! # SimpleDLNA configuration
//!
//! - embedded default configuration (`simpledlna.yaml`)
//! - merged with `<config_dir>/config.yaml` when present
//! - keys are case-insensitive (lower-cased on load)
//! - environment overrides: `SIMPLEDLNA_CONFIG__HOST__HTTP_PORT=9000`
//! - typed getters falling back to defaults with a warning
//!
//! ```no_run
//! use dlnaconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let port = config.get_http_port();
//! config.set_http_port(port + 1)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! There is no process-wide instance: the owner (usually the cast
//! orchestrator) loads one and hands it to the components that need it.

use anyhow::{Result, anyhow};
use dirs::home_dir;
use dlnautils::guess_local_ip;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Mutex, PoisonError},
};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!("simpledlna.yaml");

const ENV_CONFIG_DIR: &str = "SIMPLEDLNA_CONFIG";
const ENV_PREFIX: &str = "SIMPLEDLNA_CONFIG__";
const CONFIG_DIR_NAME: &str = ".simpledlna";

const DEFAULT_HTTP_PORT: u16 = 9578;
const DEFAULT_RTMP_PORT: u16 = 9577;
const DEFAULT_MEDIA_ROOT: &str = "/";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_SEARCH_MX: u32 = 3;
const DEFAULT_DESCRIPTION_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONTROL_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RTMP_APP: &str = "live";
const DEFAULT_MIRROR_STREAM: &str = "mirror";
const DEFAULT_RTMP_CHUNK_SIZE: u32 = 4096;
const DEFAULT_RTMP_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_FREE_BUFFERS: usize = 16;
const DEFAULT_VIDEO_WIDTH: u32 = 1080;
const DEFAULT_VIDEO_HEIGHT: u32 = 1920;
const DEFAULT_VIDEO_BITRATE: u32 = 25_000_000;
const DEFAULT_VIDEO_FRAMERATE: u32 = 60;
const DEFAULT_VIDEO_IFRAME_INTERVAL: u32 = 30;
const DEFAULT_AUDIO_BITRATE: u32 = 80_000;
const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_AUDIO_CHANNELS: u32 = 2;

/// Getter/setter pair for an unsigned number with default
macro_rules! impl_number_config {
    ($getter:ident, $setter:ident, $ty:ty, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> $ty {
            self.get_number::<$ty>($path).unwrap_or($default)
        }

        pub fn $setter(&self, value: $ty) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Getter/setter pair for a string with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.trim().is_empty() => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Getter/setter pair for a bool with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager.
///
/// Built either from a directory ([`Config::load_config`], persisted on every
/// `set_*`) or purely in memory ([`Config::from_yaml_str`]).
#[derive(Debug)]
pub struct Config {
    config_dir: Option<PathBuf>,
    path: Option<PathBuf>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.lock().clone()),
        }
    }
}

impl Config {
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        PathBuf::from(CONFIG_DIR_NAME)
    }

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

        Ok(())
    }

    /// Loads the configuration from `directory`.
    ///
    /// The directory is searched in this order: the `directory` argument if
    /// not empty, `$SIMPLEDLNA_CONFIG`, `./.simpledlna`, `~/.simpledlna`. It
    /// is created if missing, then the merged configuration is written back
    /// to `config.yaml`.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");
        let external = match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                Some(serde_yaml::from_slice::<Value>(&data)?)
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
                None
            }
        };

        let data = Self::build(external.as_ref(), env::vars())?;
        let config = Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(data),
        };

        config.save()?;
        Ok(config)
    }

    /// In-memory configuration: defaults merged with `yaml`, then environment
    /// overrides. Nothing is written to disk.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_yaml_with_overrides(yaml, env::vars())
    }

    /// Same as [`from_yaml_str`](Self::from_yaml_str) with an explicit set of
    /// `SIMPLEDLNA_CONFIG__*` variables instead of the process environment.
    pub fn from_yaml_with_overrides<I>(yaml: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let external: Value = serde_yaml::from_str(yaml)?;
        let external = match external {
            Value::Null => None,
            other => Some(other),
        };
        let data = Self::build(external.as_ref(), vars)?;
        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(data),
        })
    }

    /// Embedded defaults only.
    pub fn defaults() -> Result<Self> {
        Self::from_yaml_with_overrides("", std::iter::empty())
    }

    fn build<I>(external: Option<&Value>, vars: I) -> Result<Value>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut value = Self::lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);
        if let Some(external) = external {
            merge_yaml(&mut value, &Self::lower_keys_value(external.clone()));
        }
        Self::apply_env_overrides(&mut value, vars);
        Ok(value)
    }

    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the configuration to `config.yaml` (no-op for in-memory configs).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = serde_yaml::to_string(&*self.lock())?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets the value at `path` (e.g. `&["host", "http_port"]`) and saves.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
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
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Value at `path`, or an error if the path does not exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock();
        let mut current = &*data;
        for (i, key) in path.iter().enumerate() {
            let Value::Mapping(map) = current else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            };
            current = map
                .get(&Value::String(key.to_lowercase()))
                .ok_or_else(|| anyhow!("Path {} does not exist", path[..=i].join(".")))?;
        }
        Ok(current.clone())
    }

    fn get_number<T>(&self, path: &[&str]) -> Option<T>
    where
        T: TryFrom<u64> + FromStr,
    {
        let key = path.join(".");
        match self.get_value(path) {
            Ok(Value::Number(n)) => {
                let parsed = n.as_u64().and_then(|v| T::try_from(v).ok());
                if parsed.is_none() {
                    warn!(key = %key, value = %n, "Number out of range, using default");
                }
                parsed
            }
            Ok(Value::String(s)) => {
                let parsed = s.trim().parse::<T>().ok();
                if parsed.is_none() {
                    warn!(key = %key, value = %s, "Invalid number, using default");
                }
                parsed
            }
            Ok(_) => {
                warn!(key = %key, "Value is not a number, using default");
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Missing value, using default");
                None
            }
        }
    }

    fn apply_env_overrides<I>(config: &mut Value, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key_path = rest.split("__").collect::<Vec<_>>();
            let yaml_value = serde_yaml::from_str::<Value>(&value)
                .unwrap_or_else(|_| Value::String(value.clone()));
            if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                warn!(variable = %key, error = %err, "Ignoring configuration override");
            }
        }
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let k = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(k, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// LAN address advertised to renderers: `host.lan_ip` when set, else the
    /// detected address.
    pub fn get_lan_ip(&self) -> String {
        match self.get_value(&["host", "lan_ip"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            _ => guess_local_ip(),
        }
    }

    pub fn set_lan_ip(&self, ip: String) -> Result<()> {
        self.set_value(&["host", "lan_ip"], Value::String(ip))
    }

    impl_number_config!(get_http_port, set_http_port, u16, &["host", "http_port"], DEFAULT_HTTP_PORT);
    impl_number_config!(get_rtmp_port, set_rtmp_port, u16, &["host", "rtmp_port"], DEFAULT_RTMP_PORT);
    impl_string_config!(get_media_root, set_media_root, &["host", "media_root"], DEFAULT_MEDIA_ROOT);

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );
    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_number_config!(get_search_mx, set_search_mx, u32, &["discovery", "search_mx"], DEFAULT_SEARCH_MX);
    impl_number_config!(
        get_description_timeout_secs,
        set_description_timeout_secs,
        u64,
        &["discovery", "description_timeout_secs"],
        DEFAULT_DESCRIPTION_TIMEOUT_SECS
    );
    impl_number_config!(
        get_control_http_timeout_secs,
        set_control_http_timeout_secs,
        u64,
        &["control", "http_timeout_secs"],
        DEFAULT_CONTROL_HTTP_TIMEOUT_SECS
    );

    impl_string_config!(get_rtmp_app, set_rtmp_app, &["rtmp", "app"], DEFAULT_RTMP_APP);
    impl_string_config!(
        get_mirror_stream,
        set_mirror_stream,
        &["rtmp", "mirror_stream"],
        DEFAULT_MIRROR_STREAM
    );
    impl_number_config!(
        get_rtmp_chunk_size,
        set_rtmp_chunk_size,
        u32,
        &["rtmp", "chunk_size"],
        DEFAULT_RTMP_CHUNK_SIZE
    );
    impl_number_config!(
        get_rtmp_connect_timeout_secs,
        set_rtmp_connect_timeout_secs,
        u64,
        &["rtmp", "connect_timeout_secs"],
        DEFAULT_RTMP_CONNECT_TIMEOUT_SECS
    );

    impl_number_config!(
        get_queue_capacity,
        set_queue_capacity,
        usize,
        &["pipeline", "queue_capacity"],
        DEFAULT_QUEUE_CAPACITY
    );
    impl_number_config!(
        get_free_buffers,
        set_free_buffers,
        usize,
        &["pipeline", "free_buffers"],
        DEFAULT_FREE_BUFFERS
    );

    impl_number_config!(get_video_width, set_video_width, u32, &["video", "width"], DEFAULT_VIDEO_WIDTH);
    impl_number_config!(get_video_height, set_video_height, u32, &["video", "height"], DEFAULT_VIDEO_HEIGHT);
    impl_number_config!(
        get_video_bitrate,
        set_video_bitrate,
        u32,
        &["video", "bitrate"],
        DEFAULT_VIDEO_BITRATE
    );
    impl_number_config!(
        get_video_framerate,
        set_video_framerate,
        u32,
        &["video", "framerate"],
        DEFAULT_VIDEO_FRAMERATE
    );
    impl_number_config!(
        get_video_iframe_interval,
        set_video_iframe_interval,
        u32,
        &["video", "iframe_interval"],
        DEFAULT_VIDEO_IFRAME_INTERVAL
    );
    impl_number_config!(
        get_audio_bitrate,
        set_audio_bitrate,
        u32,
        &["audio", "bitrate"],
        DEFAULT_AUDIO_BITRATE
    );
    impl_number_config!(
        get_audio_sample_rate,
        set_audio_sample_rate,
        u32,
        &["audio", "sample_rate"],
        DEFAULT_AUDIO_SAMPLE_RATE
    );
    impl_number_config!(
        get_audio_channels,
        set_audio_channels,
        u32,
        &["audio", "channels"],
        DEFAULT_AUDIO_CHANNELS
    );
}

/// Recursively merges `external` into `default`: mappings are merged key by
/// key, scalars and sequences are replaced.
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
    fn defaults_match_embedded_yaml() {
        let config = Config::defaults().unwrap();
        assert_eq!(config.get_http_port(), 9578);
        assert_eq!(config.get_rtmp_port(), 9577);
        assert_eq!(config.get_rtmp_app(), "live");
        assert_eq!(config.get_mirror_stream(), "mirror");
        assert_eq!(config.get_queue_capacity(), 64);
        assert_eq!(config.get_video_width(), 1080);
        assert_eq!(config.get_video_height(), 1920);
        assert_eq!(config.get_video_bitrate(), 25_000_000);
        assert_eq!(config.get_audio_sample_rate(), 44_100);
        assert!(config.get_log_enable_console());
    }

    #[test]
    fn external_yaml_is_merged_case_insensitively() {
        let config = Config::from_yaml_with_overrides(
            "HOST:\n  HTTP_Port: 8000\nvideo:\n  width: 720\n",
            std::iter::empty(),
        )
        .unwrap();
        assert_eq!(config.get_http_port(), 8000);
        assert_eq!(config.get_video_width(), 720);
        // untouched keys keep their defaults
        assert_eq!(config.get_video_height(), 1920);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let vars = vec![
            ("SIMPLEDLNA_CONFIG__HOST__RTMP_PORT".to_string(), "1935".to_string()),
            ("SIMPLEDLNA_CONFIG__HOST__LAN_IP".to_string(), "10.1.2.3".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];
        let config = Config::from_yaml_with_overrides("host:\n  rtmp_port: 2000\n", vars).unwrap();
        assert_eq!(config.get_rtmp_port(), 1935);
        assert_eq!(config.get_lan_ip(), "10.1.2.3");
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = Config::from_yaml_with_overrides(
            "host:\n  http_port: not-a-port\npipeline:\n  queue_capacity: [1, 2]\n",
            std::iter::empty(),
        )
        .unwrap();
        assert_eq!(config.get_http_port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.get_queue_capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn load_config_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_string_lossy().to_string();

        let config = Config::load_config(&dir_str).unwrap();
        assert!(dir.path().join("config.yaml").exists());
        config.set_http_port(9999).unwrap();

        let reloaded = Config::load_config(&dir_str).unwrap();
        assert_eq!(reloaded.get_http_port(), 9999);
    }
}
