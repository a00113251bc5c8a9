//! Configuration loading and persistence.
//!
//! Reads `config.json` from the config directory, then applies
//! `MEDIABRIDGE_*` environment overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::protocol::DEFAULT_SDK;
use crate::ws::http_to_ws_scheme;

const CONFIG_FILE: &str = "config.json";

/// Configuration for the media agent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Controller endpoint (`ws`, `wss`, `http` or `https`).
    pub server_url: String,
    /// Identifier sent to the controller as the `device` query parameter.
    pub device_id: String,
    /// Directory served to the controller.
    pub media_root: PathBuf,
    /// Seconds between keepalive pings; 0 disables them.
    pub ping_interval_secs: u64,
    /// Platform level reported in `hello`.
    pub sdk: u32,
}

impl Default for Config {
    fn default() -> Self {
        let device_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "device".to_string());

        Self {
            server_url: "wss://relay.example/ws".to_string(),
            device_id,
            media_root: dirs::picture_dir().unwrap_or_else(|| PathBuf::from(".")),
            ping_interval_secs: 20,
            sdk: DEFAULT_SDK,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `MEDIABRIDGE_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("MEDIABRIDGE_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("mediabridge")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_dir()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `config.json` from `dir`, falling back to defaults when absent.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `MEDIABRIDGE_*` overrides looked up through `var`.
    ///
    /// Unparseable numeric values are ignored.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = var("MEDIABRIDGE_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(device_id) = var("MEDIABRIDGE_DEVICE_ID") {
            self.device_id = device_id;
        }

        if let Some(media_root) = var("MEDIABRIDGE_MEDIA_ROOT") {
            self.media_root = PathBuf::from(media_root);
        }

        if let Some(ping) = var("MEDIABRIDGE_PING_INTERVAL") {
            match ping.parse::<u64>() {
                Ok(secs) => self.ping_interval_secs = secs,
                Err(_) => log::warn!("Ignoring invalid MEDIABRIDGE_PING_INTERVAL={}", ping),
            }
        }
    }

    /// Persists the current configuration to the config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?)
    }

    /// Writes `config.json` into `dir`, readable by the owner only.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Controller URL with a WebSocket scheme and the `device` parameter.
    ///
    /// The device id is form-encoded into the query; existing query
    /// parameters are kept.
    pub fn websocket_url(&self) -> Result<String> {
        let base = http_to_ws_scheme(&self.server_url);
        let mut url =
            Url::parse(&base).with_context(|| format!("Invalid server URL: {}", self.server_url))?;
        url.query_pairs_mut().append_pair("device", &self.device_id);
        Ok(url.into())
    }

    /// Keepalive interval, `None` when disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server_url, "wss://relay.example/ws");
        assert_eq!(config.ping_interval_secs, 20);
        assert_eq!(config.sdk, DEFAULT_SDK);
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load_from(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            server_url: "https://controller.local".to_string(),
            device_id: "phone-1".to_string(),
            media_root: PathBuf::from("/media"),
            ping_interval_secs: 0,
            sdk: 34,
        };
        config.save_to(dir.path()).unwrap();
        assert_eq!(Config::load_from(dir.path()).unwrap(), config);

        #[cfg(unix)]
        {
            let mode = fs::metadata(dir.path().join(CONFIG_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{"device_id":"tablet"}"#).unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.device_id, "tablet");
        assert_eq!(config.ping_interval_secs, 20);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("MEDIABRIDGE_SERVER_URL", "http://localhost:8080/agent"),
            ("MEDIABRIDGE_DEVICE_ID", "lab-7"),
            ("MEDIABRIDGE_MEDIA_ROOT", "/srv/photos"),
            ("MEDIABRIDGE_PING_INTERVAL", "5"),
        ]));
        assert_eq!(config.server_url, "http://localhost:8080/agent");
        assert_eq!(config.device_id, "lab-7");
        assert_eq!(config.media_root, PathBuf::from("/srv/photos"));
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_ping_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[("MEDIABRIDGE_PING_INTERVAL", "soon")]));
        assert_eq!(config.ping_interval_secs, 20);
    }

    #[test]
    fn test_websocket_url() {
        let mut config = Config {
            server_url: "https://controller.local/ws".to_string(),
            device_id: "abc".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.websocket_url().unwrap(),
            "wss://controller.local/ws?device=abc"
        );

        config.server_url = "ws://127.0.0.1:9000/ws?token=t".to_string();
        assert_eq!(
            config.websocket_url().unwrap(),
            "ws://127.0.0.1:9000/ws?token=t&device=abc"
        );
    }

    #[test]
    fn test_websocket_url_encodes_device_id() {
        let config = Config {
            server_url: "wss://controller.local/ws".to_string(),
            device_id: "a&b c=d".to_string(),
            ..Config::default()
        };
        let url = Url::parse(&config.websocket_url().unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("device".to_string(), "a&b c=d".to_string())]);
        assert_eq!(url.query(), Some("device=a%26b+c%3Dd"));
    }

    #[test]
    fn test_websocket_url_rejects_garbage() {
        let config = Config {
            server_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.websocket_url().is_err());
    }

    #[test]
    fn test_zero_ping_interval_disables_keepalive() {
        let config = Config {
            ping_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(config.ping_interval(), None);
    }
}
