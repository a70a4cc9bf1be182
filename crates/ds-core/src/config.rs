//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! server, streaming, playback and translator sections. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub playback: PlaybackSettings,
    pub translator: TranslatorConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::BadRequest(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if let Some(ref url) = self.server.public_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(format!("server.public_url '{url}' is not an http(s) URL"));
            }
        }

        if self.stream.head_timeout_secs == 0 || self.stream.probe_timeout_secs == 0 {
            warnings.push("stream timeouts of 0 disable remote probing".into());
        }

        if self.stream.subtitle_backoff_bytes == 0 {
            warnings.push(
                "stream.subtitle_backoff_bytes is 0; seeks may miss the enclosing cluster".into(),
            );
        }

        if let Some(ref dir) = self.stream.cache_dir {
            if !dir.exists() {
                warnings.push(format!("stream.cache_dir {} does not exist", dir.display()));
            }
        }

        if self.translator.enabled {
            if self.translator.api_url.is_none() {
                warnings.push("translator is enabled but api_url is not set".into());
            }
            if self.translator.target_language.is_empty() {
                warnings.push("translator is enabled but target_language is empty".into());
            }
            if self.translator.batch_size == 0 {
                warnings.push("translator.batch_size is 0; nothing will be translated".into());
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Overrides the `{{SERVER_URL}}` placeholder advertised to clients.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 43211,
            public_url: None,
        }
    }
}

/// Streaming engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub head_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub proxy_idle_timeout_secs: u64,
    pub subtitle_backoff_bytes: u64,
    pub subtitle_start_grace_secs: u64,
    /// Directory for range cache files; the OS temp dir when unset.
    pub cache_dir: Option<PathBuf>,
    /// Attachments up to this size are loaded while parsing the header.
    pub attachment_inline_limit: u64,
}

impl StreamConfig {
    pub fn head_timeout(&self) -> Duration {
        Duration::from_secs(self.head_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn proxy_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_idle_timeout_secs)
    }

    pub fn subtitle_start_grace(&self) -> Duration {
        Duration::from_secs(self.subtitle_start_grace_secs)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            head_timeout_secs: 5,
            probe_timeout_secs: 15,
            proxy_idle_timeout_secs: 60,
            subtitle_backoff_bytes: 1024 * 1024,
            subtitle_start_grace_secs: 3,
            cache_dir: None,
            attachment_inline_limit: 8 * 1024 * 1024,
        }
    }
}

/// Mutable playback settings held by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackSettings {
    pub auto_play_next: bool,
    pub auto_update_progress: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            auto_play_next: false,
            auto_update_progress: true,
        }
    }
}

/// Settings for the optional subtitle translator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub enabled: bool,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    pub batch_size: usize,
    pub batch_window_ms: u64,
    pub cache_size: usize,
}

fn default_target_language() -> String {
    "eng".into()
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: None,
            api_key: None,
            target_language: default_target_language(),
            batch_size: 20,
            batch_window_ms: 250,
            cache_size: 2048,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 43211);
        assert_eq!(cfg.stream.head_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.stream.probe_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.stream.subtitle_backoff_bytes, 1024 * 1024);
        assert!(cfg.playback.auto_update_progress);
        assert!(!cfg.translator.enabled);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn translator_without_url_warns() {
        let mut cfg = Config::default();
        cfg.translator.enabled = true;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("api_url")));
    }

    #[test]
    fn bad_public_url_warns() {
        let mut cfg = Config::default();
        cfg.server.public_url = Some("localhost:1234".into());
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("public_url")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"server": {"port": 9090}, "playback": {"autoPlayNext": true}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert!(cfg.playback.auto_play_next);
        assert!(cfg.playback.auto_update_progress);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.server.port, 43211);
        assert_eq!(cfg.translator.target_language, "eng");
    }

    #[test]
    fn parse_invalid_json_is_bad_request() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/config.json")));
        assert_eq!(cfg.server.port, 43211);
    }

    #[test]
    fn load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"stream": {"head_timeout_secs": 2}}"#).unwrap();
        let cfg = Config::load_or_default(Some(&path));
        assert_eq!(cfg.stream.head_timeout_secs, 2);
        assert_eq!(cfg.stream.probe_timeout_secs, 15);
    }
}
