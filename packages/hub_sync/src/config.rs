use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::stream::DEFAULT_TOOL_INPUT_PREVIEW_CHARS;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to override a default:
//
//   config.toml:     [reconnect]
//                    max_delay_ms = 5000
//
//   env var:         HUB_RECONNECT__MAX_DELAY_MS=5000   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub stream: StreamFileConfig,
}

/// Hub endpoint settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_prefix: default_api_prefix(),
            ws_path: default_ws_path(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Reconnect backoff (lives under `[reconnect]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Turn accumulation tunables (lives under `[stream]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamFileConfig {
    /// Characters of tool input kept in synthesized step metadata.
    #[serde(default = "default_tool_input_preview_chars")]
    pub tool_input_preview_chars: usize,
    /// Capacity of the notice broadcast channel.
    #[serde(default = "default_notice_capacity")]
    pub notice_capacity: usize,
}

impl Default for StreamFileConfig {
    fn default() -> Self {
        Self {
            tool_input_preview_chars: default_tool_input_preview_chars(),
            notice_capacity: default_notice_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_api_prefix() -> String {
    "/api/v1".to_string()
}
fn default_ws_path() -> String {
    "/ws/chat".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_tool_input_preview_chars() -> usize {
    DEFAULT_TOOL_INPUT_PREVIEW_CHARS
}
fn default_notice_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → HUB_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `HUB_SERVER__BASE_URL=http://hub:8080`  →  `server.base_url`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("HUB_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

/// Hub endpoint configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub ws_path: String,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            base_url: fc.base_url.trim_end_matches('/').to_string(),
            api_prefix: fc.api_prefix.clone(),
            ws_path: fc.ws_path.clone(),
            request_timeout_secs: fc.request_timeout_secs,
        }
    }

    pub fn api_base(&self) -> String {
        format!("{}{}", self.base_url, self.api_prefix)
    }

    /// Streaming endpoint, derived from the base url's scheme.
    pub fn ws_url(&self) -> Result<String, ConfigError> {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::ServerUrl {
                url: self.base_url.clone(),
            });
        };
        Ok(format!("{ws_base}{}", self.ws_path))
    }

    #[cfg(test)]
    pub fn for_port(port: u16) -> Self {
        Self::from_file(&ServerFileConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            ..Default::default()
        })
    }
}

/// Reconnect backoff policy (runtime view).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectConfig {
    pub fn from_file(fc: &ReconnectFileConfig) -> Self {
        let base_delay = Duration::from_millis(fc.base_delay_ms.max(1));
        Self {
            base_delay,
            max_delay: Duration::from_millis(fc.max_delay_ms).max(base_delay),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_file(&ReconnectFileConfig::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    pub tool_input_preview_chars: usize,
    pub notice_capacity: usize,
}

impl StreamConfig {
    pub fn from_file(fc: &StreamFileConfig) -> Self {
        Self {
            tool_input_preview_chars: fc.tool_input_preview_chars,
            notice_capacity: fc.notice_capacity.max(1),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_file(&StreamFileConfig::default())
    }
}

/// Everything the client needs at runtime.
#[derive(Clone, Debug)]
pub struct Settings {
    pub server: ServerConfig,
    pub reconnect: ReconnectConfig,
    pub stream: StreamConfig,
}

impl Settings {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            server: ServerConfig::from_file(&fc.server),
            reconnect: ReconnectConfig::from_file(&fc.reconnect),
            stream: StreamConfig::from_file(&fc.stream),
        }
    }

    pub fn load(data_dir: &Path) -> Result<Self, ConfigError> {
        let fc: FileConfig = load_config(data_dir)
            .extract()
            .map_err(|e| ConfigError::Figment(Box::new(e)))?;
        let settings = Self::from_file(&fc);
        settings.server.ws_url()?;
        Ok(settings)
    }
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub data_dir: PathBuf,
}

impl HubConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join("hubsync"),
        };

        std::fs::create_dir_all(&data_dir).map_err(|source| ConfigError::DataDir {
            path: data_dir.clone(),
            source,
        })?;

        Ok(Self { data_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
