// Конфигурация приложения
// Логирование по умолчанию включено только в режиме разработки

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Env var pointing at a JSON config file
pub const CONFIG_ENV: &str = "SSC_CONFIG";

/// Потолок битрейта видео по умолчанию (5 Mbps)
pub const DEFAULT_MAX_BITRATE_BPS: u64 = 5_000_000;

/// VP8 и его RTX-компаньон
pub const DEFAULT_ALLOWED_PAYLOADS: [u8; 2] = [96, 97];

pub const DEFAULT_FRAME_RATE: u32 = 30;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Дефолтные ICE серверы
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "info".into(),
        }
    }
}

/// Settings shared by every connection session.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub max_bitrate_bps: u64,
    pub allowed_payload_types: Vec<u8>,
    pub frame_rate: u32,
    /// Close sessions stuck mid-negotiation after this many seconds
    pub negotiation_timeout_secs: Option<u64>,
    pub logging: LoggingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            max_bitrate_bps: DEFAULT_MAX_BITRATE_BPS,
            allowed_payload_types: DEFAULT_ALLOWED_PAYLOADS.to_vec(),
            frame_rate: DEFAULT_FRAME_RATE,
            negotiation_timeout_secs: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Loads the file named by `SSC_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_json_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация серверов
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::Config(format!(
                    "ICE server {} has an empty url",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::Config(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }

        if self.allowed_payload_types.is_empty() {
            return Err(Error::Config("allowed_payload_types is empty".into()));
        }
        if self.max_bitrate_bps == 0 {
            return Err(Error::Config("max_bitrate_bps must be positive".into()));
        }
        if self.frame_rate == 0 {
            return Err(Error::Config("frame_rate must be positive".into()));
        }
        Ok(())
    }
}
