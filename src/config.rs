// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::call::CallOptions;
use crate::error::ConfigError;
use crate::peer::transport::TransportConfig;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене только предупреждения

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    // ВАЖНО: Эта настройка работает только в debug режиме!
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    pub const ENABLE_LOGGING: bool = true;
}

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3000/ws";

/// Дефолтные STUN серверы, если пользователь ничего не задал
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

/// Настройки клиента, читаются из переменных окружения `CALLIN_*`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PhoneConfig {
    pub identity: String,
    pub relay_url: String,
    pub ice_servers: Vec<ServerConfig>,
    pub media_timeout_secs: u64,
    /// 0 отключает heartbeat
    pub heartbeat_secs: u64,
    pub reconnect_delay_ms: u64,
    pub reply_busy: bool,
}

impl PhoneConfig {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            relay_url: DEFAULT_RELAY_URL.into(),
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            media_timeout_secs: 10,
            heartbeat_secs: 25,
            reconnect_delay_ms: 2000,
            reply_busy: false,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Сборка конфигурации из произвольного источника ключей
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let identity = lookup("CALLIN_IDENTITY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("CALLIN_IDENTITY"))?;
        let mut config = Self::new(identity.trim());

        if let Some(url) = lookup("CALLIN_RELAY_URL") {
            config.relay_url = url;
        }
        if let Some(raw) = lookup("CALLIN_ICE_SERVERS") {
            let servers: Vec<ServerConfig> =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    name: "CALLIN_ICE_SERVERS",
                    reason: e.to_string(),
                })?;
            validate_ice_servers(&servers)?;
            config.ice_servers = servers;
        }
        if let Some(raw) = lookup("CALLIN_MEDIA_TIMEOUT_SECS") {
            config.media_timeout_secs = parse_number("CALLIN_MEDIA_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("CALLIN_HEARTBEAT_SECS") {
            config.heartbeat_secs = parse_number("CALLIN_HEARTBEAT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("CALLIN_RECONNECT_MS") {
            config.reconnect_delay_ms = parse_number("CALLIN_RECONNECT_MS", &raw)?;
        }
        if let Some(raw) = lookup("CALLIN_REPLY_BUSY") {
            config.reply_busy = matches!(raw.trim(), "1" | "true" | "yes" | "on");
        }
        Ok(config)
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|server| ServerConfig {
                    url: add_ice_url_scheme(server),
                    ..server.clone()
                })
                .collect(),
            ..TransportConfig::default()
        }
    }

    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            transport: self.transport_config(),
            media_timeout: Duration::from_secs(self.media_timeout_secs),
            reply_busy: self.reply_busy,
            heartbeat: (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs)),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Валидация списка ICE серверов
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(ConfigError::Invalid {
                name: "ice_servers",
                reason: format!("server {} has an empty URL", server.id),
            });
        }

        if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none()) {
            return Err(ConfigError::Invalid {
                name: "ice_servers",
                reason: format!("TURN server {} requires username and credential", server.id),
            });
        }
    }
    Ok(())
}
