use std::collections::BTreeMap;

use serde::Deserialize;

use crate::transport::url::{DEFAULT_FALLBACK_TEMPLATE, DEFAULT_NATIVE_TEMPLATE};

/// Top-level configuration settings for the client.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub transport: TransportSettings,
    pub connection: ConnectionSettings,
    pub logging: LoggingSettings,
}

/// Where the broker lives and how to reach it.
///
/// The URL templates may use `{protocol}`, `{hostname}` and `{port}`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub hostname: String,
    pub port: u16,
    /// Use `wss`/`https` instead of `ws`/`http`.
    pub secure: bool,
    pub native_url_template: String,
    pub fallback_url_template: String,
    /// Skip the native WebSocket entirely.
    pub force_fallback: bool,
    /// Whether the environment can open native WebSockets at all.
    pub native_supported: bool,
}

/// Handshake and reconnection parameters.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Extra headers merged into every CONNECT frame.
    pub connect_headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
/// Missing values are filled from the defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub transport: Option<PartialTransportSettings>,
    pub connection: Option<PartialConnectionSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialTransportSettings {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub secure: Option<bool>,
    pub native_url_template: Option<String>,
    pub fallback_url_template: Option<String>,
    pub force_fallback: Option<bool>,
    pub native_supported: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PartialConnectionSettings {
    pub reconnect_delay_ms: Option<u64>,
    pub connect_headers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: TransportSettings::default(),
            connection: ConnectionSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8080,
            secure: false,
            native_url_template: DEFAULT_NATIVE_TEMPLATE.to_string(),
            fallback_url_template: DEFAULT_FALLBACK_TEMPLATE.to_string(),
            force_fallback: false,
            native_supported: true,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 6000,
            connect_headers: BTreeMap::new(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let transport = self.transport;
        let connection = self.connection;
        let logging = self.logging;
        let t = default.transport;

        Settings {
            transport: TransportSettings {
                hostname: transport
                    .as_ref()
                    .and_then(|s| s.hostname.clone())
                    .unwrap_or(t.hostname),
                port: transport.as_ref().and_then(|s| s.port).unwrap_or(t.port),
                secure: transport.as_ref().and_then(|s| s.secure).unwrap_or(t.secure),
                native_url_template: transport
                    .as_ref()
                    .and_then(|s| s.native_url_template.clone())
                    .unwrap_or(t.native_url_template),
                fallback_url_template: transport
                    .as_ref()
                    .and_then(|s| s.fallback_url_template.clone())
                    .unwrap_or(t.fallback_url_template),
                force_fallback: transport
                    .as_ref()
                    .and_then(|s| s.force_fallback)
                    .unwrap_or(t.force_fallback),
                native_supported: transport
                    .as_ref()
                    .and_then(|s| s.native_supported)
                    .unwrap_or(t.native_supported),
            },
            connection: ConnectionSettings {
                reconnect_delay_ms: connection
                    .as_ref()
                    .and_then(|c| c.reconnect_delay_ms)
                    .unwrap_or(default.connection.reconnect_delay_ms),
                connect_headers: connection
                    .and_then(|c| c.connect_headers)
                    .unwrap_or(default.connection.connect_headers),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
