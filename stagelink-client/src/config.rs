//! Client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default control port of a StageLink processor.
pub const DEFAULT_PORT: u16 = 9760;

/// Configuration for the control client.
///
/// Contains connection settings, reconnection parameters, heartbeat timing,
/// and the request timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Device hostname or IP address.
    pub host: String,

    /// Control port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional API key appended to the connection URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Opaque recipient tag carried by subscription requests.
    #[serde(default = "default_response_tag")]
    pub response_tag: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Request/response timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Heartbeat send interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Time without an inbound heartbeat after which the link is considered
    /// dead, in milliseconds. Must exceed the send interval.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_response_tag() -> String {
    "stagelink".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    15_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            api_key: None,
            response_tag: default_response_tag(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl ClientConfig {
    /// Creates a new builder for `ClientConfig`.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the connection timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the reconnect delay as a Duration.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Returns the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the heartbeat send interval as a Duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Returns the heartbeat timeout as a Duration.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Builds the connection URL.
    ///
    /// The server-side idle kill timeout is derived from the heartbeat
    /// timeout so the device gives up on a silent client after the client
    /// itself would have given up on the device.
    #[must_use]
    pub fn url(&self) -> String {
        let mut url = format!(
            "ws://{}:{}/socket?killTimeoutMs={}",
            self.host,
            self.port,
            self.heartbeat_timeout_ms.saturating_mul(2)
        );
        if let Some(key) = &self.api_key {
            url.push_str("&apiKey=");
            url.push_str(key);
        }
        url
    }
}

/// Builder for `ClientConfig`.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    api_key: Option<String>,
    response_tag: Option<String>,
    connect_timeout_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_timeout_ms: Option<u64>,
}

impl ClientConfigBuilder {
    /// Sets the device hostname or IP address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the control port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the subscription recipient tag.
    #[must_use]
    pub fn response_tag(mut self, tag: impl Into<String>) -> Self {
        self.response_tag = Some(tag.into());
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the delay between reconnect attempts.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    /// Sets the request/response timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the heartbeat send interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Builds the `ClientConfig`.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        ClientConfig {
            host: self.host.unwrap_or_default(),
            port: self.port.unwrap_or_else(default_port),
            api_key: self.api_key,
            response_tag: self.response_tag.unwrap_or_else(default_response_tag),
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or_else(default_connect_timeout_ms),
            reconnect_delay_ms: self
                .reconnect_delay_ms
                .unwrap_or_else(default_reconnect_delay_ms),
            request_timeout_ms: self
                .request_timeout_ms
                .unwrap_or_else(default_request_timeout_ms),
            heartbeat_interval_ms: self
                .heartbeat_interval_ms
                .unwrap_or_else(default_heartbeat_interval_ms),
            heartbeat_timeout_ms: self
                .heartbeat_timeout_ms
                .unwrap_or_else(default_heartbeat_timeout_ms),
        }
    }
}
