//! Server Configuration
//!
//! All tunables for the core live here. `Default` gives the values the
//! server ships with; `from_env` overrides them from the environment so
//! deployments never need a rebuild.

use std::net::SocketAddr;
use std::time::Duration;

use crate::{DEFAULT_DATAGRAM_PORT, DEFAULT_STREAM_PORT};

/// Shared secret used for challenge-response authentication when no
/// override is configured. Server and client must agree on this value.
pub const DEFAULT_SHARED_SECRET: &str = "emberlink-dev-shared-secret";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the TCP stream listener.
    pub stream_bind: SocketAddr,
    /// Bind address for the shared UDP datagram socket.
    pub datagram_bind: SocketAddr,
    /// Maximum concurrent bound sessions. In-flight handshakes are not
    /// counted; they are bounded by `handshake_timeout` instead.
    pub max_sessions: usize,
    /// How long a raw stream may wait for its datagram handshake.
    pub handshake_timeout: Duration,
    /// Total time allowed for the challenge-response exchange.
    pub auth_timeout: Duration,
    /// Per-component grace window during shutdown.
    pub stop_grace: Duration,
    /// Datagram inactivity threshold. Diagnostic only; an idle datagram
    /// channel never drops a session by itself.
    pub datagram_idle: Duration,
    /// HMAC key for challenge-response authentication.
    pub shared_secret: String,
    /// Greeting line sent after successful authentication.
    pub welcome: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stream_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            datagram_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_DATAGRAM_PORT)),
            max_sessions: 9,
            handshake_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(2),
            datagram_idle: Duration::from_secs(30),
            shared_secret: DEFAULT_SHARED_SECRET.to_string(),
            welcome: "Welcome to Emberlink".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stream_bind: std::env::var("EMBERLINK_STREAM_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.stream_bind),
            datagram_bind: std::env::var("EMBERLINK_DATAGRAM_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.datagram_bind),
            max_sessions: std::env::var("EMBERLINK_MAX_SESSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_sessions),
            shared_secret: std::env::var("EMBERLINK_SECRET")
                .unwrap_or(defaults.shared_secret),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.stream_bind.port(), 9997);
        assert_eq!(config.datagram_bind.port(), 9998);
        assert_eq!(config.max_sessions, 9);
    }

    #[test]
    fn test_default_timeouts() {
        let config = ServerConfig::default();
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.auth_timeout, Duration::from_secs(30));
        assert_eq!(config.stop_grace, Duration::from_secs(2));
        assert_eq!(config.datagram_idle, Duration::from_secs(30));
    }
}
