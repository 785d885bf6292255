//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::session::SessionDefaults;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent viewer sessions (0 = unlimited)
    pub max_sessions: usize,

    /// Defaults and bounds for viewer query parameters
    pub session: SessionDefaults,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8069)),
            max_sessions: 0, // Unlimited
            session: SessionDefaults::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum concurrent sessions
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    pub fn session(mut self, session: SessionDefaults) -> Self {
        self.session = session;
        self
    }

    /// Set the period between viewer stats messages
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.session = self.session.stats_interval(interval);
        self
    }

    /// Set the per-write timeout for viewer connections
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.session = self.session.write_timeout(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8069);
        assert_eq!(config.max_sessions, 0);
        assert_eq!(config.session.stats_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8070".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 8070);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_sessions(50)
            .stats_interval(Duration::from_secs(1))
            .write_timeout(Duration::from_millis(500));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_sessions, 50);
        assert_eq!(config.session.stats_interval, Duration::from_secs(1));
        assert_eq!(config.session.write_timeout, Duration::from_millis(500));
    }
}
