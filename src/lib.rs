//! UDA client connection manager
//!
//! Opens and maintains the TCP connection between a UDA data-access client
//! and its server:
//! 1. Host resolution: alias substitution from a host directory, `SSL://`
//!    detection, IPv4/IPv6/`localhost` handling through the platform resolver
//! 2. Connection: jittered retries, failover to a secondary server, socket
//!    options, and a registry of live sessions the client can switch between
//! 3. Transport: blocking reads and writes with readiness polling, SIGPIPE
//!    suppression and classified socket errors
pub mod config;
pub mod core;
pub mod error;
pub mod hosts;
pub mod utils;

pub use crate::config::{Config, ConfigError};
pub use crate::core::connection::{ActiveStream, CloseMode, ConnectAttempt, ConnectionManager};
pub use crate::core::registry::{SessionRecord, SocketRegistry};
pub use crate::core::{
    CancelToken, Deadline, Handle, HostPair, HostTarget, SessionState, SessionType, StreamEndpoints,
    StreamId,
};
pub use crate::error::{ErrorRecord, ErrorStack, ErrorType, TransportError, UdaError, UdaResult};
pub use crate::hosts::{HostDirectory, HostEntry, HostList};

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_manager_from_defaults() {
        let config = Config::default();
        let manager = ConnectionManager::new(&config);
        assert!(!manager.is_connected());
        assert_eq!(manager.hosts().primary.hostname, config.server.host);
        assert!(manager.hosts().secondary.is_none());
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_connect_through_alias() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = Config::default();
        config.server.host = "uda-local".to_string();
        config.retry.max_delay = 0;
        config.hosts = vec![HostEntry::new("uda-local", "127.0.0.1", Some(port))];

        let mut manager = ConnectionManager::new(&config);
        manager.connect().unwrap();

        let record = manager.active_record().unwrap();
        assert_eq!(record.host, "127.0.0.1");
        assert_eq!(record.port, port);
        assert_eq!(record.session_type, SessionType::UdaServer);

        manager.close(CloseMode::CloseAll);
        assert!(!manager.is_connected());
    }
}
