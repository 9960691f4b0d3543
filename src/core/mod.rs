/// Core abstractions shared by the resolver, registry, connection manager and transport
pub mod connection;
pub mod registry;
pub mod resolver;
pub mod signal;
pub mod transport;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// OS-level socket handle
pub type Handle = std::os::fd::RawFd;

/// A configured server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub hostname: String,
    pub port: u16,
    pub is_ssl: bool,
}

impl HostTarget {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            is_ssl: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hostname.trim().is_empty()
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Primary and secondary servers, in the order they are tried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPair {
    pub primary: HostTarget,
    pub secondary: Option<HostTarget>,
}

impl HostPair {
    pub fn new(primary: HostTarget, secondary: Option<HostTarget>) -> Self {
        Self { primary, secondary }
    }

    pub fn single(primary: HostTarget) -> Self {
        Self::new(primary, None)
    }

    /// Secondary target worth failing over to: non-empty and different from the primary
    pub fn failover_target(&self) -> Option<&HostTarget> {
        self.secondary.as_ref().filter(|secondary| {
            !secondary.is_empty()
                && (secondary.hostname != self.primary.hostname
                    || secondary.port != self.primary.port)
        })
    }

    /// Make the secondary the primary, so the reachable host is tried first next time
    pub fn swap(&mut self) {
        if let Some(secondary) = self.secondary.as_mut() {
            std::mem::swap(&mut self.primary, secondary);
        }
    }
}

/// Kind of server behind a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Unknown,
    UdaServer,
    MdsplusServer,
}

/// Opaque identifier of a serialization stream owned by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// Serialization stream endpoints bound to a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamEndpoints {
    pub input: Option<StreamId>,
    pub output: Option<StreamId>,
}

impl StreamEndpoints {
    pub fn new(input: StreamId, output: StreamId) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
        }
    }
}

/// Per-session timer and stream state, swapped in and out on socket switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub session_start: SystemTime,
    pub user_timeout: Duration,
    pub streams: StreamEndpoints,
}

impl SessionState {
    pub fn new(user_timeout: Duration) -> Self {
        Self {
            session_start: SystemTime::now(),
            user_timeout,
            streams: StreamEndpoints::default(),
        }
    }

    /// Restart the session timer
    pub fn restart(&mut self) {
        self.session_start = SystemTime::now();
    }

    /// Time since the session timer was started
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.session_start)
            .unwrap_or_default()
    }
}

/// Optional point in time after which an operation gives up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Clip `wait` to the time left
    pub fn clip(&self, wait: Duration) -> Duration {
        match self.remaining() {
            Some(left) => wait.min(left),
            None => wait,
        }
    }
}

/// Shared flag that aborts a pending connect, read or write
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failover_target_requires_distinct_host() {
        let pair = HostPair::new(
            HostTarget::new("uda1", 56565),
            Some(HostTarget::new("uda1", 56565)),
        );
        assert!(pair.failover_target().is_none());

        let pair = HostPair::new(HostTarget::new("uda1", 56565), Some(HostTarget::new("", 1)));
        assert!(pair.failover_target().is_none());

        let pair = HostPair::new(
            HostTarget::new("uda1", 56565),
            Some(HostTarget::new("uda1", 56566)),
        );
        assert!(pair.failover_target().is_some());
    }

    #[test]
    fn test_host_pair_swap() {
        let mut pair = HostPair::new(
            HostTarget::new("bad.example", 1),
            Some(HostTarget::new("good.example", 2)),
        );
        pair.swap();
        assert_eq!(pair.primary.hostname, "good.example");
        assert_eq!(pair.primary.port, 2);
        assert_eq!(pair.secondary.as_ref().map(|s| s.port), Some(1));

        let mut single = HostPair::single(HostTarget::new("only", 3));
        single.swap();
        assert_eq!(single.primary.hostname, "only");
    }

    #[test]
    fn test_deadline() {
        assert!(!Deadline::none().expired());
        assert_eq!(Deadline::none().clip(Duration::from_secs(5)), Duration::from_secs(5));

        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.clip(Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        token.reset();
        assert!(!clone.is_cancelled());
    }
}
