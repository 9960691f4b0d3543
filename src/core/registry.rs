/// Registry of live server sessions keyed by socket handle

use socket2::Socket;
use std::os::fd::{AsRawFd, IntoRawFd};
use tracing::{debug, warn};

use crate::core::{Handle, SessionState, SessionType};

/// A live connection to a server
#[derive(Debug)]
pub struct SessionRecord {
    pub handle: Handle,
    pub host: String,
    pub port: u16,
    pub session_type: SessionType,
    /// Timer and stream state saved while the session is not the active one
    pub state: SessionState,
    socket: Socket,
}

impl SessionRecord {
    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

/// Ordered list of live sessions. The registry owns every socket it holds;
/// removing a record closes its socket.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    records: Vec<SessionRecord>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected socket and return its record id.
    ///
    /// Record ids are positions and shift when earlier records are closed.
    pub fn add(
        &mut self,
        socket: Socket,
        session_type: SessionType,
        host: &str,
        port: u16,
        state: SessionState,
    ) -> usize {
        let handle = socket.as_raw_fd();
        let record = SessionRecord {
            handle,
            host: host.to_string(),
            port,
            session_type,
            state,
            socket,
        };

        match self.find(handle) {
            Some(id) => {
                warn!("Replacing stale session record for handle {}", handle);
                let stale = std::mem::replace(&mut self.records[id], record);
                // The descriptor now belongs to the new record
                let _ = stale.socket.into_raw_fd();
                id
            }
            None => {
                debug!("Registered session {} -> {}:{}", handle, host, port);
                self.records.push(record);
                self.records.len() - 1
            }
        }
    }

    /// Find the record id of a handle
    pub fn find(&self, handle: Handle) -> Option<usize> {
        self.records.iter().position(|r| r.handle == handle)
    }

    /// Find the record id of a session to the given host and port
    pub fn find_by_host_port(&self, host: &str, port: u16) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.port == port && r.host.eq_ignore_ascii_case(host))
    }

    pub fn get(&self, id: usize) -> Option<&SessionRecord> {
        self.records.get(id)
    }

    pub fn record(&self, handle: Handle) -> Option<&SessionRecord> {
        self.records.iter().find(|r| r.handle == handle)
    }

    pub fn record_mut(&mut self, handle: Handle) -> Option<&mut SessionRecord> {
        self.records.iter_mut().find(|r| r.handle == handle)
    }

    pub fn socket(&self, handle: Handle) -> Option<&Socket> {
        self.record(handle).map(SessionRecord::socket)
    }

    /// Close one session. Unknown handles are ignored.
    pub fn close_one(&mut self, handle: Handle) -> bool {
        match self.find(handle) {
            Some(id) => {
                let record = self.records.remove(id);
                debug!(
                    "Closed session {} -> {}:{}",
                    record.handle, record.host, record.port
                );
                true
            }
            None => false,
        }
    }

    /// Close every session, returning how many were open
    pub fn close_all(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        if count > 0 {
            debug!("Closed {} sessions", count);
        }
        count
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.records.iter().map(|r| r.handle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use socket2::{Domain, Type};
    use std::collections::HashSet;
    use std::time::Duration;

    fn new_socket() -> Socket {
        Socket::new(Domain::IPV4, Type::STREAM, None).unwrap()
    }

    fn state() -> SessionState {
        SessionState::new(Duration::from_secs(600))
    }

    #[test]
    fn test_add_and_find() {
        let mut registry = SocketRegistry::new();
        let socket = new_socket();
        let handle = socket.as_raw_fd();

        let id = registry.add(socket, SessionType::UdaServer, "uda.example.org", 56565, state());
        assert_eq!(registry.find(handle), Some(id));
        assert_eq!(registry.find_by_host_port("UDA.example.org", 56565), Some(id));
        assert_eq!(registry.find_by_host_port("uda.example.org", 1), None);
        assert_eq!(registry.record(handle).map(|r| r.session_type), Some(SessionType::UdaServer));
    }

    #[test]
    fn test_close_one_is_idempotent() {
        let mut registry = SocketRegistry::new();
        let socket = new_socket();
        let handle = socket.as_raw_fd();
        registry.add(socket, SessionType::UdaServer, "h", 1, state());

        assert!(registry.close_one(handle));
        assert!(registry.find(handle).is_none());
        assert!(!registry.close_one(handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all() {
        let mut registry = SocketRegistry::new();
        for port in 1..=4 {
            registry.add(new_socket(), SessionType::UdaServer, "h", port, state());
        }
        assert_eq!(registry.close_all(), 4);
        assert!(registry.is_empty());
        assert_eq!(registry.close_all(), 0);
    }

    #[test]
    fn test_record_ids_follow_removals() {
        let mut registry = SocketRegistry::new();
        let first = new_socket();
        let first_handle = first.as_raw_fd();
        let second = new_socket();
        let second_handle = second.as_raw_fd();

        registry.add(first, SessionType::UdaServer, "a", 1, state());
        registry.add(second, SessionType::MdsplusServer, "b", 2, state());
        registry.close_one(first_handle);

        assert_eq!(registry.find(second_handle), Some(0));
        assert_eq!(registry.get(0).map(|r| r.host.as_str()), Some("b"));
    }

    #[test]
    fn test_handles_stay_unique() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut registry = SocketRegistry::new();

        for _ in 0..200 {
            let handles: Vec<Handle> = registry.handles().collect();
            if handles.is_empty() || rng.gen_bool(0.6) {
                registry.add(new_socket(), SessionType::UdaServer, "h", 1, state());
            } else {
                let victim = handles[rng.gen_range(0..handles.len())];
                registry.close_one(victim);
            }

            let unique: HashSet<Handle> = registry.handles().collect();
            assert_eq!(unique.len(), registry.len());
        }
    }
}
