/// Client connection management
///
/// [`ConnectionManager`] turns the configured primary/secondary server pair
/// into a live TCP session: host directory substitution, address
/// resolution, connect with jittered retries, failover to the secondary,
/// socket options, then registration in the [`SocketRegistry`]. It also
/// switches between registered sessions and performs blocking I/O on the
/// active one.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use socket2::{SockAddr, Socket};
use std::io;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, RetryConfig, SocketConfig, SocketEnv, TransportConfig};
use crate::core::registry::{SessionRecord, SocketRegistry};
use crate::core::resolver::{self, ResolvedAddress};
use crate::core::transport::{self, Interest, IoOptions};
use crate::core::{
    CancelToken, Deadline, Handle, HostPair, HostTarget, SessionState, SessionType, StreamEndpoints,
};
use crate::error::{ErrorRecord, ErrorStack, ResolutionError, TransportError, UdaError, UdaResult};
use crate::hosts::{HostDirectory, HostList};

/// A session is treated as expired this long before its user timeout
pub const SESSION_EXPIRY_MARGIN: Duration = Duration::from_secs(2);

/// Longest uninterrupted sleep between cancellation checks
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Which sessions `close` shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Only the active session
    CloseOne,
    /// Every registered session
    CloseAll,
}

/// Which session is live, and what the caller asked to change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveConnection {
    pub current_handle: Option<Handle>,
    /// Host or port changed; reuse a matching session or open a new one
    pub reconnect_requested: bool,
    /// Switch to `requested_handle`
    pub change_socket_requested: bool,
    pub requested_handle: Option<Handle>,
}

/// One connect attempt made by the last `connect()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    /// Host name as configured, before alias substitution
    pub label: String,
    pub address: SocketAddr,
    /// 1-based attempt number against this host
    pub attempt: u32,
    /// OS error code of a failed attempt
    pub error: Option<i32>,
}

impl ConnectAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A connected socket that has not been registered yet
struct Established {
    socket: Socket,
    target: HostTarget,
}

/// Client connection manager, one per logical client session
pub struct ConnectionManager {
    hosts: HostPair,
    directory: Box<dyn HostDirectory + Send>,
    retry: RetryConfig,
    socket_config: SocketConfig,
    transport: TransportConfig,
    session_type: SessionType,
    default_user_timeout: Duration,
    registry: SocketRegistry,
    active: ActiveConnection,
    session: SessionState,
    errors: ErrorStack,
    rng: StdRng,
    cancel: CancelToken,
    attempts: Vec<ConnectAttempt>,
}

impl ConnectionManager {
    /// Create a manager using the configuration's own host list
    pub fn new(config: &Config) -> Self {
        Self::with_directory(config, HostList::from_entries(config.hosts.clone()))
    }

    /// Create a manager with an external host directory.
    ///
    /// `UDA_MAX_SOCKET_DELAY` and `UDA_MAX_SOCKET_ATTEMPTS`, when set, take
    /// precedence over the configured retry limits.
    pub fn with_directory<D>(config: &Config, directory: D) -> Self
    where
        D: HostDirectory + Send + 'static,
    {
        Self::with_socket_env(config, directory, SocketEnv::cached())
    }

    fn with_socket_env<D>(config: &Config, directory: D, env: SocketEnv) -> Self
    where
        D: HostDirectory + Send + 'static,
    {
        let mut retry = config.retry.clone();
        env.apply(&mut retry);
        let secondary = (!config.server.host2.trim().is_empty())
            .then(|| HostTarget::new(&config.server.host2, config.server.port2));
        let default_user_timeout = config.session.user_timeout();

        Self {
            hosts: HostPair::new(
                HostTarget::new(&config.server.host, config.server.port),
                secondary,
            ),
            directory: Box::new(directory),
            retry,
            socket_config: config.socket.clone(),
            transport: config.transport.clone(),
            session_type: SessionType::UdaServer,
            default_user_timeout,
            registry: SocketRegistry::new(),
            active: ActiveConnection::default(),
            session: SessionState::new(default_user_timeout),
            errors: ErrorStack::new(),
            rng: StdRng::seed_from_u64(u64::from(std::process::id())),
            cancel: CancelToken::new(),
            attempts: Vec::new(),
        }
    }

    /// Kind of server recorded for new sessions
    pub fn with_session_type(mut self, session_type: SessionType) -> Self {
        self.session_type = session_type;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.active.current_handle.is_some()
    }

    pub fn current_handle(&self) -> Option<Handle> {
        self.active.current_handle
    }

    pub fn active(&self) -> &ActiveConnection {
        &self.active
    }

    /// Record of the active session
    pub fn active_record(&self) -> Option<&SessionRecord> {
        self.active
            .current_handle
            .and_then(|handle| self.registry.record(handle))
    }

    pub fn registry(&self) -> &SocketRegistry {
        &self.registry
    }

    /// Server pair in the order the next connect will try them
    pub fn hosts(&self) -> &HostPair {
        &self.hosts
    }

    /// Replace the server pair. A connected manager is flagged for reconnect
    /// when the primary changes.
    pub fn set_hosts(&mut self, hosts: HostPair) {
        if self.is_connected() && hosts.primary != self.hosts.primary {
            self.active.reconnect_requested = true;
        }
        self.hosts = hosts;
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn set_user_timeout(&mut self, user_timeout: Duration) {
        self.session.user_timeout = user_timeout;
    }

    /// Bind serialization streams to the active session
    pub fn attach_streams(&mut self, streams: StreamEndpoints) {
        self.session.streams = streams;
        if let Some(record) = self
            .active
            .current_handle
            .and_then(|handle| self.registry.record_mut(handle))
        {
            record.state.streams = streams;
        }
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        self.errors.records()
    }

    pub fn take_errors(&mut self) -> Vec<ErrorRecord> {
        self.errors.take()
    }

    /// Attempts made by the most recent connect
    pub fn last_attempts(&self) -> &[ConnectAttempt] {
        &self.attempts
    }

    /// Token that aborts a pending connect, read or write when cancelled.
    ///
    /// The token stays cancelled, failing every later connect, read and write
    /// with `Cancelled`, until [`CancelToken::reset`] is called.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Ask the next `reconnect` to move to the current primary host
    pub fn request_reconnect(&mut self) {
        self.active.reconnect_requested = true;
    }

    /// Ask the next `reconnect` to switch to a registered session
    pub fn request_socket_change(&mut self, handle: Handle) {
        self.active.change_socket_requested = true;
        self.active.requested_handle = Some(handle);
    }

    /// Connect to the primary server, failing over to the secondary.
    ///
    /// Does nothing when a session is already active.
    pub fn connect(&mut self) -> UdaResult<()> {
        let result = self.connect_inner();
        if let Err(err) = &result {
            self.errors.report_error("connect", err);
        }
        result
    }

    /// Apply a pending reconnect or socket switch request
    pub fn reconnect(&mut self) -> UdaResult<()> {
        let result = self.reconnect_inner();
        if let Err(err) = &result {
            self.errors.report_error("reconnect", err);
        }
        result
    }

    /// Close the active session or all of them
    pub fn close(&mut self, mode: CloseMode) {
        match mode {
            CloseMode::CloseOne => {
                if let Some(handle) = self.active.current_handle {
                    self.registry.close_one(handle);
                }
            }
            CloseMode::CloseAll => {
                self.registry.close_all();
            }
        }
        self.active.current_handle = None;
    }

    /// True when the server has probably timed out the active session
    pub fn session_expired(&self) -> bool {
        self.is_connected()
            && self.session.age() + SESSION_EXPIRY_MARGIN >= self.session.user_timeout
    }

    /// Make sure a usable session is active before a request.
    ///
    /// An expired session is closed and replaced; pending reconnect or switch
    /// requests are applied.
    pub fn ensure_connected(&mut self) -> UdaResult<()> {
        if self.session_expired() {
            info!(
                "Server session aged {:?} past its {:?} timeout, reconnecting",
                self.session.age(),
                self.session.user_timeout
            );
            self.close(CloseMode::CloseOne);
            self.session = SessionState::new(self.session.user_timeout);
        }

        if self.active.reconnect_requested || self.active.change_socket_requested {
            self.reconnect()?;
        }
        self.connect()
    }

    /// Write all of `buf` to the active session
    pub fn write(&mut self, buf: &[u8]) -> UdaResult<usize> {
        let options = self.io_options();
        let result = match self.active_socket() {
            Some(socket) => transport::write(socket, buf, &options),
            None => Err(TransportError::NotConnected.into()),
        };
        if let Err(err) = &result {
            self.errors.report_error("write", err);
        }
        result
    }

    /// Read up to `buf.len()` bytes from the active session
    pub fn read(&mut self, buf: &mut [u8]) -> UdaResult<usize> {
        let result = self.read_unreported(buf);
        if let Err(err) = &result {
            self.errors.report_error("read", err);
        }
        result
    }

    fn read_unreported(&mut self, buf: &mut [u8]) -> UdaResult<usize> {
        let options = self.io_options();
        match self.active_socket() {
            Some(socket) => transport::read(socket, buf, &options),
            None => Err(TransportError::NotConnected.into()),
        }
    }

    /// `std::io` view of the active session
    pub fn stream(&mut self) -> ActiveStream<'_> {
        ActiveStream { manager: self }
    }

    fn active_socket(&self) -> Option<&Socket> {
        self.active
            .current_handle
            .and_then(|handle| self.registry.socket(handle))
    }

    fn io_options(&self) -> IoOptions {
        IoOptions::from_config(&self.transport).with_cancel(self.cancel.clone())
    }

    fn connect_inner(&mut self) -> UdaResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.attempts.clear();
        let deadline = Deadline::from_timeout(self.retry.connect_timeout());
        let primary = self.hosts.primary.clone();

        let established = match self.connect_host(&primary, deadline) {
            Ok(established) => established,
            Err(err @ UdaError::ConnectFailed { .. }) => {
                let Some(secondary) = self.hosts.failover_target().cloned() else {
                    return Err(err);
                };
                warn!("{}; failing over to {}", err, secondary);
                let established = self.connect_host(&secondary, deadline)?;
                self.hosts.swap();
                info!(
                    "Secondary server {} reachable, it is now the primary",
                    secondary
                );
                established
            }
            Err(err) => return Err(err),
        };

        self.register(established)
    }

    /// Resolve one configured host and run the attempt loop against it
    fn connect_host(
        &mut self,
        configured: &HostTarget,
        deadline: Deadline,
    ) -> UdaResult<Established> {
        let target = self.directory.resolve_target(configured)?;
        let candidate = first_candidate(&target)?;
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_code = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.retry_pause(deadline)?;
            }
            self.check_abort(deadline)?;

            let socket = Socket::new(
                candidate.family.domain(),
                candidate.socket_type,
                candidate.protocol,
            )
            .map_err(UdaError::SocketCreate)?;

            match connect_socket(&socket, &candidate.address, deadline) {
                Ok(()) => {
                    debug!(
                        "Connected to {} ({}) on attempt {}",
                        configured, candidate.address, attempt
                    );
                    self.record_attempt(configured, &candidate, attempt, None);
                    return Ok(Established { socket, target });
                }
                Err(e) => {
                    last_code = e.raw_os_error().unwrap_or(-1);
                    debug!(
                        "Connect attempt {}/{} to {} ({}) failed: {}",
                        attempt, max_attempts, configured, candidate.address, e
                    );
                    self.record_attempt(configured, &candidate, attempt, Some(last_code));
                    if deadline.expired() {
                        return Err(UdaError::timed_out(format!("connect to {}", configured)));
                    }
                }
            }
        }

        Err(UdaError::ConnectFailed {
            host: target.hostname,
            port: target.port,
            code: last_code,
        })
    }

    fn record_attempt(
        &mut self,
        configured: &HostTarget,
        candidate: &ResolvedAddress,
        attempt: u32,
        error: Option<i32>,
    ) {
        self.attempts.push(ConnectAttempt {
            label: configured.hostname.clone(),
            address: candidate.address,
            attempt,
            error,
        });
    }

    fn check_abort(&self, deadline: Deadline) -> UdaResult<()> {
        if self.cancel.is_cancelled() {
            return Err(UdaError::cancelled("connect"));
        }
        if deadline.expired() {
            return Err(UdaError::timed_out("connect"));
        }
        Ok(())
    }

    /// Random delay in `[0, max_delay)` delay units
    fn retry_delay(&mut self) -> Duration {
        if self.retry.max_delay == 0 {
            return Duration::ZERO;
        }
        let units = self.rng.gen_range(0..self.retry.max_delay);
        self.retry
            .delay_unit()
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    fn retry_pause(&mut self, deadline: Deadline) -> UdaResult<()> {
        let delay = deadline.clip(self.retry_delay());
        if delay.is_zero() {
            return Ok(());
        }
        debug!("Waiting {:?} before the next connect attempt", delay);

        let mut left = delay;
        while !left.is_zero() {
            if self.cancel.is_cancelled() {
                return Err(UdaError::cancelled("connect"));
            }
            let slice = left.min(SLEEP_SLICE);
            thread::sleep(slice);
            left -= slice;
        }
        Ok(())
    }

    /// Apply socket options and make the socket the active session
    fn register(&mut self, established: Established) -> UdaResult<()> {
        let Established { socket, target } = established;
        // On failure the socket is dropped, which closes it
        self.configure_socket(&socket)?;

        let handle = socket.as_raw_fd();
        self.session.restart();
        self.registry.add(
            socket,
            self.session_type,
            &target.hostname,
            target.port,
            self.session,
        );
        self.active.current_handle = Some(handle);
        self.active.reconnect_requested = false;
        self.active.change_socket_requested = false;
        self.active.requested_handle = None;

        info!(
            "Connected to {}{} on handle {}",
            target,
            if target.is_ssl { " (SSL)" } else { "" },
            handle
        );
        Ok(())
    }

    /// Buffer sizes, keepalive and no-delay for a connected socket
    fn configure_socket(&self, socket: &Socket) -> UdaResult<()> {
        let check = |option: &'static str, result: io::Result<()>| {
            result.map_err(|source| UdaError::SocketOption { option, source })
        };

        check(
            "SO_SNDBUF",
            socket.set_send_buffer_size(self.socket_config.window_size),
        )?;
        check(
            "SO_RCVBUF",
            socket.set_recv_buffer_size(self.socket_config.window_size),
        )?;
        if self.socket_config.keepalive {
            check("SO_KEEPALIVE", socket.set_keepalive(true))?;
        }
        if self.socket_config.nodelay {
            check("TCP_NODELAY", socket.set_nodelay(true))?;
        }
        Ok(())
    }

    fn reconnect_inner(&mut self) -> UdaResult<()> {
        if self.active.reconnect_requested {
            self.active.change_socket_requested = false;
            self.active.requested_handle = None;

            let target = self.directory.resolve_target(&self.hosts.primary)?;
            let existing = self
                .registry
                .find_by_host_port(&target.hostname, target.port)
                .and_then(|id| self.registry.get(id))
                .map(|record| record.handle);

            if let Some(handle) = existing {
                return self.switch_to(handle);
            }

            info!("Opening a new server session to {}", self.hosts.primary);
            self.save_active_state();
            let previous = (self.active.current_handle.take(), self.session);
            self.session = SessionState::new(self.default_user_timeout);
            if let Err(err) = self.connect_inner() {
                (self.active.current_handle, self.session) = previous;
                return Err(err);
            }
            return Ok(());
        }

        if self.active.change_socket_requested {
            let requested = self.active.requested_handle;
            self.active.change_socket_requested = false;
            self.active.requested_handle = None;
            return match requested {
                Some(handle) => self.switch_to(handle),
                None => Ok(()),
            };
        }

        Ok(())
    }

    /// Make a registered session active, swapping session state in and out
    fn switch_to(&mut self, handle: Handle) -> UdaResult<()> {
        let Some(saved) = self.registry.record(handle).map(|record| record.state) else {
            return Err(UdaError::NoSuchSession { handle });
        };

        if self.active.current_handle != Some(handle) {
            self.save_active_state();
            self.session = saved;
            self.active.current_handle = Some(handle);
            info!("Switched active server session to handle {}", handle);
        }
        self.active.reconnect_requested = false;
        self.active.change_socket_requested = false;
        self.active.requested_handle = None;
        Ok(())
    }

    /// Store the live session state in the active record
    fn save_active_state(&mut self) {
        let state = self.session;
        if let Some(record) = self
            .active
            .current_handle
            .and_then(|handle| self.registry.record_mut(handle))
        {
            record.state = state;
        }
    }
}

/// Only the first resolved candidate is used
fn first_candidate(target: &HostTarget) -> UdaResult<ResolvedAddress> {
    resolver::resolve(&target.hostname, target.port)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            UdaError::Resolution(ResolutionError {
                host: target.hostname.clone(),
                code: libc::EAI_NONAME,
                message: "no usable address".to_string(),
                system: None,
            })
        })
}

/// Blocking connect; an interrupted call is completed rather than failed
fn connect_socket(socket: &Socket, address: &SocketAddr, deadline: Deadline) -> io::Result<()> {
    let address = SockAddr::from(*address);
    let result = match deadline.remaining() {
        Some(left) if left.is_zero() => return Err(io::Error::from(io::ErrorKind::TimedOut)),
        Some(left) => socket.connect_timeout(&address, left),
        None => socket.connect(&address),
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
            finish_interrupted_connect(socket, deadline)
        }
        other => other,
    }
}

/// Wait for a connect that was interrupted by a signal to complete
fn finish_interrupted_connect(socket: &Socket, deadline: Deadline) -> io::Result<()> {
    let handle = socket.as_raw_fd();
    loop {
        if deadline.expired() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        match transport::wait_ready(handle, Interest::Write, deadline.clip(SLEEP_SLICE)) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    match socket.take_error()? {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// `std::io` adapter over the active session, for the serialization layer
pub struct ActiveStream<'a> {
    manager: &'a mut ConnectionManager,
}

impl io::Read for ActiveStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.manager.read_unreported(buf) {
            Ok(n) => Ok(n),
            // End of stream for `io::Read` callers, not a failure
            Err(UdaError::Transport(TransportError::UnexpectedEmptyRead)) => Ok(0),
            Err(err) => {
                self.manager.errors.report_error("read", &err);
                Err(into_io_error(err))
            }
        }
    }
}

impl io::Write for ActiveStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.manager.write(buf).map_err(into_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn into_io_error(err: UdaError) -> io::Error {
    let kind = match &err {
        UdaError::Transport(TransportError::Os(e)) => e.kind(),
        UdaError::Transport(TransportError::PeerReset) => io::ErrorKind::ConnectionReset,
        UdaError::Transport(TransportError::BrokenPipe) => io::ErrorKind::BrokenPipe,
        UdaError::Transport(TransportError::ConnectionRefused) => io::ErrorKind::ConnectionRefused,
        UdaError::Transport(TransportError::NotConnected) => io::ErrorKind::NotConnected,
        UdaError::Transport(TransportError::UnexpectedEmptyRead) => io::ErrorKind::UnexpectedEof,
        UdaError::TimedOut { .. } => io::ErrorKind::TimedOut,
        UdaError::Cancelled { .. } => io::ErrorKind::Interrupted,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}
