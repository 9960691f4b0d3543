/// Blocking reads and writes on a server connection
///
/// Both directions first wait for the socket to become ready using short
/// `select(2)` polls. Writes poll until ready; reads give up polling after
/// `max_read_polls` iterations and attempt the read anyway. Interrupted
/// system calls are retried and never reported.
use socket2::Socket;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::ptr;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::TransportConfig;
use crate::core::signal::SigpipeGuard;
use crate::core::{CancelToken, Deadline, Handle};
use crate::error::{TransportError, UdaError, UdaResult};

/// Direction a socket is polled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn operation(self) -> &'static str {
        match self {
            Interest::Read => "read",
            Interest::Write => "write",
        }
    }
}

/// Per-call polling limits
#[derive(Debug, Clone)]
pub struct IoOptions {
    pub poll_interval: Duration,
    pub max_read_polls: u32,
    pub deadline: Deadline,
    pub cancel: Option<CancelToken>,
}

impl IoOptions {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_read_polls: config.max_read_polls,
            deadline: Deadline::from_timeout(config.io_timeout()),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl Default for IoOptions {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

/// Write all of `buf`, returning the number of bytes sent
pub fn write(socket: &Socket, buf: &[u8], options: &IoOptions) -> UdaResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    await_readiness(socket, Interest::Write, None, options)?;

    let _guard = SigpipeGuard::ignore().map_err(TransportError::Os)?;
    let mut sent = 0;
    while sent < buf.len() {
        match socket.send(&buf[sent..]) {
            Ok(0) => {
                return Err(TransportError::Os(io::Error::from(io::ErrorKind::WriteZero)).into())
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::from_os_error(e).into()),
        }
    }
    trace!("Wrote {} bytes to handle {}", sent, socket.as_raw_fd());
    Ok(sent)
}

/// Read up to `buf.len()` bytes.
///
/// The socket signalled (or was assumed) readable, so a zero-byte read is an
/// error rather than end of stream.
pub fn read(socket: &Socket, buf: &mut [u8], options: &IoOptions) -> UdaResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    await_readiness(socket, Interest::Read, Some(options.max_read_polls), options)?;

    let mut reader = socket;
    loop {
        match reader.read(buf) {
            Ok(0) => return Err(TransportError::UnexpectedEmptyRead.into()),
            Ok(n) => {
                trace!("Read {} bytes from handle {}", n, socket.as_raw_fd());
                return Ok(n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::from_os_error(e).into()),
        }
    }
}

fn await_readiness(
    socket: &Socket,
    interest: Interest,
    max_polls: Option<u32>,
    options: &IoOptions,
) -> UdaResult<()> {
    let handle = socket.as_raw_fd();
    let mut polls: u32 = 0;
    loop {
        if options.is_cancelled() {
            return Err(UdaError::cancelled(interest.operation()));
        }
        if options.deadline.expired() {
            return Err(UdaError::timed_out(interest.operation()));
        }

        let timeout = options.deadline.clip(options.poll_interval);
        let ready = match wait_ready(handle, interest, timeout) {
            Ok(ready) => ready,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => false,
            Err(e) => return Err(TransportError::from_os_error(e).into()),
        };

        pending_error(socket.take_error())?;
        if ready {
            return Ok(());
        }

        polls += 1;
        if max_polls.is_some_and(|max| polls >= max) {
            debug!(
                "Handle {} not ready after {} polls, attempting {} anyway",
                handle,
                polls,
                interest.operation()
            );
            return Ok(());
        }
    }
}

/// Classify the result of reading (and clearing) `SO_ERROR`.
///
/// Reset, unreachable and refused map to their own variants; any other
/// pending error is returned as is.
fn pending_error(taken: io::Result<Option<io::Error>>) -> Result<(), TransportError> {
    match taken {
        Ok(None) => Ok(()),
        Ok(Some(err)) => Err(TransportError::from_os_error(err)),
        Err(err) => Err(TransportError::Os(err)),
    }
}

/// One `select(2)` poll of a single handle
pub fn wait_ready(handle: Handle, interest: Interest, timeout: Duration) -> io::Result<bool> {
    if handle < 0 || handle as usize >= libc::FD_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("handle {} cannot be polled", handle),
        ));
    }

    // SAFETY: fd_set is plain data and the handle is within FD_SETSIZE.
    let mut set: libc::fd_set = unsafe { std::mem::zeroed() };
    unsafe {
        libc::FD_ZERO(&mut set);
        libc::FD_SET(handle, &mut set);
    }
    let mut tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };

    let set_ptr: *mut libc::fd_set = &mut set;
    let (read_set, write_set) = match interest {
        Interest::Read => (set_ptr, ptr::null_mut()),
        Interest::Write => (ptr::null_mut(), set_ptr),
    };

    // SAFETY: every pointer references a live local for the duration of the call.
    let rc = unsafe { libc::select(handle + 1, read_set, write_set, ptr::null_mut(), &mut tv) };
    match rc {
        rc if rc < 0 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(true),
    }
}
