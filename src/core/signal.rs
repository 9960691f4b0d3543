//! Scoped SIGPIPE suppression.
//!
//! Writing to a socket whose peer has gone away raises SIGPIPE, which
//! terminates the process by default. [`SigpipeGuard`] ignores the signal for
//! as long as it is alive and reinstates the previous disposition on drop, so
//! every exit path of a write restores it.
use std::io;
use std::ptr;

/// Keeps SIGPIPE ignored until dropped
pub struct SigpipeGuard {
    previous: libc::sigaction,
}

impl SigpipeGuard {
    pub fn ignore() -> io::Result<Self> {
        // SAFETY: sigaction is plain data; an all-zero value with SIG_IGN and an
        // emptied mask is a valid disposition.
        let mut ignore: libc::sigaction = unsafe { std::mem::zeroed() };
        ignore.sa_sigaction = libc::SIG_IGN;
        // SAFETY: sa_mask is a live, writable sigset_t.
        unsafe { libc::sigemptyset(&mut ignore.sa_mask) };

        // SAFETY: as above, overwritten by the kernel.
        let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
        // SAFETY: both pointers reference live locals.
        let rc = unsafe { libc::sigaction(libc::SIGPIPE, &ignore, &mut previous) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { previous })
    }
}

impl Drop for SigpipeGuard {
    fn drop(&mut self) {
        // SAFETY: restores the disposition captured in `ignore`.
        unsafe { libc::sigaction(libc::SIGPIPE, &self.previous, ptr::null_mut()) };
    }
}

/// Currently installed SIGPIPE handler
pub fn sigpipe_handler() -> io::Result<libc::sighandler_t> {
    // SAFETY: plain data, filled in by the kernel.
    let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
    // SAFETY: a null new-action only queries the disposition.
    let rc = unsafe { libc::sigaction(libc::SIGPIPE, ptr::null(), &mut current) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(current.sa_sigaction)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;

    extern "C" fn marker_handler(_: libc::c_int) {}

    /// Install a recognisable handler, returning the one it replaced
    pub(crate) fn install_marker_handler() -> libc::sigaction {
        // SAFETY: test-only disposition swap with live locals.
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = marker();
            libc::sigemptyset(&mut action.sa_mask);
            let mut previous: libc::sigaction = std::mem::zeroed();
            libc::sigaction(libc::SIGPIPE, &action, &mut previous);
            previous
        }
    }

    pub(crate) fn marker() -> libc::sighandler_t {
        marker_handler as extern "C" fn(libc::c_int) as libc::sighandler_t
    }

    pub(crate) fn restore_handler(previous: &libc::sigaction) {
        // SAFETY: restores a disposition captured by install_marker_handler.
        unsafe { libc::sigaction(libc::SIGPIPE, previous, ptr::null_mut()) };
    }

    #[test]
    #[serial(sigpipe)]
    fn test_guard_ignores_then_restores() {
        let original = install_marker_handler();
        assert_eq!(sigpipe_handler().unwrap(), marker());

        {
            let _guard = SigpipeGuard::ignore().unwrap();
            assert_eq!(sigpipe_handler().unwrap(), libc::SIG_IGN);
        }

        assert_eq!(sigpipe_handler().unwrap(), marker());
        restore_handler(&original);
    }
}
