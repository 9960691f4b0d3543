/// Host name to socket address resolution
///
/// Resolution goes through the platform `getaddrinfo` so that failures carry
/// the resolver's own error code and text. Numeric hosts are flagged so the
/// resolver skips DNS, and `localhost` is biased toward whichever loopback
/// family the machine actually has.
use std::ffi::{CStr, CString};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::raw::c_int;
use std::ptr;

use socket2::{Domain, Protocol, Type};
use tracing::debug;

use crate::error::ResolutionError;

/// Address family of a resolved candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    fn raw(self) -> c_int {
        match self {
            AddressFamily::Ipv4 => libc::AF_INET,
            AddressFamily::Ipv6 => libc::AF_INET6,
        }
    }

    fn from_raw(family: c_int) -> Option<Self> {
        match family {
            libc::AF_INET => Some(AddressFamily::Ipv4),
            libc::AF_INET6 => Some(AddressFamily::Ipv6),
            _ => None,
        }
    }

    pub fn domain(self) -> Domain {
        match self {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        }
    }
}

/// One connectable candidate produced by [`resolve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub family: AddressFamily,
    pub socket_type: Type,
    pub protocol: Option<Protocol>,
    pub address: SocketAddr,
}

/// How a host name is treated before it reaches the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Localhost,
    Ipv6Literal,
    Ipv4Literal,
    Named,
}

/// Hints handed to the platform resolver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveHints {
    pub family: Option<AddressFamily>,
    /// Skip DNS, the host is already an address
    pub numeric_host: bool,
}

/// Classify a host name without touching the network
pub fn classify_host(hostname: &str) -> HostKind {
    if hostname == "localhost" {
        HostKind::Localhost
    } else if hostname.contains(':') {
        HostKind::Ipv6Literal
    } else if is_numeric_ipv4(hostname) {
        HostKind::Ipv4Literal
    } else {
        HostKind::Named
    }
}

/// True when every dot-separated component is a non-empty run of digits
pub fn is_numeric_ipv4(hostname: &str) -> bool {
    !hostname.is_empty()
        && hostname
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Resolve `hostname:port` into connectable TCP candidates, in resolver order
pub fn resolve(hostname: &str, port: u16) -> Result<Vec<ResolvedAddress>, ResolutionError> {
    let kind = classify_host(hostname);
    let hints = match kind {
        HostKind::Localhost => ResolveHints {
            family: probe_localhost_family(port),
            numeric_host: false,
        },
        HostKind::Ipv6Literal => ResolveHints {
            family: Some(AddressFamily::Ipv6),
            numeric_host: true,
        },
        HostKind::Ipv4Literal => ResolveHints {
            family: Some(AddressFamily::Ipv4),
            numeric_host: true,
        },
        HostKind::Named => ResolveHints::default(),
    };

    let node = match kind {
        HostKind::Ipv6Literal => hostname.trim_start_matches('[').trim_end_matches(']'),
        _ => hostname,
    };

    debug!("Resolving {}:{} as {:?} with {:?}", hostname, port, kind, hints);
    lookup(node, port, hints)
}

/// Pick the loopback family to use for `localhost`: IPv4 if present, else IPv6
fn probe_localhost_family(port: u16) -> Option<AddressFamily> {
    let candidates = lookup("localhost", port, ResolveHints::default()).ok()?;
    if candidates.iter().any(|c| c.family == AddressFamily::Ipv4) {
        Some(AddressFamily::Ipv4)
    } else if candidates.iter().any(|c| c.family == AddressFamily::Ipv6) {
        Some(AddressFamily::Ipv6)
    } else {
        None
    }
}

/// Run `getaddrinfo` with the given hints
pub fn lookup(
    hostname: &str,
    port: u16,
    hints: ResolveHints,
) -> Result<Vec<ResolvedAddress>, ResolutionError> {
    let invalid = |message: &str| ResolutionError {
        host: hostname.to_string(),
        code: libc::EAI_NONAME,
        message: message.to_string(),
        system: None,
    };
    let node = CString::new(hostname).map_err(|_| invalid("host name contains a NUL byte"))?;
    let service = CString::new(port.to_string()).map_err(|_| invalid("invalid service"))?;

    // SAFETY: addrinfo is a plain C struct, all-zero is its documented empty value.
    let mut raw_hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    raw_hints.ai_family = hints.family.map_or(libc::AF_UNSPEC, AddressFamily::raw);
    raw_hints.ai_socktype = libc::SOCK_STREAM;
    raw_hints.ai_flags = libc::AI_NUMERICSERV;
    if hints.numeric_host {
        raw_hints.ai_flags |= libc::AI_NUMERICHOST;
    }

    let mut result: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: node and service are valid C strings, hints and result point to live locals.
    let rc = unsafe { libc::getaddrinfo(node.as_ptr(), service.as_ptr(), &raw_hints, &mut result) };
    if rc != 0 {
        let system = (rc == libc::EAI_SYSTEM).then(io::Error::last_os_error);
        return Err(ResolutionError {
            host: hostname.to_string(),
            code: rc,
            message: gai_message(rc),
            system,
        });
    }

    let list = AddrInfoList(result);
    Ok(list.candidates())
}

fn gai_message(code: c_int) -> String {
    // SAFETY: gai_strerror returns a static NUL-terminated string for any code.
    unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
        .to_string_lossy()
        .into_owned()
}

/// Owner of a `getaddrinfo` result list
struct AddrInfoList(*mut libc::addrinfo);

impl AddrInfoList {
    fn candidates(&self) -> Vec<ResolvedAddress> {
        let mut out = Vec::new();
        let mut cursor = self.0;
        while !cursor.is_null() {
            // SAFETY: cursor walks the list returned by getaddrinfo, which stays alive until drop.
            let info = unsafe { &*cursor };
            let family = AddressFamily::from_raw(info.ai_family);
            // SAFETY: ai_addr belongs to the same live node.
            let address = unsafe { socket_addr(info.ai_addr, info.ai_family) };
            if let (Some(family), Some(address)) = (family, address) {
                out.push(ResolvedAddress {
                    family,
                    socket_type: Type::from(info.ai_socktype),
                    protocol: (info.ai_protocol != 0).then(|| Protocol::from(info.ai_protocol)),
                    address,
                });
            }
            cursor = info.ai_next;
        }
        out
    }
}

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.0.is_null() {
            // SAFETY: the pointer came from a successful getaddrinfo and is freed once.
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

/// Convert a C socket address into a std one.
///
/// # Safety
/// `addr` must be null or point to a socket address of the given family.
unsafe fn socket_addr(addr: *const libc::sockaddr, family: c_int) -> Option<SocketAddr> {
    if addr.is_null() {
        return None;
    }
    match family {
        libc::AF_INET => {
            let sin: libc::sockaddr_in = ptr::read_unaligned(addr.cast());
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6: libc::sockaddr_in6 = ptr::read_unaligned(addr.cast());
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_host() {
        assert_eq!(classify_host("localhost"), HostKind::Localhost);
        assert_eq!(classify_host("::1"), HostKind::Ipv6Literal);
        assert_eq!(classify_host("fe80::1%eth0"), HostKind::Ipv6Literal);
        assert_eq!(classify_host("192.168.1.20"), HostKind::Ipv4Literal);
        assert_eq!(classify_host("uda2.mast.example.org"), HostKind::Named);
        assert_eq!(classify_host("10.0.0.example"), HostKind::Named);
    }

    #[test]
    fn test_numeric_ipv4_components() {
        assert!(is_numeric_ipv4("127.0.0.1"));
        assert!(is_numeric_ipv4("10"));
        assert!(!is_numeric_ipv4(""));
        assert!(!is_numeric_ipv4("1..2"));
        assert!(!is_numeric_ipv4("1.2.3.4a"));
    }

    #[test]
    fn test_resolve_numeric_ipv4() {
        let candidates = resolve("127.0.0.1", 56565).unwrap();
        let first = &candidates[0];
        assert_eq!(first.family, AddressFamily::Ipv4);
        assert_eq!(first.address, "127.0.0.1:56565".parse::<SocketAddr>().unwrap());
        assert_eq!(first.socket_type, Type::STREAM);
    }

    #[test]
    fn test_resolve_numeric_ipv6() {
        let candidates = resolve("::1", 8080).unwrap();
        assert_eq!(candidates[0].family, AddressFamily::Ipv6);
        assert_eq!(candidates[0].address.port(), 8080);
        assert!(candidates[0].address.ip().is_loopback());
    }

    #[test]
    fn test_resolve_localhost_prefers_one_family() {
        let candidates = resolve("localhost", 56565).unwrap();
        assert!(!candidates.is_empty());
        let family = candidates[0].family;
        assert!(candidates.iter().all(|c| c.family == family));
        assert!(candidates[0].address.ip().is_loopback());
    }

    #[test]
    fn test_numeric_hint_rejects_names() {
        let hints = ResolveHints {
            family: Some(AddressFamily::Ipv4),
            numeric_host: true,
        };
        let err = lookup("uda.example.org", 56565, hints).unwrap_err();
        assert_ne!(err.code, 0);
        assert!(!err.message.is_empty());
        assert_eq!(err.host, "uda.example.org");
    }

    #[test]
    fn test_nul_byte_is_a_resolution_error() {
        let err = resolve("bad\0host", 1).unwrap_err();
        assert_eq!(err.code, libc::EAI_NONAME);
    }
}
