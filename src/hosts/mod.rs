/// Host directory: alias and canonical host lookup
///
/// Configured server names may be aliases for a canonical host name and
/// port. The connection manager consults a [`HostDirectory`] before address
/// resolution; [`HostList`] is the configuration-backed implementation.
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::HostTarget;
use crate::error::{UdaError, UdaResult};
use crate::utils::strip_ssl_prefix;

/// A host directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// Name users configure instead of the host name
    pub alias: String,
    /// Canonical host name, optionally prefixed with `SSL://`
    #[serde(default)]
    pub host_name: String,
    /// Port substituted for the configured one
    #[serde(default)]
    pub port: Option<u16>,
}

impl HostEntry {
    pub fn new(alias: &str, host_name: &str, port: Option<u16>) -> Self {
        Self {
            alias: alias.to_string(),
            host_name: host_name.to_string(),
            port,
        }
    }

    /// Host name without any `SSL://` prefix
    pub fn canonical_host(&self) -> &str {
        strip_ssl_prefix(&self.host_name).0
    }

    pub fn is_ssl(&self) -> bool {
        strip_ssl_prefix(&self.host_name).1
    }
}

/// Lookup contract used by the connection manager
pub trait HostDirectory {
    /// Find the entry whose alias matches `name`
    fn find_by_alias(&self, name: &str) -> Option<&HostEntry>;

    /// Find the entry whose canonical host name matches `name`
    fn find_by_name(&self, name: &str) -> Option<&HostEntry>;

    /// Substitute alias and port information into a configured target.
    ///
    /// An unknown name is left as it is. A known alias without a host name
    /// is an error, as is a target that ends up with port 0.
    fn resolve_target(&self, target: &HostTarget) -> UdaResult<HostTarget> {
        let mut resolved = target.clone();

        if let Some(entry) = self.find_by_alias(&target.hostname) {
            if entry.canonical_host().trim().is_empty() {
                return Err(UdaError::InvalidAlias {
                    alias: target.hostname.clone(),
                });
            }
            debug!(
                "Host alias {} -> {} (port {:?})",
                target.hostname, entry.host_name, entry.port
            );
            resolved.hostname = entry.host_name.clone();
            if let Some(port) = entry.port.filter(|p| *p > 0) {
                resolved.port = port;
            }
        } else if let Some(entry) = self.find_by_name(&target.hostname) {
            if let Some(port) = entry.port.filter(|p| *p > 0) {
                resolved.port = port;
            }
            resolved.is_ssl |= entry.is_ssl();
        }

        let (host, ssl) = strip_ssl_prefix(&resolved.hostname);
        if ssl {
            resolved.hostname = host.to_string();
            resolved.is_ssl = true;
        }

        if resolved.port == 0 {
            return Err(UdaError::InvalidPort {
                host: resolved.hostname,
            });
        }

        Ok(resolved)
    }
}

/// In-memory host list, usually loaded from the `[[hosts]]` configuration table
#[derive(Debug, Clone, Default)]
pub struct HostList {
    entries: Vec<HostEntry>,
}

impl HostList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<HostEntry>) -> Self {
        Self { entries }
    }
}

impl HostDirectory for HostList {
    fn find_by_alias(&self, name: &str) -> Option<&HostEntry> {
        self.entries
            .iter()
            .find(|entry| entry.alias.eq_ignore_ascii_case(name))
    }

    fn find_by_name(&self, name: &str) -> Option<&HostEntry> {
        let name = strip_ssl_prefix(name).0;
        self.entries
            .iter()
            .find(|entry| entry.canonical_host().eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> HostList {
        HostList::from_entries(vec![
            HostEntry::new("mast", "uda2.mast.example.org", Some(56565)),
            HostEntry::new("secure", "SSL://uda.secure.example.org", Some(56560)),
            HostEntry::new("broken", "", Some(56565)),
            HostEntry::new("plain", "plain.example.org", Some(56999)),
        ])
    }

    #[test]
    fn test_alias_substitution() {
        let target = HostTarget::new("MAST", 1234);
        let resolved = directory().resolve_target(&target).unwrap();
        assert_eq!(resolved.hostname, "uda2.mast.example.org");
        assert_eq!(resolved.port, 56565);
        assert!(!resolved.is_ssl);
    }

    #[test]
    fn test_alias_ssl_prefix_is_stripped() {
        let resolved = directory()
            .resolve_target(&HostTarget::new("secure", 1))
            .unwrap();
        assert_eq!(resolved.hostname, "uda.secure.example.org");
        assert_eq!(resolved.port, 56560);
        assert!(resolved.is_ssl);
    }

    #[test]
    fn test_name_match_substitutes_port_only() {
        let resolved = directory()
            .resolve_target(&HostTarget::new("plain.example.org", 56565))
            .unwrap();
        assert_eq!(resolved.hostname, "plain.example.org");
        assert_eq!(resolved.port, 56999);
    }

    #[test]
    fn test_unknown_host_is_left_alone() {
        let resolved = directory()
            .resolve_target(&HostTarget::new("ssl://other.example.org", 56565))
            .unwrap();
        assert_eq!(resolved.hostname, "other.example.org");
        assert!(resolved.is_ssl);
    }

    #[test]
    fn test_unnamed_alias_is_rejected() {
        let err = directory()
            .resolve_target(&HostTarget::new("broken", 56565))
            .unwrap_err();
        assert!(matches!(err, UdaError::InvalidAlias { .. }));
    }

    #[test]
    fn test_zero_port_is_rejected() {
        let err = HostList::new()
            .resolve_target(&HostTarget::new("somewhere", 0))
            .unwrap_err();
        assert!(matches!(err, UdaError::InvalidPort { .. }));
    }
}
