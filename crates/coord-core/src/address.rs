//! Cluster member addresses and the reversible path-segment escape used to
//! embed them (and partition keys) as znode names.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a single cluster member by `(host, port)`.
///
/// Comparable and hashable so it can be used as a set/map key directly;
/// ordering is by `host` then `port`, which also gives the deterministic
/// tie-break the rebalance algorithm and `orderByAge` rely on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host.cmp(&other.host).then(self.port.cmp(&other.port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolves the data center an address belongs to.
///
/// Pluggable per §3: production deployments derive this from the host (rack
/// awareness, cloud-provider zone tags, a static table); tests can supply a
/// constant or a host-prefix convention.
pub trait DataCenterResolver: Send + Sync {
    fn data_center_of(&self, address: &Address) -> String;
}

/// Resolver that treats the substring before the first `-` in the host as
/// the data center, defaulting to `"default"` when absent. Good enough for
/// tests and for deployments that encode DC in the hostname.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPrefixResolver;

impl DataCenterResolver for HostPrefixResolver {
    fn data_center_of(&self, address: &Address) -> String {
        address
            .host
            .split_once('-')
            .map_or_else(|| "default".to_string(), |(dc, _)| dc.to_string())
    }
}

/// Escapes an opaque byte string into a single znode-safe path segment.
///
/// `/` is replaced with `%2F` and any literal `%` is doubled to `%%`, so the
/// mapping is a total injection over arbitrary bytes.
#[must_use]
pub fn key_to_path(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &byte in raw {
        match byte {
            b'/' => out.push_str("%2F"),
            b'%' => out.push_str("%%"),
            _ => out.push(byte as char),
        }
    }
    out
}

/// Inverse of [`key_to_path`]: recovers the original bytes from a path
/// segment produced by it.
///
/// # Errors
///
/// Returns `Err` if `segment` contains a malformed escape (a trailing `%`
/// that is not part of `%2F` or `%%`).
pub fn path_to_key(segment: &str) -> Result<Vec<u8>, PathEscapeError> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            match bytes.get(i + 1..i + 3) {
                Some(b"2F") => {
                    out.push(b'/');
                    i += 3;
                }
                _ => match bytes.get(i + 1) {
                    Some(b'%') => {
                        out.push(b'%');
                        i += 2;
                    }
                    _ => return Err(PathEscapeError { segment: segment.to_string() }),
                },
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Escapes an `Address` into its `/members/{addr}` (or similar) path
/// segment, using `host:port` as the underlying byte string.
#[must_use]
pub fn address_to_path(address: &Address) -> String {
    key_to_path(address.to_string().as_bytes())
}

/// Parses an `Address` back out of a path segment produced by
/// [`address_to_path`].
///
/// # Errors
///
/// Returns `Err` if the segment is not a valid escaped `host:port` pair.
pub fn path_to_address(segment: &str) -> Result<Address, PathEscapeError> {
    let raw = path_to_key(segment)?;
    let text = String::from_utf8(raw).map_err(|_| PathEscapeError { segment: segment.to_string() })?;
    let (host, port) = text
        .rsplit_once(':')
        .ok_or_else(|| PathEscapeError { segment: segment.to_string() })?;
    let port: u16 = port
        .parse()
        .map_err(|_| PathEscapeError { segment: segment.to_string() })?;
    Ok(Address::new(host, port))
}

/// A path segment could not be un-escaped back into the original bytes.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed path segment: {segment}")]
pub struct PathEscapeError {
    pub segment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_display_is_host_port() {
        let a = Address::new("10.0.0.1", 9090);
        assert_eq!(a.to_string(), "10.0.0.1:9090");
    }

    #[test]
    fn address_ordering_is_host_then_port() {
        let a = Address::new("a", 2);
        let b = Address::new("a", 1);
        let c = Address::new("b", 0);
        assert!(b < a);
        assert!(a < c);
    }

    #[test]
    fn round_trip_plain_bytes() {
        let raw = b"simple-key".to_vec();
        let escaped = key_to_path(&raw);
        assert_eq!(path_to_key(&escaped).unwrap(), raw);
    }

    #[test]
    fn round_trip_with_slash() {
        let raw = b"a/b/c".to_vec();
        let escaped = key_to_path(&raw);
        assert!(!escaped.contains('/'));
        assert_eq!(path_to_key(&escaped).unwrap(), raw);
    }

    #[test]
    fn round_trip_with_percent() {
        let raw = b"100%done".to_vec();
        let escaped = key_to_path(&raw);
        assert_eq!(path_to_key(&escaped).unwrap(), raw);
    }

    #[test]
    fn malformed_trailing_percent_errors() {
        assert!(path_to_key("abc%").is_err());
    }

    #[test]
    fn address_path_round_trip() {
        let addr = Address::new("10.0.0.5", 9999);
        let path = address_to_path(&addr);
        assert_eq!(path_to_address(&path).unwrap(), addr);
    }

    #[test]
    fn host_prefix_resolver_extracts_dc() {
        let resolver = HostPrefixResolver;
        assert_eq!(
            resolver.data_center_of(&Address::new("us-east-1", 0)),
            "us"
        );
        assert_eq!(
            resolver.data_center_of(&Address::new("noprefix", 0)),
            "default"
        );
    }
}
