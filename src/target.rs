use crate::probe::ProbeError;
use std::fmt;

/// Host and port of the endpoint to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    /// Split an address of the form `host:port` or `[ipv6]:port`.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::InvalidTarget` if the address has no port, an empty
    /// host, a non-numeric (or zero) port, or an unbracketed IPv6 literal.
    pub fn parse(address: &str) -> Result<Self, ProbeError> {
        let invalid = |reason: &'static str| ProbeError::InvalidTarget {
            target: address.to_string(),
            reason,
        };

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing ']' in address"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port in address"))?;
            (host, port)
        } else {
            let (host, port) = address
                .rsplit_once(':')
                .ok_or_else(|| invalid("missing port in address"))?;
            if host.contains(':') {
                return Err(invalid("too many colons in address"));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid("missing host in address"));
        }

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| invalid("invalid port in address"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_parse_host_port() {
        let target = ProbeTarget::parse("db.example.com:1433").unwrap();
        assert_eq!(target.host, "db.example.com");
        assert_eq!(target.port, 1433);
    }

    #[test]
    fn test_parse_ipv4() {
        let target = ProbeTarget::parse("10.0.0.7:14330").unwrap();
        assert_eq!(target.host, "10.0.0.7");
        assert_eq!(target.port, 14330);
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let target = ProbeTarget::parse("[2001:db8::1]:1433").unwrap();
        assert_eq!(target.host, "2001:db8::1");
        assert_eq!(target.port, 1433);
        assert_eq!(target.to_string(), "[2001:db8::1]:1433");
    }

    #[test]
    fn test_parse_missing_port() {
        for address in ["db.example.com", "[::1]", "[::1]1433"] {
            let err = ProbeTarget::parse(address).unwrap_err();
            assert!(
                matches!(err, ProbeError::InvalidTarget { .. }),
                "{address}: {err}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for address in [
            "",
            ":1433",
            "db.example.com:",
            "db.example.com:sql",
            "db.example.com:0",
            "db.example.com:70000",
            "2001:db8::1:1433",
            "[::1:1433",
        ] {
            assert!(
                matches!(
                    ProbeTarget::parse(address),
                    Err(ProbeError::InvalidTarget { .. })
                ),
                "{address} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_target_message() {
        let err = ProbeTarget::parse("db.example.com").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("db.example.com"));
        assert!(message.contains("missing port"));
    }

    #[test]
    fn test_display_roundtrip() {
        let target = ProbeTarget::parse("db.example.com:1433").unwrap();
        assert_eq!(target.to_string(), "db.example.com:1433");
    }
}
