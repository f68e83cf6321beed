//! Address validation and IPv4 scope classification.

use std::net::Ipv4Addr;

/// Lowest port accepted for binding and dialing.
pub const MIN_PORT: u16 = 1000;

/// Routing scope of an IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum AddressScope {
    /// 0.0.0.0/8
    Unspecified,
    /// 127.0.0.0/8
    Loopback,
    /// RFC 1918: 10/8, 172.16/12, 192.168/16
    Private,
    /// 169.254.0.0/16
    LinkLocal,
    /// 240.0.0.0/4, including broadcast
    Reserved,
    Public,
}

impl AddressScope {
    pub fn classify(ip: Ipv4Addr) -> Self {
        let [first, ..] = ip.octets();
        if first == 0 {
            Self::Unspecified
        } else if ip.is_loopback() {
            Self::Loopback
        } else if ip.is_private() {
            Self::Private
        } else if ip.is_link_local() {
            Self::LinkLocal
        } else if first >= 240 {
            Self::Reserved
        } else {
            Self::Public
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }
}

/// Parse a dotted-quad IPv4 literal. Leading zeros and hostnames are rejected.
pub fn parse_ipv4(address: &str) -> Option<Ipv4Addr> {
    address.parse().ok()
}

pub fn is_valid_port(port: u16) -> bool {
    port >= MIN_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(ip: &str) -> AddressScope {
        AddressScope::classify(ip.parse().unwrap())
    }

    #[test]
    fn test_classify() {
        assert_eq!(scope("0.0.0.0"), AddressScope::Unspecified);
        assert_eq!(scope("127.0.0.1"), AddressScope::Loopback);
        assert_eq!(scope("10.1.2.3"), AddressScope::Private);
        assert_eq!(scope("172.20.0.1"), AddressScope::Private);
        assert_eq!(scope("192.168.1.1"), AddressScope::Private);
        assert_eq!(scope("169.254.10.10"), AddressScope::LinkLocal);
        assert_eq!(scope("255.255.255.255"), AddressScope::Reserved);
        assert_eq!(scope("8.8.8.8"), AddressScope::Public);
        assert_eq!(scope("172.32.0.1"), AddressScope::Public);
        assert!(scope("8.8.8.8").is_public());
        assert!(!scope("127.0.0.1").is_public());
    }

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4("1.2.3.4"), Some(Ipv4Addr::new(1, 2, 3, 4)));
        assert_eq!(parse_ipv4("01.2.3.4"), None);
        assert_eq!(parse_ipv4("1.2.3"), None);
        assert_eq!(parse_ipv4("::1"), None);
        assert_eq!(parse_ipv4("localhost"), None);
    }

    #[test]
    fn test_port_range() {
        assert!(!is_valid_port(0));
        assert!(!is_valid_port(999));
        assert!(is_valid_port(1000));
        assert!(is_valid_port(65535));
    }
}
