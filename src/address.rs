//! Endpoint equality.
//!
//! Two endpoints name the same party when their IP addresses and ports are
//! equal, regardless of how the addresses are represented: an IPv4-mapped IPv6
//! address equals the IPv4 address it maps, and IPv6 flow information or scope
//! identifiers do not take part in the comparison.

use std::net::{IpAddr, SocketAddr};

/// Compare two optional endpoints.
///
/// Returns `false` whenever either side is `None`, including when both are.
pub fn endpoints_equal(a: Option<&SocketAddr>, b: Option<&SocketAddr>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_endpoint(a, b),
        _ => false,
    }
}

/// Compare two endpoints by resolved IP address and port.
pub fn same_endpoint(a: &SocketAddr, b: &SocketAddr) -> bool {
    a.port() == b.port() && canonical_ip(a.ip()) == canonical_ip(b.ip())
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV6};

    #[test]
    fn test_equal_by_value() {
        let a: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let b = SocketAddr::from((Ipv4Addr::LOCALHOST, 9000));
        assert!(endpoints_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn test_port_mismatch() {
        let a: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert!(!endpoints_equal(Some(&a), Some(&b)));
    }

    #[test]
    fn test_ip_mismatch() {
        let a: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let b: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        assert!(!same_endpoint(&a, &b));
    }

    #[test]
    fn test_none_is_never_equal() {
        let a: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert!(!endpoints_equal(Some(&a), None));
        assert!(!endpoints_equal(None, Some(&a)));
        assert!(!endpoints_equal(None, None));
    }

    #[test]
    fn test_ipv4_mapped_equals_ipv4() {
        let v4: SocketAddr = "192.168.1.7:53".parse().unwrap();
        let mapped: SocketAddr = "[::ffff:192.168.1.7]:53".parse().unwrap();
        assert!(same_endpoint(&v4, &mapped));
        assert!(same_endpoint(&mapped, &v4));
    }

    #[test]
    fn test_ipv6_ignores_flow_and_scope() {
        let a = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 80, 0, 0));
        let b = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 80, 7, 3));
        assert_ne!(a, b);
        assert!(same_endpoint(&a, &b));
    }
}
