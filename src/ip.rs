use std::net::Ipv4Addr;

/// Parses a dotted-quad literal into its canonical 4-byte form.
///
/// Returns `None` for anything that is not an IPv4 address; all
/// comparison and arithmetic in this crate happens on the 4-byte form.
pub fn parse_ipv4(input: &str) -> Option<Ipv4Addr> {
    input.parse().ok()
}

/// Returns the address `offset` positions after `ip`.
pub fn ip_add(ip: Ipv4Addr, offset: u8) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip).wrapping_add(u32::from(offset)))
}

/// The final octet of the address.
pub fn last_octet(ip: Ipv4Addr) -> u8 {
    ip.octets()[3]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4("10.0.0.1"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(
            parse_ipv4("255.255.255.0"),
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(parse_ipv4(""), None);
        assert_eq!(parse_ipv4("10.0.0"), None);
        assert_eq!(parse_ipv4("10.0.0.256"), None);
        assert_eq!(parse_ipv4("fe80::1"), None);
    }

    #[test]
    fn test_format_roundtrip() {
        for ip in [
            Ipv4Addr::new(0, 0, 0, 0),
            Ipv4Addr::new(10, 0, 0, 10),
            Ipv4Addr::new(192, 168, 1, 254),
            Ipv4Addr::new(255, 255, 255, 255),
        ] {
            assert_eq!(parse_ipv4(&ip.to_string()), Some(ip));
        }
    }

    #[test]
    fn test_ip_add() {
        let start = Ipv4Addr::new(10, 0, 0, 10);
        assert_eq!(ip_add(start, 0), start);
        assert_eq!(ip_add(start, 2), Ipv4Addr::new(10, 0, 0, 12));
        assert_eq!(ip_add(start, 245), Ipv4Addr::new(10, 0, 0, 255));
    }

    #[test]
    fn test_last_octet() {
        assert_eq!(last_octet(Ipv4Addr::new(10, 0, 0, 200)), 200);
    }
}
