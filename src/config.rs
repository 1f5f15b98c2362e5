//! Configuration model for the DHCP server.
//!
//! The configuration is published as a YAML document in a ConfigMap and
//! re-validated on every change. Validation resolves the server IP
//! (substituting the node IP when the document leaves it empty) and
//! checks every IP-valued field and address range before the document is
//! accepted.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ip::{ip_add, last_octet, parse_ipv4};

/// Lease duration handed to clients when the document does not set one.
pub const DEFAULT_LEASE_TTL_SECONDS: u32 = 7200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DhcpConfig {
    /// IP address the server identifies itself with.
    ///
    /// May be left empty in the document; validation fills in the node IP.
    #[serde(rename = "server-ip", default)]
    pub server_ip: String,

    /// Address ranges available for dynamic allocation.
    #[serde(default)]
    pub ranges: Vec<AddressRange>,

    /// Option defaults included in Offer/ACK replies.
    #[serde(default)]
    pub options: OptionDefaults,

    /// Lease duration in seconds. Defaults to two hours.
    #[serde(rename = "lease-ttl", default, skip_serializing_if = "Option::is_none")]
    pub lease_ttl: Option<u32>,
}

/// A contiguous run of IP addresses within one final-octet block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressRange {
    /// First address of the range.
    pub start: String,

    /// Number of addresses in the range.
    pub length: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionDefaults {
    #[serde(rename = "subnet-mask", default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<String>,

    #[serde(rename = "router-ip", default, skip_serializing_if = "Option::is_none")]
    pub router_ip: Option<String>,

    #[serde(rename = "dns-ip", default, skip_serializing_if = "Option::is_none")]
    pub dns_ip: Option<String>,

    #[serde(rename = "domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl DhcpConfig {
    /// Validates the configuration in place.
    ///
    /// An empty `server-ip` is replaced by `default_server_ip` (the node
    /// IP from the environment) before being checked.
    pub fn validate(&mut self, default_server_ip: &str) -> Result<()> {
        if self.server_ip.is_empty() {
            self.server_ip = default_server_ip.to_string();
        }
        if parse_ipv4(&self.server_ip).is_none() {
            return Err(Error::InvalidConfig(format!(
                "failed to parse server-ip '{}'",
                self.server_ip
            )));
        }
        for range in &self.ranges {
            range.validate()?;
        }
        self.options.validate()?;
        Ok(())
    }

    /// The resolved server IP. Only meaningful after validation.
    pub fn server_ipv4(&self) -> Result<Ipv4Addr> {
        parse_ipv4(&self.server_ip).ok_or_else(|| {
            Error::InvalidConfig(format!("failed to parse server-ip '{}'", self.server_ip))
        })
    }

    /// Lease duration handed to clients.
    pub fn lease_ttl_seconds(&self) -> u32 {
        self.lease_ttl.unwrap_or(DEFAULT_LEASE_TTL_SECONDS)
    }
}

impl AddressRange {
    pub fn validate(&self) -> Result<()> {
        let Some(start) = parse_ipv4(&self.start) else {
            return Err(Error::InvalidConfig(format!(
                "failed to parse range start '{}'",
                self.start
            )));
        };
        if self.length < 1 {
            return Err(Error::InvalidConfig(format!(
                "range length must be >= 1, got {}",
                self.length
            )));
        }
        if u16::from(last_octet(start)) + self.length > 255 {
            return Err(Error::InvalidConfig(format!(
                "range length out of range, got {}",
                self.length
            )));
        }
        Ok(())
    }

    /// First address of the range, if `start` parses.
    pub fn start_ipv4(&self) -> Option<Ipv4Addr> {
        parse_ipv4(&self.start)
    }

    /// True when `ip` falls inside the range.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let Some(start) = self.start_ipv4() else {
            return false;
        };
        if self.length == 0 {
            return false;
        }
        let end = ip_add(start, (self.length - 1) as u8);
        start <= ip && ip <= end
    }
}

impl OptionDefaults {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("subnet-mask", &self.subnet_mask),
            ("router-ip", &self.router_ip),
            ("dns-ip", &self.dns_ip),
        ] {
            if let Some(value) = value
                && parse_ipv4(value).is_none()
            {
                return Err(Error::InvalidConfig(format!(
                    "failed to parse {} option '{}'",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: &str, length: u16) -> AddressRange {
        AddressRange {
            start: start.to_string(),
            length,
        }
    }

    #[test]
    fn test_validate_fills_in_node_ip() {
        let mut config = DhcpConfig::default();
        config.validate("10.0.0.1").unwrap();
        assert_eq!(config.server_ip, "10.0.0.1");
        assert_eq!(config.server_ipv4().unwrap(), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_validate_keeps_explicit_server_ip() {
        let mut config = DhcpConfig {
            server_ip: "10.0.0.2".to_string(),
            ..Default::default()
        };
        config.validate("10.0.0.1").unwrap();
        assert_eq!(config.server_ip, "10.0.0.2");
    }

    #[test]
    fn test_validate_rejects_bad_server_ip() {
        let mut config = DhcpConfig {
            server_ip: "not-an-ip".to_string(),
            ..Default::default()
        };
        assert!(config.validate("10.0.0.1").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(range("10.0.0.10", 3).validate().is_ok());
        assert!(range("10.0.0.10", 0).validate().is_err());
        assert!(range("bogus", 3).validate().is_err());

        // The range may reach the final octet but never cross it.
        assert!(range("10.0.0.1", 254).validate().is_ok());
        assert!(range("10.0.0.1", 255).validate().is_err());
        assert!(range("10.0.0.0", 255).validate().is_ok());
    }

    #[test]
    fn test_range_containment() {
        let r = range("10.0.0.10", 3);
        assert!(!r.contains(Ipv4Addr::new(10, 0, 0, 9)));
        for i in 0..3 {
            assert!(r.contains(Ipv4Addr::new(10, 0, 0, 10 + i)));
        }
        assert!(!r.contains(Ipv4Addr::new(10, 0, 0, 13)));
        assert!(!r.contains(Ipv4Addr::new(10, 0, 1, 11)));
    }

    #[test]
    fn test_option_defaults_validation() {
        let good = OptionDefaults {
            subnet_mask: Some("255.255.255.0".to_string()),
            router_ip: Some("10.0.0.1".to_string()),
            dns_ip: None,
            domain: Some("cluster.local".to_string()),
        };
        assert!(good.validate().is_ok());

        let bad = OptionDefaults {
            router_ip: Some("10.0.0".to_string()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_document_decoding() {
        let text = r#"
server-ip: 10.0.0.1
ranges:
  - start: 10.0.0.10
    length: 3
options:
  subnet-mask: 255.255.255.0
  domain: cluster.local
"#;
        let mut config: DhcpConfig = serde_yaml::from_str(text).unwrap();
        config.validate("10.0.0.99").unwrap();
        assert_eq!(config.server_ip, "10.0.0.1");
        assert_eq!(config.ranges.len(), 1);
        assert_eq!(config.ranges[0].length, 3);
        assert_eq!(config.options.domain.as_deref(), Some("cluster.local"));
        assert_eq!(config.lease_ttl_seconds(), DEFAULT_LEASE_TTL_SECONDS);
    }

    #[test]
    fn test_document_lease_ttl_override() {
        let text = "ranges: []\nlease-ttl: 600\n";
        let config: DhcpConfig = serde_yaml::from_str(text).unwrap();
        assert_eq!(config.lease_ttl_seconds(), 600);
    }
}
