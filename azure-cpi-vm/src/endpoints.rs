//! Port-forwarding endpoint parsing.
//!
//! Endpoints are configured as comma-separated `public:private` pairs, one
//! list per protocol:
//!
//! ```text
//! tcp_endpoints: "22:22, 8080:80"
//! udp_endpoints: "53:53"
//! ```

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

use crate::error::{CpiError, Result};
use crate::types::NetworkConfig;

/// Transport protocol of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port-forwarding rule as the deployment template expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// `protocol ++ public_port`, e.g. `tcp8080`
    #[serde(rename = "endpointName")]
    pub name: String,
    #[serde(rename = "publicPort", serialize_with = "as_string")]
    pub public_port: u16,
    #[serde(rename = "privatePort", serialize_with = "as_string")]
    pub private_port: u16,
    pub protocol: Protocol,
    #[serde(rename = "enableDirectServerReturn", serialize_with = "as_title_case")]
    pub direct_server_return: bool,
}

impl Endpoint {
    pub fn new(protocol: Protocol, public_port: u16, private_port: u16) -> Self {
        Self {
            name: format!("{}{}", protocol, public_port),
            public_port,
            private_port,
            protocol,
            direct_server_return: false,
        }
    }
}

fn as_string<S: Serializer>(port: &u16, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(port)
}

fn as_title_case<S: Serializer>(
    flag: &bool,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(if *flag { "True" } else { "False" })
}

/// Parse one comma-separated `public:private` list.
///
/// A blank list yields no endpoints. Every entry must have exactly two
/// colon-separated port numbers; anything else is rejected.
pub fn parse_endpoints(list: &str, protocol: Protocol) -> Result<Vec<Endpoint>> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }

    list.split(',')
        .map(|entry| parse_entry(entry, protocol))
        .collect()
}

fn parse_entry(entry: &str, protocol: Protocol) -> Result<Endpoint> {
    let invalid = |reason: &str| {
        CpiError::invalid_endpoint(format!("{} entry '{}': {}", protocol, entry.trim(), reason))
    };

    let ports: Vec<&str> = entry.split(':').map(str::trim).collect();
    let [public, private] = ports.as_slice() else {
        return Err(invalid("expected public:private"));
    };

    let public_port = public.parse::<u16>().map_err(|_| invalid("bad public port"))?;
    let private_port = private.parse::<u16>().map_err(|_| invalid("bad private port"))?;

    Ok(Endpoint::new(protocol, public_port, private_port))
}

/// All endpoints of a network: TCP rules first, then UDP.
pub fn endpoints_for(network: &NetworkConfig) -> Result<Vec<Endpoint>> {
    let mut endpoints = parse_endpoints(&network.tcp_endpoints, Protocol::Tcp)?;
    endpoints.extend(parse_endpoints(&network.udp_endpoints, Protocol::Udp)?);

    let mut seen = HashSet::new();
    for endpoint in &endpoints {
        if !seen.insert(endpoint.name.as_str()) {
            return Err(CpiError::invalid_endpoint(format!(
                "duplicate endpoint {}",
                endpoint.name
            )));
        }
    }

    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_list() {
        let endpoints = parse_endpoints("8080:80, 9090:90", Protocol::Tcp).unwrap();
        assert_eq!(endpoints.len(), 2);

        assert_eq!(endpoints[0].name, "tcp8080");
        assert_eq!(endpoints[0].public_port, 8080);
        assert_eq!(endpoints[0].private_port, 80);
        assert_eq!(endpoints[0].protocol, Protocol::Tcp);

        assert_eq!(endpoints[1].name, "tcp9090");
        assert_eq!(endpoints[1].public_port, 9090);
        assert_eq!(endpoints[1].private_port, 90);
    }

    #[test]
    fn test_whitespace_around_tokens() {
        let endpoints = parse_endpoints("  53 :  5353 ", Protocol::Udp).unwrap();
        assert_eq!(endpoints, vec![Endpoint::new(Protocol::Udp, 53, 5353)]);
        assert_eq!(endpoints[0].name, "udp53");
    }

    #[test]
    fn test_blank_list() {
        assert!(parse_endpoints("", Protocol::Tcp).unwrap().is_empty());
        assert!(parse_endpoints("   ", Protocol::Udp).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_entries() {
        for bad in ["22", "22:22:22", "a:22", "22:", "22:22,", "70000:1"] {
            assert!(
                matches!(
                    parse_endpoints(bad, Protocol::Tcp),
                    Err(CpiError::InvalidEndpoint { .. })
                ),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_same_port_different_protocols() {
        let network = NetworkConfig {
            tcp_endpoints: "53:53".to_string(),
            udp_endpoints: "53:53".to_string(),
            ..Default::default()
        };
        let endpoints = endpoints_for(&network).unwrap();
        let names: Vec<&str> = endpoints.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["tcp53", "udp53"]);
    }

    #[test]
    fn test_duplicate_endpoint_rejected() {
        let network = NetworkConfig {
            tcp_endpoints: "22:22, 22:2222".to_string(),
            ..Default::default()
        };
        assert!(matches!(endpoints_for(&network), Err(CpiError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_endpoint_wire_format() {
        let value = serde_json::to_value(Endpoint::new(Protocol::Tcp, 22, 2222)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "endpointName": "tcp22",
                "publicPort": "22",
                "privatePort": "2222",
                "protocol": "tcp",
                "enableDirectServerReturn": "False",
            })
        );
    }
}
