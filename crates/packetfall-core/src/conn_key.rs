//! Direction-independent flow identity.
//!
//! Both directions of a conversation must map to the same key so that the
//! agent's per-connection rate limiter treats request and response traffic as
//! one flow. Endpoints are ordered by the textual form of their IP address,
//! with the port breaking ties between two endpoints on the same host.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;

use crate::packet::Protocol;

/// One side of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: Option<u16>) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{port}", self.ip),
            None => write!(f, "{}", self.ip),
        }
    }
}

/// Canonical identity of a flow, independent of packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub protocol: Protocol,
    pub lower: Endpoint,
    pub upper: Endpoint,
}

impl ConnectionKey {
    /// Normalize a (source, destination) pair. Swapping the arguments yields
    /// an identical key.
    pub fn new(protocol: Protocol, a: Endpoint, b: Endpoint) -> Self {
        let (lower, upper) = match compare_endpoints(&a, &b) {
            Ordering::Greater => (b, a),
            _ => (a, b),
        };
        Self {
            protocol,
            lower,
            upper,
        }
    }
}

fn compare_endpoints(a: &Endpoint, b: &Endpoint) -> Ordering {
    if a.ip == b.ip {
        return a.port.cmp(&b.port);
    }
    a.ip.to_string()
        .cmp(&b.ip.to_string())
        .then_with(|| a.port.cmp(&b.port))
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.lower, self.upper, self.protocol)
    }
}
