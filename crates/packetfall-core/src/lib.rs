pub mod conn_key;
pub mod discovery;
pub mod ids;
pub mod net;
pub mod packet;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::net::IpAddr;

    use crate::packet::{PacketRecord, Protocol};

    /// Build a TCP record between two IPv4 hosts.
    pub fn tcp_record(src: &str, src_port: u16, dst: &str, dst_port: u16) -> PacketRecord {
        make_record(Protocol::Tcp, src, Some(src_port), dst, Some(dst_port), 100)
    }

    /// Build a UDP record between two IPv4 hosts.
    pub fn udp_record(src: &str, src_port: u16, dst: &str, dst_port: u16) -> PacketRecord {
        make_record(Protocol::Udp, src, Some(src_port), dst, Some(dst_port), 100)
    }

    /// Build an ICMP record (no ports).
    pub fn icmp_record(src: &str, dst: &str) -> PacketRecord {
        make_record(Protocol::Icmp, src, None, dst, None, 64)
    }

    /// Build an arbitrary record. Panics on unparseable addresses.
    pub fn make_record(
        protocol: Protocol,
        src: &str,
        src_port: Option<u16>,
        dst: &str,
        dst_port: Option<u16>,
        size: u32,
    ) -> PacketRecord {
        PacketRecord {
            protocol,
            src_ip: Some(src.parse::<IpAddr>().unwrap()),
            dst_ip: Some(dst.parse::<IpAddr>().unwrap()),
            src_port,
            dst_port,
            size,
        }
    }

    /// `n` TCP records from distinct client ports toward one server port.
    pub fn tcp_burst(n: usize, dst_port: u16) -> Vec<PacketRecord> {
        (0..n)
            .map(|i| tcp_record("10.0.0.2", 40000 + i as u16, "10.0.0.1", dst_port))
            .collect()
    }
}
