//! Flow keys and key extraction.

use std::net::{IpAddr, Ipv4Addr};

/// IP protocol numbers commonly seen in flow keys.
pub mod proto {
    /// Transmission Control Protocol
    pub const TCP: u8 = 6;
    /// User Datagram Protocol
    pub const UDP: u8 = 17;
}

/// Identity of a flow: the classic 5-tuple.
///
/// Keys compare field by field. Direction-agnostic matching is obtained by
/// classifying on [`FlowKey::canonical`] rather than on the raw key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    /// Source address
    pub src_ip: IpAddr,
    /// Destination address
    pub dst_ip: IpAddr,
    /// Source port (0 for portless protocols)
    pub src_port: u16,
    /// Destination port (0 for portless protocols)
    pub dst_port: u16,
    /// IP protocol number
    pub protocol: u8,
}

impl FlowKey {
    /// Create a new flow key.
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16, protocol: u8) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// TCP key between two IPv4 endpoints.
    pub fn tcp_v4(src: [u8; 4], src_port: u16, dst: [u8; 4], dst_port: u16) -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::from(src)),
            src_port,
            IpAddr::V4(Ipv4Addr::from(dst)),
            dst_port,
            proto::TCP,
        )
    }

    /// The same flow seen from the other direction.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
        }
    }

    /// Direction-agnostic form: the lower (address, port) endpoint comes first.
    pub fn canonical(&self) -> Self {
        if (self.src_ip, self.src_port) <= (self.dst_ip, self.dst_port) {
            *self
        } else {
            self.reversed()
        }
    }
}

/// Derives a flow key from a packet.
///
/// Returning `None` marks the packet as unclassifiable; it is dropped before
/// reaching the flow table.
pub trait KeyExtractor<P> {
    /// Extract the key of `packet`.
    fn extract(&self, packet: &P) -> Option<FlowKey>;
}

impl<P, F> KeyExtractor<P> for F
where
    F: Fn(&P) -> Option<FlowKey>,
{
    fn extract(&self, packet: &P) -> Option<FlowKey> {
        self(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed() {
        let key = FlowKey::tcp_v4([10, 0, 0, 1], 40000, [10, 0, 0, 2], 80);
        let rev = key.reversed();

        assert_eq!(rev.src_port, 80);
        assert_eq!(rev.dst_port, 40000);
        assert_eq!(rev.reversed(), key);
    }

    #[test]
    fn test_canonical_is_direction_agnostic() {
        let key = FlowKey::tcp_v4([10, 0, 0, 9], 40000, [10, 0, 0, 2], 80);

        assert_ne!(key, key.reversed());
        assert_eq!(key.canonical(), key.reversed().canonical());
        assert_eq!(key.canonical().src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_closure_extractor() {
        let extractor = |p: &(u16, u16)| {
            if p.0 == 0 {
                None
            } else {
                Some(FlowKey::tcp_v4([1, 1, 1, 1], p.0, [2, 2, 2, 2], p.1))
            }
        };

        assert!(extractor.extract(&(0, 80)).is_none());
        assert_eq!(extractor.extract(&(1234, 80)).map(|k| k.src_port), Some(1234));
    }
}
