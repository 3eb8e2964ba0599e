//! Types for parsing the packet-level protocols the monitor consumes.
//!
//! The structure of this module is adapted from
//! [capsule::packets](https://docs.rs/capsule/0.1.5/capsule/packets/index.html) and
//! [pnet::packet](https://docs.rs/pnet/latest/pnet/packet/index.html). Unlike a
//! borrowing parser, every header type here is an owned snapshot: the flow
//! registry stores copies of the Ethernet, IPv4 and UDP headers for each
//! discovered flow, with multi-byte fields kept in network byte order as
//! received.

pub mod ethernet;
pub mod ipv4;
pub mod udp;

use self::ethernet::{EthernetHeader, ETHERTYPE_IPV4};
use self::ipv4::Ipv4Header;
use self::udp::{UdpHeader, UDP_HEADER_LEN, UDP_PROTOCOL};

use anyhow::{bail, Result};
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum PacketParseError {
    #[error("Invalid protocol")]
    InvalidProtocol,

    #[error("Invalid data read")]
    InvalidRead,
}

/// Reads a fixed-size header snapshot at `offset` into `data`.
///
/// Headers are `repr(C, packed)`, so the read must be unaligned; bounds are
/// checked first.
#[inline]
pub(crate) fn read_header<T: Copy>(data: &[u8], offset: usize) -> Result<T> {
    let size = std::mem::size_of::<T>();
    if data.len() < offset + size {
        bail!(PacketParseError::InvalidRead);
    }
    Ok(unsafe { std::ptr::read_unaligned(data.as_ptr().add(offset) as *const T) })
}

/// Header snapshots for one UDP-in-IPv4 Ethernet frame.
#[derive(Debug, Clone, Copy)]
pub struct UdpFrame {
    /// Ethernet header (fixed portion).
    pub eth: EthernetHeader,
    /// IPv4 header (fixed portion; options are skipped, not parsed).
    pub ipv4: Ipv4Header,
    /// UDP header.
    pub udp: UdpHeader,
    /// Offset from the start of the frame to the UDP payload.
    pub payload_offset: usize,
    /// UDP payload length in bytes, as claimed by the UDP header.
    pub payload_len: usize,
}

impl UdpFrame {
    /// Parses an Ethernet frame carrying a UDP/IPv4 datagram. Frames carrying
    /// anything else fail with an error the capture loop skips over.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let (eth, ether_type, l3_offset) = ethernet::parse(frame)?;
        if ether_type != ETHERTYPE_IPV4 {
            bail!(PacketParseError::InvalidProtocol);
        }
        let (ipv4, l4_offset) = ipv4::parse(frame, l3_offset)?;
        if ipv4.protocol() != UDP_PROTOCOL {
            bail!(PacketParseError::InvalidProtocol);
        }
        let (udp, payload_offset) = udp::parse(frame, l4_offset)?;
        let payload_len = (udp.length() as usize).saturating_sub(UDP_HEADER_LEN);
        Ok(UdpFrame {
            eth,
            ipv4,
            udp,
            payload_offset,
            payload_len,
        })
    }

    /// Borrows the UDP payload out of the frame this header set was parsed
    /// from, clamped to the bytes actually captured.
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let start = self.payload_offset.min(frame.len());
        let end = (self.payload_offset + self.payload_len).min(frame.len());
        &frame[start..end]
    }
}

/// Builds a minimal UDP/IPv4 Ethernet frame for exercising the parsers and
/// the flow registry.
#[cfg(test)]
pub(crate) fn build_udp_frame(
    src: (std::net::Ipv4Addr, u16),
    dst: (std::net::Ipv4Addr, u16),
    payload: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(42 + payload.len());
    // Ethernet
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0xaa]); // dst MAC
    frame.extend_from_slice(&[0x02, 0, 0, 0, 0, 0xbb]); // src MAC
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    // IPv4, no options
    let total_len = (20 + 8 + payload.len()) as u16;
    frame.push(0x45);
    frame.push(0x00);
    frame.extend_from_slice(&total_len.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // id, flags/frag
    frame.push(64); // ttl
    frame.push(17); // udp
    frame.extend_from_slice(&[0x00, 0x00]); // checksum
    frame.extend_from_slice(&src.0.octets());
    frame.extend_from_slice(&dst.0.octets());
    // UDP
    let udp_len = (8 + payload.len()) as u16;
    frame.extend_from_slice(&src.1.to_be_bytes());
    frame.extend_from_slice(&dst.1.to_be_bytes());
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]); // checksum
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parses_udp_frame() {
        let frame = build_udp_frame(
            (Ipv4Addr::new(192, 168, 1, 10), 5000),
            (Ipv4Addr::new(239, 1, 1, 1), 4001),
            &[0x47; 188],
        );
        let parsed = UdpFrame::parse(&frame).unwrap();
        assert_eq!(parsed.ipv4.src_addr(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(parsed.ipv4.dst_addr(), Ipv4Addr::new(239, 1, 1, 1));
        assert_eq!(parsed.udp.src_port(), 5000);
        assert_eq!(parsed.udp.dst_port(), 4001);
        assert_eq!(parsed.payload_offset, 42);
        assert_eq!(parsed.payload_len, 188);
        assert_eq!(parsed.payload(&frame), &[0x47; 188][..]);
    }

    #[test]
    fn rejects_non_udp() {
        let mut frame = build_udp_frame(
            (Ipv4Addr::new(10, 0, 0, 1), 1),
            (Ipv4Addr::new(10, 0, 0, 2), 2),
            &[],
        );
        frame[23] = 6; // TCP
        assert!(UdpFrame::parse(&frame).is_err());
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = build_udp_frame(
            (Ipv4Addr::new(10, 0, 0, 1), 1),
            (Ipv4Addr::new(10, 0, 0, 2), 2),
            &[],
        );
        assert!(UdpFrame::parse(&frame[..20]).is_err());
    }

    #[test]
    fn parses_vlan_tagged_frame() {
        let inner = build_udp_frame(
            (Ipv4Addr::new(10, 0, 0, 1), 1000),
            (Ipv4Addr::new(10, 0, 0, 2), 2000),
            &[1, 2, 3, 4],
        );
        let mut frame = Vec::new();
        frame.extend_from_slice(&inner[..12]);
        frame.extend_from_slice(&0x8100u16.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x64]); // TCI, VLAN 100
        frame.extend_from_slice(&inner[12..]); // inner EtherType + payload
        let parsed = UdpFrame::parse(&frame).unwrap();
        assert_eq!(parsed.udp.dst_port(), 2000);
        assert_eq!(parsed.payload(&frame), &[1, 2, 3, 4][..]);
    }
}
