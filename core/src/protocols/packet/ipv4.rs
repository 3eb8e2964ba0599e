//! IPv4 packet header.

use crate::protocols::packet::{read_header, PacketParseError};
use crate::utils::types::*;

use std::net::Ipv4Addr;

use anyhow::{bail, Result};

/// An IPv4 header snapshot.
///
/// Address fields stay in network byte order as received; IPv4 options are
/// skipped during parsing and not retained.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Ipv4Header {
    version_ihl: u8,
    dscp_ecn: u8,
    total_length: u16be,
    identification: u16be,
    flags_to_fragment_offset: u16be,
    time_to_live: u8,
    protocol: u8,
    header_checksum: u16be,
    src_addr: u32be,
    dst_addr: u32be,
}

impl Ipv4Header {
    /// Returns the IP protocol version.
    #[inline]
    pub fn version(&self) -> u8 {
        (self.version_ihl & 0xf0) >> 4
    }

    /// Returns the header length measured in 32-bit words (IHL).
    #[inline]
    pub fn ihl(&self) -> u8 {
        self.version_ihl & 0x0f
    }

    /// Returns the differentiated services code point (DSCP).
    #[inline]
    pub fn dscp(&self) -> u8 {
        self.dscp_ecn >> 2
    }

    /// Returns the explicit congestion notification (ECN).
    #[inline]
    pub fn ecn(&self) -> u8 {
        self.dscp_ecn & 0x03
    }

    /// Returns the total length of the packet in bytes, including the header
    /// and data.
    #[inline]
    pub fn total_length(&self) -> u16 {
        self.total_length.into()
    }

    /// Returns the identification field.
    #[inline]
    pub fn identification(&self) -> u16 {
        self.identification.into()
    }

    /// Returns the 16-bit field containing the 3-bit flags and 13-bit
    /// fragment offset.
    #[inline]
    pub fn flags_to_fragment_offset(&self) -> u16 {
        self.flags_to_fragment_offset.into()
    }

    /// Returns the header checksum.
    #[inline]
    pub fn header_checksum(&self) -> u16 {
        self.header_checksum.into()
    }

    /// Returns the time to live.
    #[inline]
    pub fn time_to_live(&self) -> u8 {
        self.time_to_live
    }

    /// Returns the encapsulated protocol identifier.
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Returns the source address.
    #[inline]
    pub fn src_addr(&self) -> Ipv4Addr {
        self.src_addr.into()
    }

    /// Returns the destination address.
    #[inline]
    pub fn dst_addr(&self) -> Ipv4Addr {
        self.dst_addr.into()
    }
}

/// Parses the IPv4 header at `offset` into `frame`, returning the header
/// snapshot and the layer-4 offset (past any options).
pub(crate) fn parse(frame: &[u8], offset: usize) -> Result<(Ipv4Header, usize)> {
    let header: Ipv4Header = read_header(frame, offset)?;
    if header.version() != 4 {
        bail!(PacketParseError::InvalidProtocol);
    }
    let header_len = header.ihl() as usize * 4;
    if header_len < std::mem::size_of::<Ipv4Header>() {
        bail!(PacketParseError::InvalidRead);
    }
    Ok((header, offset + header_len))
}
