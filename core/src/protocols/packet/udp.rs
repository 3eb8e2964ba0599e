//! UDP packet header.

use crate::protocols::packet::read_header;
use crate::utils::types::*;

use anyhow::Result;

/// UDP assigned protocol number.
pub const UDP_PROTOCOL: u8 = 17;

/// Fixed UDP header length in bytes.
pub const UDP_HEADER_LEN: usize = 8;

/// A UDP header snapshot. Port fields stay in network byte order as received.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct UdpHeader {
    src_port: u16be,
    dst_port: u16be,
    length: u16be,
    checksum: u16be,
}

impl UdpHeader {
    /// Returns the sending port.
    #[inline]
    pub fn src_port(&self) -> u16 {
        self.src_port.into()
    }

    /// Returns the receiving port.
    #[inline]
    pub fn dst_port(&self) -> u16 {
        self.dst_port.into()
    }

    /// Returns the length of the datagram (both header and payload) in bytes.
    #[inline]
    pub fn length(&self) -> u16 {
        self.length.into()
    }

    /// Returns the UDP checksum.
    #[inline]
    pub fn checksum(&self) -> u16 {
        self.checksum.into()
    }
}

/// Parses the UDP header at `offset` into `frame`, returning the header
/// snapshot and the payload offset.
pub(crate) fn parse(frame: &[u8], offset: usize) -> Result<(UdpHeader, usize)> {
    let header: UdpHeader = read_header(frame, offset)?;
    Ok((header, offset + UDP_HEADER_LEN))
}
