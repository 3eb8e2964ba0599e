//! Ethernet frame header.

use crate::protocols::packet::{read_header, PacketParseError};
use crate::utils::types::*;

use anyhow::{bail, Result};
use pnet::datalink::MacAddr;

/// IPv4 EtherType.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const VLAN_802_1Q: u16 = 0x8100;
const VLAN_802_1AD: u16 = 0x88a8;

const TAG_SIZE: usize = 4;
const HDR_SIZE: usize = 14;

/// Fixed portion of an Ethernet header.
///
/// On networks that support virtual LANs, the frame may carry a 802.1Q tag
/// after the source MAC address; `parse` resolves the encapsulated EtherType
/// through a single tag. Double-tagged frames (QinQ) are not supported.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct EthernetHeader {
    dst: MacAddr,
    src: MacAddr,
    ether_type: u16be,
}

impl EthernetHeader {
    /// Returns the destination MAC address.
    #[inline]
    pub fn dst(&self) -> MacAddr {
        self.dst
    }

    /// Returns the source MAC address.
    #[inline]
    pub fn src(&self) -> MacAddr {
        self.src
    }

    /// Returns the EtherType field as it appears on the wire; for tagged
    /// frames this is the tag protocol identifier, not the payload type.
    #[inline]
    pub fn ether_type(&self) -> u16 {
        self.ether_type.into()
    }
}

/// 802.1Q tag control information and next EtherType.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct Dot1q {
    #[allow(dead_code)]
    tci: u16be,
    ether_type: u16be,
}

/// Parses the Ethernet header at the start of `frame`, returning the header
/// snapshot, the effective (post-VLAN) EtherType, and the layer-3 offset.
pub(crate) fn parse(frame: &[u8]) -> Result<(EthernetHeader, u16, usize)> {
    let header: EthernetHeader = read_header(frame, 0)?;
    match header.ether_type() {
        VLAN_802_1Q => {
            let tag: Dot1q = read_header(frame, HDR_SIZE)?;
            Ok((header, tag.ether_type.into(), HDR_SIZE + TAG_SIZE))
        }
        // QinQ unsupported
        VLAN_802_1AD => bail!(PacketParseError::InvalidProtocol),
        ether_type => Ok((header, ether_type, HDR_SIZE)),
    }
}
