//! Wrapper types for packet fields kept in network byte order.
//!
//! Adapted from [Capsule primitive wrapper types](https://docs.rs/capsule/0.1.5/capsule/packets/types/index.html).
//! Header snapshots store these as received off the wire; conversion to host
//! order happens at the use site.

use std::net::Ipv4Addr;

/// 16-bit unsigned integer in big-endian order.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C, packed)]
pub struct u16be(pub u16);

impl From<u16> for u16be {
    fn from(item: u16) -> Self {
        u16be(u16::to_be(item))
    }
}

impl From<u16be> for u16 {
    fn from(item: u16be) -> Self {
        u16::from_be(item.0)
    }
}

// -------------------------------------------------------

/// 32-bit unsigned integer in big-endian order.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C, packed)]
pub struct u32be(pub u32);

impl From<u32> for u32be {
    fn from(item: u32) -> Self {
        u32be(u32::to_be(item))
    }
}

impl From<u32be> for u32 {
    fn from(item: u32be) -> Self {
        u32::from_be(item.0)
    }
}

impl From<Ipv4Addr> for u32be {
    fn from(item: Ipv4Addr) -> Self {
        u32be::from(u32::from(item))
    }
}

impl From<u32be> for Ipv4Addr {
    fn from(item: u32be) -> Self {
        Ipv4Addr::from(u32::from(item))
    }
}
