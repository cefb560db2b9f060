//! 48-bit link-layer addresses.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr},
    sync::atomic::{AtomicU64, Ordering},
};

/// Largest value representable in 48 bits.
const MAX: u64 = (1 << 48) - 1;

/// A 48-bit link-layer address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 6]);

impl Address {
    /// The all-zero address, used when the sender does not specify a source.
    pub const UNSPECIFIED: Self = Self([0; 6]);

    /// The broadcast address (`ff:ff:ff:ff:ff:ff`).
    pub const BROADCAST: Self = Self([0xff; 6]);

    /// Create an address from its raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Map an IPv4 multicast group to its link-layer address (`01:00:5e` followed by the low 23
    /// bits of the group).
    pub fn multicast_v4(group: Ipv4Addr) -> Self {
        let octets = group.octets();
        Self([0x01, 0x00, 0x5e, octets[1] & 0x7f, octets[2], octets[3]])
    }

    /// Map an IPv6 multicast group to its link-layer address (`33:33` followed by the low 32
    /// bits of the group).
    pub fn multicast_v6(group: Ipv6Addr) -> Self {
        let octets = group.octets();
        Self([0x33, 0x33, octets[12], octets[13], octets[14], octets[15]])
    }

    /// Returns the raw bytes of the address.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// Returns true if the group bit is set (this includes the broadcast address).
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 == 0x01
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Hands out unique unicast addresses in increasing order, starting at `00:00:00:00:00:01`.
#[derive(Debug, Default)]
pub struct Allocator {
    next: AtomicU64,
}

impl Allocator {
    /// Allocate the next address.
    ///
    /// # Panics
    ///
    /// Panics if the 48-bit space is exhausted.
    pub fn allocate(&self) -> Address {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        assert!(id <= MAX, "address space exhausted");
        let bytes = id.to_be_bytes();
        let mut address = [0u8; 6];
        address.copy_from_slice(&bytes[2..]);
        Address(address)
    }
}
