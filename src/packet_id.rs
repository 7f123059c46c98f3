use std::fmt::{Debug, Display, Formatter};

/// Identifies all fragments of one application message, together with the sending client.
///
/// The raw value 0 is reserved as a placeholder for packets that get their id assigned when they
///  are actually put on the wire (single-packet messages and ACKs are merged into datagrams and
///  need no id before that).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PacketId(u32);

impl Display for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Debug for PacketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl PacketId {
    pub const PLACEHOLDER: PacketId = PacketId(0);
    pub const MIN: PacketId = PacketId(0);
    pub const MAX: PacketId = PacketId(u32::MAX);

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }
}
