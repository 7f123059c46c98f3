use crate::packet_id::PacketId;
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use std::fmt::{Debug, Formatter};
use anyhow::bail;

bitflags! {
    #[derive(PartialEq, Eq, Copy, Clone, Debug)]
    pub struct PacketFlags: u8 {
        const HIGH_PRIORITY = 0b0000_0001;
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Priority {
    /// fire and forget
    Low,
    /// acknowledged by the receiver, re-sent until the acknowledgement arrives
    High,
}

impl Priority {
    fn flags(&self) -> PacketFlags {
        match self {
            Priority::Low => PacketFlags::empty(),
            Priority::High => PacketFlags::HIGH_PRIORITY,
        }
    }
}

/// Fixed-size header preceding every packet on the wire, all numbers in network byte order:
///
/// ```ascii
///  0: packet id (u32)
///  4: offset of this fragment in the message (u16)
///  6: total message size (u16)
///  8: payload size of this fragment (u16) - 0xFFFF marks a pure ACK without payload
/// 10: flags (u8)
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct PacketHeader {
    pub packet_id: PacketId,
    pub offset: u16,
    pub total_size: u16,
    pub payload_size: u16,
    pub flags: PacketFlags,
}

impl Debug for PacketHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_ack() {
            write!(f, "ACK{{{:?}@{}}}", self.packet_id, self.offset)
        }
        else {
            write!(f, "PCKT{{{:?}@{}+{}/{}{}}}",
                   self.packet_id, self.offset, self.payload_size, self.total_size,
                   if self.priority() == Priority::High { "!" } else { "" })
        }
    }
}

impl PacketHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + 3 * size_of::<u16>() + size_of::<u8>();
    pub const ACK_PAYLOAD_SIZE: u16 = u16::MAX;

    pub fn new(packet_id: PacketId, offset: u16, total_size: u16, payload_size: u16, priority: Priority) -> PacketHeader {
        PacketHeader {
            packet_id,
            offset,
            total_size,
            payload_size,
            flags: priority.flags(),
        }
    }

    /// An ACK references the acknowledged packet by its id and offset. ACKs themselves are
    ///  never acknowledged.
    pub fn new_ack(packet_id: PacketId, offset: u16) -> PacketHeader {
        PacketHeader {
            packet_id,
            offset,
            total_size: 0,
            payload_size: Self::ACK_PAYLOAD_SIZE,
            flags: PacketFlags::empty(),
        }
    }

    pub fn is_ack(&self) -> bool {
        self.payload_size == Self::ACK_PAYLOAD_SIZE
    }

    pub fn priority(&self) -> Priority {
        if self.flags.contains(PacketFlags::HIGH_PRIORITY) {
            Priority::High
        }
        else {
            Priority::Low
        }
    }

    /// A message that fits into a single packet needs no reassembly
    pub fn is_complete_message(&self) -> bool {
        !self.is_ack() && self.offset == 0 && self.payload_size == self.total_size
    }

    /// number of payload bytes following the header on the wire
    pub fn wire_payload_len(&self) -> usize {
        if self.is_ack() {
            0
        }
        else {
            self.payload_size as usize
        }
    }

    pub fn serialized_len_with_payload(&self) -> usize {
        Self::SERIALIZED_LEN + self.wire_payload_len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.packet_id.to_raw());
        buf.put_u16(self.offset);
        buf.put_u16(self.total_size);
        buf.put_u16(self.payload_size);
        buf.put_u8(self.flags.bits());
    }

    /// Parses and validates a header. A header that can not be part of a well-formed message is
    ///  rejected here, before any state is created for it.
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        let packet_id = PacketId::from_raw(buf.try_get_u32()?);
        let offset = buf.try_get_u16()?;
        let total_size = buf.try_get_u16()?;
        let payload_size = buf.try_get_u16()?;
        let raw_flags = buf.try_get_u8()?;

        let flags = match PacketFlags::from_bits(raw_flags) {
            Some(flags) => flags,
            None => bail!("unsupported packet flags {:x}", raw_flags),
        };

        if packet_id.is_placeholder() {
            bail!("packet id 0 is reserved and never sent on the wire");
        }

        let result = PacketHeader {
            packet_id,
            offset,
            total_size,
            payload_size,
            flags,
        };

        if result.is_ack() {
            if result.priority() == Priority::High {
                bail!("ACK packets can not have high priority");
            }
        }
        else if offset as usize + payload_size as usize > total_size as usize {
            bail!("fragment {}+{} exceeds declared message size {}", offset, payload_size, total_size);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::low(PacketHeader::new(PacketId::from_raw(0x01020304), 5, 9, 4, Priority::Low), vec![1,2,3,4, 0,5, 0,9, 0,4, 0])]
    #[case::high(PacketHeader::new(PacketId::from_raw(7), 0, 2, 2, Priority::High), vec![0,0,0,7, 0,0, 0,2, 0,2, 1])]
    #[case::ack(PacketHeader::new_ack(PacketId::from_raw(7), 1400), vec![0,0,0,7, 5,120, 0,0, 255,255, 0])]
    fn test_ser(#[case] header: PacketHeader, #[case] expected: Vec<u8>) {
        let mut buf = Vec::new();
        header.ser(&mut buf);
        assert_eq!(buf, expected);
        assert_eq!(buf.len(), PacketHeader::SERIALIZED_LEN);

        let mut b: &[u8] = &buf;
        let deser = PacketHeader::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, header);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated(vec![0,0,0,7, 0,0, 0,2, 0,2])]
    #[case::placeholder_id(vec![0,0,0,0, 0,0, 0,2, 0,2, 0])]
    #[case::unknown_flags(vec![0,0,0,7, 0,0, 0,2, 0,2, 2])]
    #[case::exceeds_total(vec![0,0,0,7, 0,1, 0,2, 0,2, 0])]
    #[case::high_priority_ack(vec![0,0,0,7, 0,0, 0,0, 255,255, 1])]
    fn test_deser_invalid(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(PacketHeader::deser(&mut b).is_err());
    }

    #[rstest]
    #[case::single(0, 4, 4, true)]
    #[case::empty_message(0, 0, 0, true)]
    #[case::first_fragment(0, 4, 2, false)]
    #[case::last_fragment(2, 4, 2, false)]
    fn test_is_complete_message(#[case] offset: u16, #[case] total: u16, #[case] payload: u16, #[case] expected: bool) {
        let header = PacketHeader::new(PacketId::from_raw(1), offset, total, payload, Priority::Low);
        assert_eq!(header.is_complete_message(), expected);
    }

    #[test]
    fn test_ack_is_never_complete_message() {
        assert!(!PacketHeader::new_ack(PacketId::from_raw(3), 0).is_complete_message());
        assert_eq!(PacketHeader::new_ack(PacketId::from_raw(3), 0).wire_payload_len(), 0);
    }
}
