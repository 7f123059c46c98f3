use bytes::{Buf, BufMut};

/// Prefix of every application message, i.e. the first bytes of a (reassembled) message buffer.
///
/// ```ascii
/// 0: message type (u16)
/// 2: sequence number (u32) - only meaningful for sequenced message types, 0 otherwise
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u16,
    pub sequence_number: u32,
}

impl MessageHeader {
    pub const SERIALIZED_LEN: usize = size_of::<u16>() + size_of::<u32>();

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.message_type);
        buf.put_u32(self.sequence_number);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Self> {
        let message_type = buf.try_get_u16()?;
        let sequence_number = buf.try_get_u32()?;
        Ok(MessageHeader {
            message_type,
            sequence_number,
        })
    }
}
