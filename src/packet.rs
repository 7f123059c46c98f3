use crate::packet_header::{PacketHeader, Priority};
use crate::packet_id::PacketId;
use anyhow::bail;
use bytes::{BufMut, Bytes};
use tracing::debug;

/// The first byte of every datagram. A datagram carries one or more packets after that, each
///  self-delimiting through the payload size in its header.
pub const PROTOCOL_VERSION_1: u8 = 0;

/// The smallest wire unit: a header and (unless it is an ACK) a contiguous slice of an
///  application message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl Packet {
    pub fn new_fragment(packet_id: PacketId, offset: u16, total_size: u16, priority: Priority, payload: Bytes) -> Packet {
        debug_assert!(payload.len() < PacketHeader::ACK_PAYLOAD_SIZE as usize, "fragment payload collides with the ACK marker");

        Packet {
            header: PacketHeader::new(packet_id, offset, total_size, payload.len() as u16, priority),
            payload,
        }
    }

    pub fn new_ack(packet_id: PacketId, offset: u16) -> Packet {
        Packet {
            header: PacketHeader::new_ack(packet_id, offset),
            payload: Bytes::new(),
        }
    }

    pub fn packet_id(&self) -> PacketId {
        self.header.packet_id
    }

    pub fn offset(&self) -> u16 {
        self.header.offset
    }

    pub fn priority(&self) -> Priority {
        self.header.priority()
    }

    pub fn serialized_len(&self) -> usize {
        self.header.serialized_len_with_payload()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        self.header.ser(buf);
        buf.put_slice(&self.payload);
    }

    /// parses a single packet from the start of a datagram's remaining bytes, sharing (rather than
    ///  copying) the payload
    pub fn deser(buf: &mut Bytes) -> anyhow::Result<Packet> {
        let header = PacketHeader::deser(buf)?;

        let payload_len = header.wire_payload_len();
        if payload_len > buf.len() {
            bail!("packet {:?} declares {} payload bytes, only {} available", header, payload_len, buf.len());
        }
        let payload = buf.split_to(payload_len);

        Ok(Packet { header, payload })
    }
}

/// Splits a received datagram into its packets.
///
/// A datagram with a wrong protocol version is rejected as a whole. If a packet inside the
///  datagram is malformed, parsing stops there because there is no way to find the start of the
///  next packet - the packets before it are still returned.
pub fn deser_datagram(mut buf: Bytes) -> anyhow::Result<Vec<Packet>> {
    if buf.is_empty() {
        bail!("empty datagram");
    }
    let version = buf[0];
    if version != PROTOCOL_VERSION_1 {
        bail!("unsupported protocol version {}", version);
    }
    let _ = buf.split_to(1);

    let mut result = Vec::new();
    while !buf.is_empty() {
        match Packet::deser(&mut buf) {
            Ok(packet) => result.push(packet),
            Err(e) => {
                debug!("malformed packet after {} valid packets in datagram - dropping the rest: {}", result.len(), e);
                break;
            }
        }
    }

    if result.is_empty() {
        bail!("datagram contains no valid packets");
    }
    Ok(result)
}
