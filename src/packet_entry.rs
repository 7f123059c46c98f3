use crate::connection::ClientId;
use crate::packet::Packet;
use crate::packet_header::Priority;
use crate::packet_id::PacketId;
use tokio::time::Instant;

/// Composite key of the ordered packet indices. The derived ordering is lexicographic in field
///  order, so all fragments of one message are adjacent and sorted by offset.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct EntryKey {
    pub client: ClientId,
    pub packet_id: PacketId,
    pub offset: u16,
}

impl EntryKey {
    /// the smallest key for a given message, i.e. the key of its first fragment
    pub fn message_start(client: ClientId, packet_id: PacketId) -> EntryKey {
        EntryKey { client, packet_id, offset: 0 }
    }

    pub fn message_end(client: ClientId, packet_id: PacketId) -> EntryKey {
        EntryKey { client, packet_id, offset: u16::MAX }
    }
}

/// A packet together with the bookkeeping the transport needs while holding it: the peer it
///  belongs to, and when it was last touched (received, or sent for packets awaiting an ACK).
///
/// An entry always has exactly one owner: a send queue, the ack tracker or the reassembly index.
///  It is moved between them rather than shared.
#[derive(Clone, Debug)]
pub struct PacketEntry {
    pub client: ClientId,
    pub packet: Packet,
    pub timestamp: Instant,
    pub retransmissions: u32,
}

impl PacketEntry {
    pub fn new(client: ClientId, packet: Packet, now: Instant) -> PacketEntry {
        PacketEntry {
            client,
            packet,
            timestamp: now,
            retransmissions: 0,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey {
            client: self.client,
            packet_id: self.packet.packet_id(),
            offset: self.packet.offset(),
        }
    }

    pub fn requires_ack(&self) -> bool {
        !self.packet.header.is_ack() && self.packet.priority() == Priority::High
    }

    pub fn wire_len(&self) -> usize {
        self.packet.serialized_len()
    }
}
