use crate::buffer_pool::BufferPool;
use crate::id_generator::IdGenerator;
use crate::packet::PROTOCOL_VERSION_1;
use crate::packet_entry::PacketEntry;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// A datagram ready for sending, and the entries of the packets it contains
pub struct MergedDatagram {
    pub buf: BytesMut,
    pub entries: Vec<PacketEntry>,
}

/// Takes packets from the front of a destination's queue and merges them into a datagram of at
///  most `max_datagram_size` bytes. Packets are taken in FIFO order, and merging stops at the
///  first packet that does not fit. Returns `None` if the queue is empty.
///
/// Packets with the placeholder id get their random id here, on finalization.
pub fn next_datagram(
    queue: &mut VecDeque<PacketEntry>,
    max_datagram_size: usize,
    id_generator: &dyn IdGenerator,
    buffer_pool: &BufferPool,
) -> Option<MergedDatagram> {
    // a packet that can never fit is dropped rather than blocking the queue
    while let Some(front) = queue.front() {
        if 1 + front.wire_len() <= max_datagram_size {
            break;
        }
        warn!("packet {:?} of {} bytes does not fit into a datagram of {} bytes - dropping", front.key(), front.wire_len(), max_datagram_size);
        queue.pop_front();
    }
    if queue.is_empty() {
        return None;
    }

    let mut buf = buffer_pool.get_from_pool();
    buf.put_u8(PROTOCOL_VERSION_1);

    let mut entries = Vec::new();
    while let Some(front) = queue.front() {
        if buf.len() + front.wire_len() > max_datagram_size {
            break;
        }
        let Some(mut entry) = queue.pop_front() else {
            break;
        };
        if entry.packet.packet_id().is_placeholder() {
            entry.packet.header.packet_id = id_generator.next_packet_id();
        }
        entry.packet.ser(&mut buf);
        entries.push(entry);
    }

    trace!("merged {} packets into a datagram of {} bytes", entries.len(), buf.len());
    Some(MergedDatagram { buf, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientId;
    use crate::id_generator::MockIdGenerator;
    use crate::packet::{deser_datagram, Packet};
    use crate::packet_header::{PacketHeader, Priority};
    use crate::packet_id::PacketId;
    use bytes::Bytes;
    use rstest::rstest;
    use tokio::time::Instant;

    fn entry(packet_id: u32, payload_len: usize) -> PacketEntry {
        PacketEntry::new(
            ClientId::from_raw(1),
            Packet::new_fragment(PacketId::from_raw(packet_id), 0, payload_len as u16, Priority::Low, Bytes::from(vec![7u8; payload_len])),
            Instant::now(),
        )
    }

    fn no_ids() -> MockIdGenerator {
        let mut id_generator = MockIdGenerator::new();
        id_generator.expect_next_packet_id().never();
        id_generator
    }

    #[rstest]
    #[case::single(1, vec![1])]
    #[case::exactly_one_datagram(10, vec![10])]
    #[case::one_more(11, vec![10, 1])]
    #[case::many(35, vec![10, 10, 10, 5])]
    fn test_packing(#[case] num_packets: usize, #[case] expected: Vec<usize>) {
        // every packet is 20 bytes on the wire, and ten of them fit into a datagram
        let packet_wire_len = PacketHeader::SERIALIZED_LEN + 9;
        let max_datagram_size = 1 + 10 * packet_wire_len;

        let mut queue = (1..=num_packets as u32).map(|id| entry(id, 9)).collect::<VecDeque<_>>();
        let id_generator = no_ids();
        let pool = BufferPool::new(max_datagram_size, 4);

        let mut actual = Vec::new();
        let mut next_expected_id = 1;
        while let Some(datagram) = next_datagram(&mut queue, max_datagram_size, &id_generator, &pool) {
            assert!(datagram.buf.len() <= max_datagram_size);
            assert_eq!(datagram.buf.len(), 1 + datagram.entries.len() * packet_wire_len);

            // FIFO order is preserved
            for packet in deser_datagram(datagram.buf.clone().freeze()).unwrap() {
                assert_eq!(packet.packet_id(), PacketId::from_raw(next_expected_id));
                next_expected_id += 1;
            }

            actual.push(datagram.entries.len());
            pool.return_to_pool(datagram.buf);
        }

        assert_eq!(actual, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stops_at_first_packet_that_does_not_fit() {
        let max_datagram_size = 1 + 2 * PacketHeader::SERIALIZED_LEN + 10;
        let mut queue = VecDeque::from(vec![entry(1, 5), entry(2, 6), entry(3, 0)]);
        let pool = BufferPool::new(max_datagram_size, 4);
        let id_generator = no_ids();

        let first = next_datagram(&mut queue, max_datagram_size, &id_generator, &pool).unwrap();
        assert_eq!(first.entries.len(), 1);
        let second = next_datagram(&mut queue, max_datagram_size, &id_generator, &pool).unwrap();
        assert_eq!(second.entries.len(), 2);
        assert!(next_datagram(&mut queue, max_datagram_size, &id_generator, &pool).is_none());
    }

    #[test]
    fn test_assigns_placeholder_ids() {
        let mut id_generator = MockIdGenerator::new();
        id_generator.expect_next_packet_id()
            .times(2)
            .returning({
                let mut next = 100;
                move || { next += 1; PacketId::from_raw(next) }
            });

        let mut queue = VecDeque::from(vec![
            entry(0, 1),
            entry(55, 1),
            PacketEntry::new(ClientId::from_raw(1), Packet::new_ack(PacketId::from_raw(66), 3), Instant::now()),
            entry(0, 1),
        ]);
        let pool = BufferPool::new(100, 4);

        let datagram = next_datagram(&mut queue, 100, &id_generator, &pool).unwrap();
        let ids = datagram.entries.iter().map(|e| e.packet.packet_id().to_raw()).collect::<Vec<_>>();
        assert_eq!(ids, vec![101, 55, 66, 102]);

        let parsed = deser_datagram(datagram.buf.freeze()).unwrap();
        assert_eq!(parsed.iter().map(|p| p.packet_id().to_raw()).collect::<Vec<_>>(), vec![101, 55, 66, 102]);
    }

    #[test]
    fn test_drops_packet_that_never_fits() {
        let mut queue = VecDeque::from(vec![entry(1, 50), entry(2, 1)]);
        let pool = BufferPool::new(30, 4);
        let datagram = next_datagram(&mut queue, 30, &no_ids(), &pool).unwrap();
        assert_eq!(datagram.entries.len(), 1);
        assert_eq!(datagram.entries[0].packet.packet_id(), PacketId::from_raw(2));
    }
}
