use crate::connection::ClientId;
use crate::id_generator::IdGenerator;
use crate::message_header::MessageHeader;
use crate::packet::Packet;
use crate::packet_entry::PacketEntry;
use crate::packet_header::{PacketHeader, Priority};
use crate::packet_id::PacketId;
use crate::safe_converter::PrecheckedCast;
use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;

/// Prefixes an application payload with its message header, producing the buffer that is
///  fragmented for sending and handed to the dispatcher after reassembly
pub fn encode_message(header: &MessageHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MessageHeader::SERIALIZED_LEN + payload.len());
    header.ser(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Splits a message into packets of at most `max_payload` payload bytes each.
///
/// The fragments of a multi-packet message share a freshly generated packet id. A message that
///  fits into a single packet keeps the placeholder id, its id is assigned when it is merged
///  into a datagram. An empty message still produces one (empty) packet.
pub fn split_message(
    client: ClientId,
    message: Bytes,
    priority: Priority,
    max_payload: usize,
    id_generator: &dyn IdGenerator,
    now: Instant,
) -> anyhow::Result<Vec<PacketEntry>> {
    if message.len() > u16::MAX as usize {
        bail!("message of {} bytes exceeds the maximum message size of {} bytes", message.len(), u16::MAX);
    }
    if max_payload == 0 || max_payload >= PacketHeader::ACK_PAYLOAD_SIZE as usize {
        bail!("invalid fragment payload size {}", max_payload);
    }

    let total_size: u16 = message.len().prechecked_cast();

    if message.len() <= max_payload {
        let packet = Packet::new_fragment(PacketId::PLACEHOLDER, 0, total_size, priority, message);
        return Ok(vec![PacketEntry::new(client, packet, now)]);
    }

    let packet_id = id_generator.next_packet_id();
    let mut result = Vec::with_capacity(message.len().div_ceil(max_payload));
    let mut offset = 0;
    while offset < message.len() {
        let end = usize::min(offset + max_payload, message.len());
        let packet = Packet::new_fragment(packet_id, offset.prechecked_cast(), total_size, priority, message.slice(offset..end));
        result.push(PacketEntry::new(client, packet, now));
        offset = end;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id_generator::MockIdGenerator;
    use rstest::rstest;

    const CLIENT: ClientId = ClientId::from_raw(1);
    const M: usize = 10;

    fn id_generator(expected_calls: usize) -> MockIdGenerator {
        let mut id_generator = MockIdGenerator::new();
        id_generator.expect_next_packet_id()
            .times(expected_calls)
            .return_const(PacketId::from_raw(77));
        id_generator
    }

    #[rstest]
    #[case::empty(0, vec![(0, 0)])]
    #[case::one(1, vec![(0, 1)])]
    #[case::below_max(M-1, vec![(0, 9)])]
    #[case::max(M, vec![(0, 10)])]
    #[case::above_max(M+1, vec![(0, 10), (10, 1)])]
    #[case::five_max(5*M, vec![(0, 10), (10, 10), (20, 10), (30, 10), (40, 10)])]
    #[case::five_max_plus(5*M+7, vec![(0, 10), (10, 10), (20, 10), (30, 10), (40, 10), (50, 7)])]
    fn test_split(#[case] len: usize, #[case] expected: Vec<(u16, u16)>) {
        let message = Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>());
        let is_multi_packet = expected.len() > 1;
        let id_generator = id_generator(if is_multi_packet { 1 } else { 0 });

        let now = Instant::now();
        let entries = split_message(CLIENT, message.clone(), Priority::High, M, &id_generator, now).unwrap();

        let actual = entries.iter()
            .map(|e| (e.packet.header.offset, e.packet.header.payload_size))
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);

        for entry in &entries {
            assert_eq!(entry.client, CLIENT);
            assert_eq!(entry.timestamp, now);
            assert_eq!(entry.packet.header.total_size as usize, len);
            assert!(entry.requires_ack());
            assert_eq!(entry.packet.packet_id().is_placeholder(), !is_multi_packet);
            if is_multi_packet {
                assert_eq!(entry.packet.packet_id(), PacketId::from_raw(77));
            }
        }

        let joined = entries.iter()
            .flat_map(|e| e.packet.payload.iter().cloned())
            .collect::<Vec<_>>();
        assert_eq!(joined, message.to_vec());
    }

    #[test]
    fn test_split_rejects_oversized_message() {
        let message = Bytes::from(vec![0u8; u16::MAX as usize + 1]);
        let id_generator = id_generator(0);
        assert!(split_message(CLIENT, message, Priority::Low, M, &id_generator, Instant::now()).is_err());
    }

    #[test]
    fn test_split_low_priority() {
        let id_generator = id_generator(1);
        let entries = split_message(CLIENT, Bytes::from_static(b"hello world"), Priority::Low, 4, &id_generator, Instant::now()).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| !e.requires_ack()));
    }

    #[test]
    fn test_encode_message() {
        let buf = encode_message(&MessageHeader { message_type: 2, sequence_number: 5 }, b"xy");
        assert_eq!(buf.as_ref(), &[0, 2, 0, 0, 0, 5, b'x', b'y']);
    }
}
