use crate::connection::ClientId;
use crate::packet_entry::{EntryKey, PacketEntry};
use crate::packet_id::PacketId;
use crate::safe_converter::SafeCast;
use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

#[derive(Debug, Eq, PartialEq)]
pub enum Completion {
    /// all fragments are present, this is the reassembled message
    Complete(Bytes),
    /// some fragments are still missing
    Pending,
    /// the fragments contradict each other - the message was dropped with all its fragments
    Discarded,
}

enum Walk {
    Complete,
    Gap,
    Invalid,
}

/// In-flight fragments of incomplete messages, ordered by (client, packet id, offset) so that the
///  fragments of a message can be walked in offset order.
#[derive(Default)]
pub struct ReassemblyIndex {
    entries: BTreeMap<EntryKey, PacketEntry>,
}

impl ReassemblyIndex {
    pub fn new() -> ReassemblyIndex {
        Default::default()
    }

    /// number of buffered fragments
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Registers a received fragment and attempts to complete its message. A packet carrying a
    ///  complete message is returned right away without touching the index.
    pub fn on_fragment(&mut self, entry: PacketEntry) -> Completion {
        if entry.packet.header.is_complete_message() {
            return Completion::Complete(entry.packet.payload);
        }

        let client = entry.client;
        let packet_id = entry.packet.packet_id();
        if self.entries.insert(entry.key(), entry).is_some() {
            trace!("fragment of message {:?} from {:?} was buffered already - replaced", packet_id, client);
        }

        self.try_complete(client, packet_id)
    }

    pub fn try_complete(&mut self, client: ClientId, packet_id: PacketId) -> Completion {
        let start = EntryKey::message_start(client, packet_id);
        let end = EntryKey::message_end(client, packet_id);

        let total_size = match self.entries.get(&start) {
            None => {
                trace!("first fragment of message {:?} from {:?} not received yet", packet_id, client);
                return Completion::Pending;
            }
            Some(first) => first.packet.header.total_size,
        };

        match self.walk(start, end, total_size) {
            Walk::Gap => {
                trace!("message {:?} from {:?} still has gaps", packet_id, client);
                Completion::Pending
            }
            Walk::Invalid => {
                self.remove_message(client, packet_id);
                Completion::Discarded
            }
            Walk::Complete => {
                let mut buf = BytesMut::with_capacity(total_size.safe_cast());
                for key in self.message_keys(client, packet_id) {
                    if let Some(entry) = self.entries.remove(&key) {
                        buf.extend_from_slice(&entry.packet.payload);
                    }
                }
                debug_assert_eq!(buf.len(), <u16 as SafeCast<usize>>::safe_cast(total_size));
                debug!("reassembled message {:?} from {:?} with {} bytes", packet_id, client, buf.len());
                Completion::Complete(buf.freeze())
            }
        }
    }

    /// checks that the fragments tile [0, total_size) without overlap and agree on the total size
    fn walk(&self, start: EntryKey, end: EntryKey, total_size: u16) -> Walk {
        let total_size: usize = total_size.safe_cast();
        let mut expected_offset = 0usize;
        let mut has_gap = false;

        for (key, entry) in self.entries.range(start..=end) {
            let header = &entry.packet.header;
            let offset: usize = header.offset.safe_cast();
            let fragment_end = offset + <u16 as SafeCast<usize>>::safe_cast(header.payload_size);

            let declared_size: usize = header.total_size.safe_cast();
            if declared_size != total_size {
                warn!("fragment {:?} from {:?} declares message size {} while the first fragment declares {} - discarding message", key.packet_id, key.client, header.total_size, total_size);
                return Walk::Invalid;
            }
            if fragment_end > total_size {
                warn!("fragment {:?}@{} from {:?} ends at {}, after the declared message size {} - discarding message", key.packet_id, offset, key.client, fragment_end, total_size);
                return Walk::Invalid;
            }
            if offset < expected_offset {
                warn!("fragment {:?}@{} from {:?} overlaps its predecessor ending at {} - discarding message", key.packet_id, offset, key.client, expected_offset);
                return Walk::Invalid;
            }
            if offset > expected_offset {
                has_gap = true;
            }
            expected_offset = fragment_end;
        }

        if has_gap || expected_offset < total_size {
            Walk::Gap
        }
        else {
            Walk::Complete
        }
    }

    fn message_keys(&self, client: ClientId, packet_id: PacketId) -> Vec<EntryKey> {
        self.entries
            .range(EntryKey::message_start(client, packet_id)..=EntryKey::message_end(client, packet_id))
            .map(|(k, _)| *k)
            .collect()
    }

    fn remove_message(&mut self, client: ClientId, packet_id: PacketId) -> usize {
        let keys = self.message_keys(client, packet_id);
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }

    /// Discards incomplete messages that received no fragment for longer than `max_age`. Returns
    ///  the number of discarded messages.
    ///
    /// Age is tracked per message rather than per fragment: a message that is still receiving
    ///  fragments is kept even if its older fragments exceed `max_age` individually.
    pub fn sweep(&mut self, now: Instant, max_age: Duration) -> usize {
        let mut newest_per_message: BTreeMap<(ClientId, PacketId), Instant> = BTreeMap::new();
        for (key, entry) in &self.entries {
            let newest = newest_per_message
                .entry((key.client, key.packet_id))
                .or_insert(entry.timestamp);
            if entry.timestamp > *newest {
                *newest = entry.timestamp;
            }
        }

        let mut num_discarded = 0;
        for ((client, packet_id), newest) in newest_per_message {
            if now.saturating_duration_since(newest) > max_age {
                let num_fragments = self.remove_message(client, packet_id);
                debug!("discarding incomplete message {:?} from {:?} with {} fragments: timed out", packet_id, client, num_fragments);
                num_discarded += 1;
            }
        }
        num_discarded
    }

    /// discards all in-flight fragments of a client, e.g. after a disconnect
    pub fn remove_client(&mut self, client: ClientId) -> usize {
        let keys = self.entries
            .range(EntryKey::message_start(client, PacketId::MIN)..=EntryKey::message_end(client, PacketId::MAX))
            .map(|(k, _)| *k)
            .collect::<Vec<_>>();
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }
}
