use crate::connection::ClientId;
use crate::packet_entry::{EntryKey, PacketEntry};
use crate::packet_id::PacketId;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// The result of a retransmission scan
#[derive(Debug, Default)]
pub struct RetransmitSweep {
    /// entries to be sent again, with their timestamp reset and retransmission count incremented
    pub resend: Vec<PacketEntry>,
    /// entries that exceeded the retransmission limit and were given up on
    pub exhausted: Vec<PacketEntry>,
}

/// High-priority packets that were sent and are waiting for their ACK
#[derive(Default)]
pub struct AckTracker {
    entries: BTreeMap<EntryKey, PacketEntry>,
}

impl AckTracker {
    pub fn new() -> AckTracker {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    /// registers an entry right after it was put on the wire
    pub fn register(&mut self, mut entry: PacketEntry, now: Instant) {
        debug_assert!(entry.requires_ack());
        debug_assert!(!entry.packet.packet_id().is_placeholder());

        entry.timestamp = now;
        trace!("awaiting ACK for {:?}", entry.key());
        self.entries.insert(entry.key(), entry);
    }

    /// Removes the entry matching an ACK. Returns the round-trip time if the ACK matched a
    ///  packet that was sent exactly once: for retransmitted packets, it is unknown which send
    ///  the ACK belongs to.
    ///
    /// ACKs without a matching entry (duplicate ACKs, ACKs for packets given up on, or forged
    ///  ACKs) are ignored.
    pub fn on_ack(&mut self, client: ClientId, packet_id: PacketId, offset: u16, now: Instant) -> Option<Duration> {
        let key = EntryKey { client, packet_id, offset };
        match self.entries.remove(&key) {
            Some(entry) => {
                trace!("received ACK for {:?}", key);
                if entry.retransmissions == 0 {
                    Some(now.saturating_duration_since(entry.timestamp))
                }
                else {
                    None
                }
            }
            None => {
                trace!("received ACK for {:?} without a pending entry - ignoring", key);
                None
            }
        }
    }

    /// Removes all entries that were not acknowledged within `max_latency`. Each of them is
    ///  either returned for re-sending (timestamp reset to `now`), or, if it was re-sent
    ///  `max_retransmissions` times already, as exhausted.
    pub fn collect_expired(&mut self, now: Instant, max_latency: Duration, max_retransmissions: u32) -> RetransmitSweep {
        let expired_keys = self.entries.iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.timestamp) > max_latency)
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();

        let mut result = RetransmitSweep::default();
        for key in expired_keys {
            let Some(mut entry) = self.entries.remove(&key) else {
                continue;
            };

            if entry.retransmissions >= max_retransmissions {
                result.exhausted.push(entry);
            }
            else {
                entry.retransmissions += 1;
                entry.timestamp = now;
                result.resend.push(entry);
            }
        }

        if !result.resend.is_empty() || !result.exhausted.is_empty() {
            debug!("retransmission scan: {} packets to re-send, {} given up", result.resend.len(), result.exhausted.len());
        }
        result
    }

    /// discards all entries for a client, e.g. after a disconnect
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
