use crate::connection::ClientId;
use crate::packet_entry::PacketEntry;
use anyhow::bail;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

#[derive(Default)]
struct SendQueueInner {
    queues: FxHashMap<ClientId, VecDeque<PacketEntry>>,
    next_sequence_numbers: FxHashMap<(ClientId, u16), u32>,
}

/// Per-destination FIFO queues of packets waiting to be merged into datagrams.
///
/// This is the structure shared between application threads (which enqueue messages) and the
///  network task (which drains the queues), so it is guarded by a mutex. Sequence numbers for
///  sequenced message types are assigned under the same lock, so that they are consumed only by
///  messages that were actually enqueued.
pub struct SendQueue {
    inner: Mutex<SendQueueInner>,
    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> SendQueue {
        SendQueue {
            inner: Default::default(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SendQueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues all packets of a message or none of them.
    ///
    /// `sequenced_type` is the message type for sequenced messages: `build` is called with the
    ///  next sequence number for that (client, message type), or with 0 for unsequenced messages.
    ///  The sequence number is consumed only if the packets fit into the queue.
    pub fn push_message<F>(&self, client: ClientId, sequenced_type: Option<u16>, build: F) -> anyhow::Result<()>
    where F: FnOnce(u32) -> anyhow::Result<Vec<PacketEntry>>
    {
        let mut inner = self.lock();

        let sequence_number = match sequenced_type {
            Some(message_type) => inner.next_sequence_numbers
                .get(&(client, message_type))
                .cloned()
                .unwrap_or(0),
            None => 0,
        };

        let entries = build(sequence_number)?;

        let queue_len = inner.queues.get(&client).map(|q| q.len()).unwrap_or(0);
        if queue_len + entries.len() > self.capacity {
            debug!("send queue for {:?} is full: {} queued, {} new packets", client, queue_len, entries.len());
            bail!("send queue for {:?} is full", client);
        }

        if let Some(message_type) = sequenced_type {
            inner.next_sequence_numbers.insert((client, message_type), sequence_number.wrapping_add(1));
        }

        trace!("enqueueing {} packets for {:?}", entries.len(), client);
        inner.queues
            .entry(client)
            .or_default()
            .extend(entries);
        Ok(())
    }

    /// Enqueues packets regardless of the queue's capacity. This is for packets that the
    ///  transport generates itself (ACKs and retransmissions) and that must not be lost to an
    ///  application flooding the queue.
    pub fn push_unbounded(&self, client: ClientId, entries: impl IntoIterator<Item = PacketEntry>) {
        self.lock()
            .queues
            .entry(client)
            .or_default()
            .extend(entries);
    }

    pub fn len(&self, client: ClientId) -> usize {
        self.lock().queues.get(&client).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queues.values().all(|q| q.is_empty())
    }

    /// Takes all queued packets, grouped by destination and ordered by client id. The queues are
    ///  empty afterwards.
    pub fn take_all(&self) -> Vec<(ClientId, VecDeque<PacketEntry>)> {
        let mut result = self.lock()
            .queues
            .drain()
            .filter(|(_, q)| !q.is_empty())
            .collect::<Vec<_>>();
        result.sort_by_key(|(client, _)| *client);
        result
    }

    /// drops all queued packets and sequence numbers for a client
    pub fn remove_client(&self, client: ClientId) -> usize {
        let mut inner = self.lock();
        inner.next_sequence_numbers.retain(|(c, _), _| *c != client);
        inner.queues.remove(&client).map(|q| q.len()).unwrap_or(0)
    }
}
