use crate::packet_id::PacketId;
use crate::sequencer::Sequencer;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;
use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Identifies a peer for the lifetime of its connection. Ids are assigned by the connection table
///  and never reused by the same end point.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClientId(u32);

impl ClientId {
    pub const fn from_raw(value: u32) -> ClientId {
        ClientId(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }
}
impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Debug for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// A ring of the most recently received (packet id, offset) pairs.
///
/// This is a heuristic with a bounded guarantee: a duplicate is detected only while its original
///  is among the last `len` packets received from the peer.
pub struct DuplicateHistory {
    entries: Vec<Option<(PacketId, u16)>>,
    position: usize,
}

impl DuplicateHistory {
    pub fn new(len: usize) -> DuplicateHistory {
        DuplicateHistory {
            entries: vec![None; len],
            position: 0,
        }
    }

    /// Returns `true` if the pair was seen before. The pair is recorded in either case, evicting
    ///  the oldest entry.
    pub fn check_and_record(&mut self, packet_id: PacketId, offset: u16) -> bool {
        let key = Some((packet_id, offset));
        let is_duplicate = self.entries.contains(&key);

        self.entries[self.position] = key;
        self.position = (self.position + 1) % self.entries.len();

        is_duplicate
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub duplicates_dropped: u64,
    pub acks_received: u64,
    pub messages_delivered: u64,
    pub packets_sent: u64,
    pub datagrams_sent: u64,
    /// datagrams the socket failed to send
    pub send_failures: u64,
    pub retransmissions: u64,
    /// high-priority packets that were given up on after exhausting their retransmissions
    pub delivery_failures: u64,
}

pub struct Connection {
    pub client_id: ClientId,
    pub addr: SocketAddr,
    pub history: DuplicateHistory,
    pub last_receive: Instant,
    pub heartbeat_count: u64,
    pub last_heartbeat: Option<Instant>,
    /// smoothed round-trip time, based on ACKs for high-priority packets
    pub srtt: Option<Duration>,
    pub stats: ConnectionStats,
    pub sequencer: Sequencer<Bytes>,
}

impl Connection {
    fn new(client_id: ClientId, addr: SocketAddr, history_len: usize, max_sequencer_gap: u32, now: Instant) -> Connection {
        Connection {
            client_id,
            addr,
            history: DuplicateHistory::new(history_len),
            last_receive: now,
            heartbeat_count: 0,
            last_heartbeat: None,
            srtt: None,
            stats: Default::default(),
            sequencer: Sequencer::new(max_sequencer_gap),
        }
    }

    pub fn on_rtt_sample(&mut self, sample: Duration) {
        self.srtt = Some(match self.srtt {
            None => sample,
            Some(srtt) => (srtt * 7 + sample) / 8,
        });
        trace!("RTT sample for {:?}: {:?}, smoothed {:?}", self.client_id, sample, self.srtt);
    }
}

/// All peers the end point exchanges packets with, addressable by socket address and client id
pub struct ConnectionTable {
    by_addr: FxHashMap<SocketAddr, ClientId>,
    connections: FxHashMap<ClientId, Connection>,
    next_client_id: u32,
    history_len: usize,
    max_sequencer_gap: u32,
}

impl ConnectionTable {
    pub fn new(history_len: usize, max_sequencer_gap: u32) -> ConnectionTable {
        ConnectionTable {
            by_addr: Default::default(),
            connections: Default::default(),
            next_client_id: 1,
            history_len,
            max_sequencer_gap,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn client_id(&self, addr: &SocketAddr) -> Option<ClientId> {
        self.by_addr.get(addr).cloned()
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Connection> {
        self.connections.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut Connection> {
        self.connections.get_mut(&client_id)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn get_or_create(&mut self, addr: SocketAddr, now: Instant) -> &mut Connection {
        let client_id = match self.by_addr.entry(addr) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                let client_id = ClientId(self.next_client_id);
                self.next_client_id += 1;
                debug!("new connection {:?} for {:?}", client_id, addr);
                e.insert(client_id);
                client_id
            }
        };

        let history_len = self.history_len;
        let max_sequencer_gap = self.max_sequencer_gap;
        self.connections
            .entry(client_id)
            .or_insert_with(|| Connection::new(client_id, addr, history_len, max_sequencer_gap, now))
    }

    /// returns `false` if there is no such connection
    pub fn mark_heartbeat(&mut self, client_id: ClientId, now: Instant) -> bool {
        match self.connections.get_mut(&client_id) {
            Some(conn) => {
                conn.heartbeat_count += 1;
                conn.last_heartbeat = Some(now);
                true
            }
            None => false,
        }
    }

    /// A connection is stale if nothing was received from it since `since`. Unknown connections
    ///  are considered stale.
    pub fn is_stale(&self, client_id: ClientId, since: Instant) -> bool {
        match self.connections.get(&client_id) {
            Some(conn) => conn.last_receive < since,
            None => true,
        }
    }

    pub fn stale_clients(&self, since: Instant) -> Vec<ClientId> {
        let mut result = self.connections.values()
            .filter(|conn| conn.last_receive < since)
            .map(|conn| conn.client_id)
            .collect::<Vec<_>>();
        result.sort();
        result
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<Connection> {
        let removed = self.connections.remove(&client_id)?;
        self.by_addr.remove(&removed.addr);
        debug!("removed connection {:?} for {:?}", client_id, removed.addr);
        Some(removed)
    }
}
