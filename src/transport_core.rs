use crate::ack_tracker::AckTracker;
use crate::buffer_pool::BufferPool;
use crate::config::TransportConfig;
use crate::connection::{ClientId, ConnectionStats, ConnectionTable};
use crate::id_generator::IdGenerator;
use crate::merge::next_datagram;
use crate::message_dispatcher::MessageDispatcher;
use crate::message_header::MessageHeader;
use crate::packet::{deser_datagram, Packet};
use crate::packet_entry::PacketEntry;
use crate::packet_header::Priority;
use crate::reassembly::{Completion, ReassemblyIndex};
use crate::send_queue::SendQueue;
use crate::send_socket::SendSocket;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

/// The transport's protocol state, owned by the single network task that receives datagrams,
///  flushes the send queues and runs periodic maintenance. Only the send queue and the id
///  generator are shared with other threads.
pub struct TransportCore {
    config: Arc<TransportConfig>,
    connections: ConnectionTable,
    reassembly: ReassemblyIndex,
    ack_tracker: AckTracker,
    send_queue: Arc<SendQueue>,
    id_generator: Arc<dyn IdGenerator>,
    send_socket: Arc<dyn SendSocket>,
    message_dispatcher: Arc<dyn MessageDispatcher>,
    buffer_pool: BufferPool,
}

impl TransportCore {
    pub fn new(
        config: Arc<TransportConfig>,
        send_queue: Arc<SendQueue>,
        id_generator: Arc<dyn IdGenerator>,
        send_socket: Arc<dyn SendSocket>,
        message_dispatcher: Arc<dyn MessageDispatcher>,
    ) -> TransportCore {
        TransportCore {
            connections: ConnectionTable::new(config.duplicate_history_len, config.max_sequencer_gap),
            reassembly: ReassemblyIndex::new(),
            ack_tracker: AckTracker::new(),
            send_queue,
            id_generator,
            send_socket,
            message_dispatcher,
            buffer_pool: BufferPool::new(config.max_datagram_size, config.buffer_pool_size),
            config,
        }
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    /// Returns the client id for a peer address, creating the connection if necessary. This is
    ///  how the sending side of a conversation gets a client id before it ever received anything.
    pub fn connect(&mut self, addr: SocketAddr, now: Instant) -> ClientId {
        self.connections.get_or_create(addr, now).client_id
    }

    pub async fn on_datagram(&mut self, from: SocketAddr, buf: Bytes, now: Instant) {
        trace!("received datagram from {:?}: {:?}", from, buf.as_ref());

        let packets = match deser_datagram(buf) {
            Ok(packets) => packets,
            Err(e) => {
                debug!("dropping datagram from {:?}: {}", from, e);
                return;
            }
        };

        let client = self.connections.get_or_create(from, now).client_id;
        for packet in packets {
            self.on_packet(client, from, packet, now).await;
        }
    }

    async fn on_packet(&mut self, client: ClientId, from: SocketAddr, packet: Packet, now: Instant) {
        let Some(conn) = self.connections.get_mut(client) else {
            return;
        };
        conn.last_receive = now;
        conn.stats.packets_received += 1;
        conn.stats.bytes_received += packet.serialized_len() as u64;

        let packet_id = packet.packet_id();
        let offset = packet.offset();

        if packet.header.is_ack() {
            conn.stats.acks_received += 1;
            if let Some(rtt) = self.ack_tracker.on_ack(client, packet_id, offset, now) {
                conn.on_rtt_sample(rtt);
            }
            return;
        }

        if packet.priority() == Priority::High {
            // duplicates are acknowledged as well: the duplicate may be a retransmission
            //  caused by a lost ACK
            trace!("enqueueing ACK for {:?}@{} to {:?}", packet_id, offset, client);
            self.send_queue.push_unbounded(client, [PacketEntry::new(client, Packet::new_ack(packet_id, offset), now)]);
        }

        if conn.history.check_and_record(packet_id, offset) {
            conn.stats.duplicates_dropped += 1;
            debug!("dropping duplicate packet {:?}@{} from {:?}", packet_id, offset, client);
            return;
        }

        match self.reassembly.on_fragment(PacketEntry::new(client, packet, now)) {
            Completion::Complete(message) => self.on_message(client, from, message, now).await,
            Completion::Pending => {}
            Completion::Discarded => {
                warn!("discarded message {:?} from {:?} ({:?}): inconsistent fragments", packet_id, client, from);
            }
        }
    }

    async fn on_message(&mut self, client: ClientId, from: SocketAddr, mut message: Bytes, now: Instant) {
        let header = match MessageHeader::deser(&mut message) {
            Ok(header) => header,
            Err(_) => {
                warn!("message from {:?} ({:?}) is too short for a message header - dropping", client, from);
                return;
            }
        };

        let Some(conn) = self.connections.get_mut(client) else {
            return;
        };

        let deliverable = if self.config.is_sequenced(header.message_type) {
            conn.sequencer.on_message(header.message_type, header.sequence_number, message, now)
        }
        else {
            vec![message]
        };
        conn.stats.messages_delivered += deliverable.len() as u64;

        for payload in deliverable {
            trace!("dispatching message of type {} with {} bytes from {:?}", header.message_type, payload.len(), client);
            self.message_dispatcher.on_message(client, from, header.message_type, &payload).await;
        }
    }

    /// Merges all queued packets into datagrams and sends them. High-priority packets are
    ///  registered for acknowledgement after sending, even if sending failed: the retransmission
    ///  scan treats that like a lost datagram.
    pub async fn flush(&mut self, now: Instant) {
        for (client, mut queue) in self.send_queue.take_all() {
            let Some(addr) = self.connections.get(client).map(|conn| conn.addr) else {
                debug!("dropping {} queued packets for unknown client {:?}", queue.len(), client);
                continue;
            };

            while let Some(datagram) = next_datagram(&mut queue, self.config.max_datagram_size, self.id_generator.as_ref(), &self.buffer_pool) {
                let send_result = self.send_socket.do_send_packet(addr, &datagram.buf).await;

                if let Some(conn) = self.connections.get_mut(client) {
                    match send_result {
                        Ok(()) => {
                            conn.stats.datagrams_sent += 1;
                            conn.stats.packets_sent += datagram.entries.len() as u64;
                        }
                        Err(e) => {
                            error!("error sending datagram to {:?} ({:?}): {}", client, addr, e);
                            conn.stats.send_failures += 1;
                        }
                    }
                }

                for entry in datagram.entries {
                    if entry.requires_ack() {
                        self.ack_tracker.register(entry, now);
                    }
                }
                self.buffer_pool.return_to_pool(datagram.buf);
            }
        }
    }

    /// Periodic work: re-sending unacknowledged packets, discarding incomplete messages that
    ///  timed out, and skipping sequence numbers that sequenced channels waited too long for
    pub async fn maintenance(&mut self, now: Instant) {
        let sweep = self.ack_tracker.collect_expired(now, self.config.max_ack_latency, self.config.max_retransmissions);

        for entry in sweep.exhausted {
            warn!("packet {:?}@{} to {:?} was not acknowledged after {} retransmissions - giving up",
                entry.packet.packet_id(), entry.packet.offset(), entry.client, entry.retransmissions);
            if let Some(conn) = self.connections.get_mut(entry.client) {
                conn.stats.delivery_failures += 1;
            }
        }

        for entry in sweep.resend {
            let client = entry.client;
            match self.connections.get_mut(client) {
                Some(conn) => {
                    trace!("re-sending {:?}@{} to {:?}", entry.packet.packet_id(), entry.packet.offset(), client);
                    conn.stats.retransmissions += 1;
                    self.send_queue.push_unbounded(client, [entry]);
                }
                None => {
                    debug!("dropping retransmission for unknown client {:?}", client);
                }
            }
        }

        let num_discarded = self.reassembly.sweep(now, self.config.max_reassembly_age);
        if num_discarded > 0 {
            debug!("discarded {} incomplete messages", num_discarded);
        }

        let mut deliverable = Vec::new();
        for conn in self.connections.iter_mut() {
            for (message_type, payload) in conn.sequencer.skip_stalled(now, self.config.max_sequencer_stall) {
                conn.stats.messages_delivered += 1;
                deliverable.push((conn.client_id, conn.addr, message_type, payload));
            }
        }
        for (client, from, message_type, payload) in deliverable {
            trace!("dispatching message of type {} with {} bytes from {:?} after skipping a gap", message_type, payload.len(), client);
            self.message_dispatcher.on_message(client, from, message_type, &payload).await;
        }
    }

    pub fn mark_heartbeat(&mut self, client: ClientId, now: Instant) -> bool {
        self.connections.mark_heartbeat(client, now)
    }

    pub fn is_stale(&self, client: ClientId, since: Instant) -> bool {
        self.connections.is_stale(client, since)
    }

    pub fn stats(&self, client: ClientId) -> Option<&ConnectionStats> {
        self.connections.get(client).map(|conn| &conn.stats)
    }

    /// Removes a connection with all its state: packets waiting for ACKs, incomplete messages
    ///  and queued packets. Returns `false` if there was no such connection.
    pub fn remove_connection(&mut self, client: ClientId) -> bool {
        let Some(conn) = self.connections.remove(client) else {
            return false;
        };

        let num_unacked = self.ack_tracker.remove_client(client);
        let num_fragments = self.reassembly.remove_client(client);
        let num_queued = self.send_queue.remove_client(client);
        debug!("removed connection {:?} ({:?}): discarded {} unacknowledged packets, {} fragments and {} queued packets",
            client, conn.addr, num_unacked, num_fragments, num_queued);
        true
    }
}
