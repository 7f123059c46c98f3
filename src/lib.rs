//! A reliable packet transport on top of UDP, as it is used underneath a game client / server
//!  protocol. It takes care of
//! * fragmenting application messages into packets that fit a configured datagram size, and
//!    reassembling them on the receiving side,
//! * delivering messages of designated types strictly in send order,
//! * acknowledging and re-sending high-priority packets,
//! * rejecting duplicate, malformed and malicious packets,
//! * merging small packets into shared datagrams.
//!
//! Dispatching received messages to game logic, and the meaning of message types, are left to the
//!  application (see `MessageDispatcher`).
//!
//! ## Design
//!
//! * There is no handshake: a connection is created implicitly by the first valid datagram from
//!    a peer address, or explicitly by the sending side (`EndPoint::connect`). Cleanup is the
//!    application's decision, based on staleness (`EndPoint::is_stale`).
//! * A single task owns the protocol state (`TransportCore`): connections, incomplete messages
//!    and packets waiting for ACKs. The only shared structures are the per-peer send queues and
//!    the packet id generator, so application threads can send without touching the network
//!    task (`SendHandle`).
//! * Low-priority packets are sent once. High-priority packets are acknowledged by the receiver
//!    and re-sent if the ACK does not arrive in time, up to a configured limit.
//! * Message types can be configured as *sequenced*: their messages carry a per-(peer, type)
//!    sequence number, and the receiver delivers them in that order, buffering messages that
//!    arrive early and dropping those that arrive late.
//! * Duplicate detection is based on a ring of recently received (packet id, offset) pairs per
//!    peer. This is a bounded guarantee: a duplicate arriving after the ring has wrapped is not
//!    detected, which is harmless for sequenced types and tolerated for all others.
//!
//! ## Wire format
//!
//! All numbers are in network byte order. A datagram is a protocol version byte followed by one or
//!  more packets:
//!
//! ```ascii
//! 0: protocol version (u8) - 0
//! 1: packets
//! ```
//!
//! Every packet starts with a header:
//!
//! ```ascii
//!  0: packet id (u32) - random, shared by all fragments of a message. 0 is reserved.
//!  4: offset of the fragment in the message (u16)
//!  6: total message size (u16)
//!  8: fragment payload size (u16) - 0xFFFF marks an ACK, which has no payload
//! 10: flags (u8): bit 0 = high priority, all other bits must be 0
//! 11: payload
//! ```
//!
//! An ACK carries the packet id and offset of the packet it acknowledges, and a total size of 0.
//!
//! The reassembled message starts with a message header, followed by the application payload:
//!
//! ```ascii
//! 0: message type (u16)
//! 2: sequence number (u32) - for sequenced message types, 0 otherwise
//! 6: payload
//! ```

pub mod ack_tracker;
mod buffer_pool;
pub mod config;
pub mod connection;
pub mod end_point;
pub mod fragmentation;
pub mod id_generator;
mod merge;
pub mod message_dispatcher;
pub mod message_header;
pub mod packet;
pub mod packet_entry;
pub mod packet_header;
pub mod packet_id;
pub mod reassembly;
pub mod safe_converter;
pub mod send_handle;
pub mod send_queue;
pub mod send_socket;
pub mod sequencer;
pub mod transport_core;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
