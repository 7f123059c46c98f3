use crate::message_header::MessageHeader;
use crate::packet_header::PacketHeader;
use anyhow::bail;
use rustc_hash::FxHashSet;
use std::net::SocketAddr;
use std::time::Duration;

pub struct TransportConfig {
    /// The address the end point's UDP socket is bound to
    pub self_addr: SocketAddr,

    /// This is the maximum size of a UDP payload the transport sends, including the protocol
    ///  version prefix and all packet headers of a merged datagram. Fragmentation ensures that no
    ///  datagram exceeds it, so it should be chosen to avoid IP-level fragmentation.
    ///
    /// With full Ethernet frames and no optional IP headers, the limit is `1500 - 20 - 8 = 1472`
    ///  for IPV4 and `1500 - 40 - 8 = 1452` for IPV6. Some safety margin is advisable.
    pub max_datagram_size: usize,

    /// The maximum number of packets waiting in a single peer's send queue. Sending a message
    ///  that does not fit fails rather than blocking.
    pub send_queue_capacity: usize,

    /// A high-priority packet that was not acknowledged within this time is sent again
    pub max_ack_latency: Duration,

    /// After this many unsuccessful re-sends, a high-priority packet is given up on and counted
    ///  as a delivery failure for its connection
    pub max_retransmissions: u32,

    /// Incomplete messages are discarded if none of their fragments arrived for this long
    pub max_reassembly_age: Duration,

    /// Number of (packet id, offset) pairs per connection that are remembered for discarding
    ///  duplicates. Duplicates arriving after this many newer packets are not detected.
    pub duplicate_history_len: usize,

    /// Sequenced messages arriving more than this far ahead of the next expected sequence number
    ///  are dropped
    pub max_sequencer_gap: u32,

    /// A sequenced channel that has been waiting this long for a missing message gives up on it
    ///  and continues with the messages buffered after it. This should exceed the time a
    ///  high-priority packet spends in retransmission, i.e. `max_ack_latency * max_retransmissions`.
    pub max_sequencer_stall: Duration,

    /// Message types that are delivered in strict send order. Sender and receiver must agree
    ///  on this set.
    pub sequenced_message_types: FxHashSet<u16>,

    /// interval of retransmission and reassembly sweeps in the end point's receive loop
    pub maintenance_interval: Duration,

    /// interval at which the receive loop drains the send queues
    pub flush_interval: Duration,

    /// This is the number of datagram buffers that will be pooled at a given time - buffers in
    ///  excess of this number are discarded when they are returned.
    pub buffer_pool_size: usize,
}

impl TransportConfig {
    /// ipv4 with end-to-end full Ethernet MTU and some headroom for optional headers
    pub fn default_ipv4(self_addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            self_addr,
            max_datagram_size: 1400,
            send_queue_capacity: 4096,
            max_ack_latency: Duration::from_millis(500),
            max_retransmissions: 10,
            max_reassembly_age: Duration::from_secs(10),
            duplicate_history_len: 64,
            max_sequencer_gap: 1024,
            max_sequencer_stall: Duration::from_secs(10),
            sequenced_message_types: FxHashSet::default(),
            maintenance_interval: Duration::from_millis(100),
            flush_interval: Duration::from_millis(1),
            buffer_pool_size: 256,
        }
    }

    /// Fragment payload per packet, i.e. what is left of a datagram after the protocol version
    ///  and a single packet header
    pub fn max_payload_per_packet(&self) -> usize {
        self.max_datagram_size - 1 - PacketHeader::SERIALIZED_LEN
    }

    /// Largest application payload accepted for sending: the total message size is a u16 on the
    ///  wire, and it includes the message header
    pub fn max_message_len(&self) -> usize {
        u16::MAX as usize - MessageHeader::SERIALIZED_LEN
    }

    pub fn is_sequenced(&self, message_type: u16) -> bool {
        self.sequenced_message_types.contains(&message_type)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_datagram_size < 1 + PacketHeader::SERIALIZED_LEN + 1 {
            bail!("datagram size {} leaves no room for payload", self.max_datagram_size);
        }
        if self.max_datagram_size > u16::MAX as usize {
            bail!("datagram size {} exceeds the UDP maximum", self.max_datagram_size);
        }
        if self.send_queue_capacity == 0 {
            bail!("send queue capacity must be positive");
        }
        if self.duplicate_history_len == 0 {
            bail!("duplicate history length must be positive");
        }
        if self.max_ack_latency.is_zero() {
            bail!("max ack latency must be positive");
        }
        if self.max_sequencer_stall.is_zero() {
            bail!("max sequencer stall must be positive");
        }
        if self.maintenance_interval.is_zero() || self.flush_interval.is_zero() {
            bail!("maintenance and flush intervals must be positive");
        }

        Ok(())
    }
}
