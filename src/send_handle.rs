use crate::config::TransportConfig;
use crate::connection::ClientId;
use crate::fragmentation::{encode_message, split_message};
use crate::id_generator::IdGenerator;
use crate::message_header::MessageHeader;
use crate::packet_header::Priority;
use crate::send_queue::SendQueue;
use anyhow::bail;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::trace;

/// The application's API for sending messages. It can be cloned and used from any thread: it
///  only enqueues packets, they are put on the wire when the end point flushes its send queues.
#[derive(Clone)]
pub struct SendHandle {
    config: Arc<TransportConfig>,
    send_queue: Arc<SendQueue>,
    id_generator: Arc<dyn IdGenerator>,
}

impl SendHandle {
    pub fn new(config: Arc<TransportConfig>, send_queue: Arc<SendQueue>, id_generator: Arc<dyn IdGenerator>) -> SendHandle {
        SendHandle {
            config,
            send_queue,
            id_generator,
        }
    }

    /// Fragments a message and enqueues its packets for the given client.
    ///
    /// This fails without enqueueing anything if the message is too big, or if the client's send
    ///  queue has no room for all of the message's packets. High-priority messages are
    ///  re-sent until they are acknowledged; low-priority messages are sent once.
    pub fn send_message(&self, client: ClientId, message_type: u16, priority: Priority, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > self.config.max_message_len() {
            bail!("message of type {} has {} bytes, the maximum is {}", message_type, payload.len(), self.config.max_message_len());
        }

        trace!("sending message of type {} with {} bytes to {:?}", message_type, payload.len(), client);

        let sequenced_type = self.config.is_sequenced(message_type)
            .then_some(message_type);
        let priority = match (sequenced_type, priority) {
            (Some(_), Priority::Low) => {
                trace!("message type {} is sequenced - sending with high priority", message_type);
                Priority::High
            }
            _ => priority,
        };

        self.send_queue.push_message(client, sequenced_type, |sequence_number| {
            let message = encode_message(&MessageHeader { message_type, sequence_number }, payload);
            split_message(
                client,
                message,
                priority,
                self.config.max_payload_per_packet(),
                self.id_generator.as_ref(),
                Instant::now(),
            )
        })
    }
}
