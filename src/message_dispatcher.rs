use crate::connection::ClientId;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;

/// The application's side of the receive path: it is called with every completely received
///  message, in order for sequenced message types. The buffer excludes the message header.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, client: ClientId, sender_addr: SocketAddr, message_type: u16, msg_buf: &[u8]);
}
