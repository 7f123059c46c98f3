use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing.
///
/// Send failures are reported to the caller, which logs and counts them. High-priority packets
///  are re-sent by the retransmission scan regardless.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl SendSocket for Arc<UdpSocket> {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending datagram of {} bytes to {:?}", packet_buf.len(), to);
        self.send_to(packet_buf, to).await?;
        Ok(())
    }
}
