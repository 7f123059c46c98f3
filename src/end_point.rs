use crate::config::TransportConfig;
use crate::connection::{ClientId, ConnectionStats};
use crate::id_generator::{IdGenerator, RandomIdGenerator};
use crate::message_dispatcher::MessageDispatcher;
use crate::packet_header::Priority;
use crate::send_handle::SendHandle;
use crate::send_queue::SendQueue;
use crate::transport_core::TransportCore;
use bytes::Bytes;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, span, Instrument, Level};
use uuid::Uuid;

/// big enough for any UDP payload
const RECV_BUF_SIZE: usize = 1 << 16;

/// EndPoint is the place where all other parts of the protocol come together: It owns the UDP
///  socket and the transport's state, dispatching incoming datagrams and flushing outgoing
///  packets.
///
/// It can be driven in two ways:
/// * `process()` handles the datagrams that are already waiting, for at most a given time budget,
///    and then runs maintenance and flushes the send queues. It does not wait for datagrams to
///    arrive. This is for applications that interleave network processing with other work on
///    the same task, e.g. a game loop, and it allows connection lifecycle calls between polls.
/// * `recv_loop()` does the same in an endless loop driven by timers.
///
/// Messages can be sent from any thread through a `SendHandle`.
pub struct EndPoint {
    socket: Arc<UdpSocket>,
    config: Arc<TransportConfig>,
    core: TransportCore,
    send_handle: SendHandle,
    recv_buf: Vec<u8>,
    next_maintenance: Instant,
}

impl EndPoint {
    pub async fn new(config: TransportConfig, message_dispatcher: Arc<dyn MessageDispatcher>) -> anyhow::Result<EndPoint> {
        Self::with_id_generator(config, message_dispatcher, Arc::new(RandomIdGenerator::new())).await
    }

    pub async fn with_id_generator(
        config: TransportConfig,
        message_dispatcher: Arc<dyn MessageDispatcher>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> anyhow::Result<EndPoint> {
        config.validate()?;
        let config = Arc::new(config);

        let socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        info!("bound socket to {:?}", socket.local_addr()?);

        let send_queue = Arc::new(SendQueue::new(config.send_queue_capacity));
        let core = TransportCore::new(
            config.clone(),
            send_queue.clone(),
            id_generator.clone(),
            Arc::new(socket.clone()),
            message_dispatcher,
        );

        Ok(EndPoint {
            socket,
            send_handle: SendHandle::new(config.clone(), send_queue, id_generator),
            next_maintenance: Instant::now() + config.maintenance_interval,
            config,
            core,
            recv_buf: vec![0; RECV_BUF_SIZE],
        })
    }

    pub fn self_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn send_handle(&self) -> SendHandle {
        self.send_handle.clone()
    }

    /// Returns the client id for a peer, creating a connection if there is none
    pub fn connect(&mut self, addr: SocketAddr) -> ClientId {
        self.core.connect(addr, Instant::now())
    }

    pub fn send_message(&self, client: ClientId, message_type: u16, priority: Priority, payload: &[u8]) -> anyhow::Result<()> {
        self.send_handle.send_message(client, message_type, priority, payload)
    }

    pub fn mark_heartbeat(&mut self, client: ClientId) -> bool {
        self.core.mark_heartbeat(client, Instant::now())
    }

    /// `true` if nothing was received from the client since `since`, or if there is no such client
    pub fn is_stale(&self, client: ClientId, since: Instant) -> bool {
        self.core.is_stale(client, since)
    }

    pub fn stale_clients(&self, since: Instant) -> Vec<ClientId> {
        self.core.connections().stale_clients(since)
    }

    pub fn remove_connection(&mut self, client: ClientId) -> bool {
        self.core.remove_connection(client)
    }

    pub fn stats(&self, client: ClientId) -> Option<ConnectionStats> {
        self.core.stats(client).cloned()
    }

    /// Handles datagrams that are waiting on the socket until there are none left or `budget` is
    ///  used up, then runs maintenance if it is due and sends everything that was enqueued.
    ///
    /// This returns right away if no datagrams are waiting.
    pub async fn process(&mut self, budget: Duration) {
        self.core.flush(Instant::now()).await;

        // gives the I/O driver a chance to register readiness for datagrams that arrived
        tokio::task::yield_now().await;

        let deadline = Instant::now() + budget;
        while Instant::now() < deadline {
            match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok(received) => self.on_received(Ok(received)).await,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("socket error: {}", e);
                    break;
                }
            }
        }

        let now = Instant::now();
        if now >= self.next_maintenance {
            self.core.maintenance(now).await;
            self.next_maintenance = now + self.config.maintenance_interval;
        }
        self.core.flush(now).await;
    }

    pub async fn recv_loop(&mut self) {
        info!("starting receive loop");

        let mut maintenance = time::interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut flush = time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut self.recv_buf) => self.on_received(received).await,
                _ = maintenance.tick() => self.core.maintenance(Instant::now()).await,
                _ = flush.tick() => self.core.flush(Instant::now()).await,
            }
        }
    }

    async fn on_received(&mut self, received: std::io::Result<(usize, SocketAddr)>) {
        let (num_read, from) = match received {
            Ok(x) => x,
            Err(e) => {
                error!("socket error: {}", e);
                return;
            }
        };

        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "datagram_received", ?correlation_id);

        let buf = Bytes::copy_from_slice(&self.recv_buf[..num_read]);
        self.core.on_datagram(from, buf, Instant::now())
            .instrument(span)
            .await;
    }
}
