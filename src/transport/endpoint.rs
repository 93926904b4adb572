//! `PhysicalEndPoint`: one bound TCP listener plus a per-peer
//! [`RemoteEndPoint`] map, giving callers a single reliable send/receive
//! surface over an unreliable set of TCP connections (spec §4.2).
//!
//! Every outbound message is tagged with a transport-level `Deliver`/`Ack`
//! header frame carrying its own sequence number, independent of anything
//! layered on top (the multiplexer's name frame, the dispatcher's own
//! correlation frame — spec §6). A per-peer [`super::reconnect`] supervisor
//! redials on loss and drains the peer's [`super::txqueue::TxQueue`] of
//! whatever was still unacknowledged.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    Transmission, TransportError,
    reconnect::{BackoffConfig, ConnectionLost, reconnect_with_backoff},
    tcp,
    txqueue::{SeqNumAllocator, TxQueue},
};
use crate::{address::Address, buffer::MessageBuffer};

const DEFAULT_RECEIVE_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_TX_QUEUE_CAPACITY: usize = 1024;

#[expect(clippy::big_endian_bytes, reason = "wire header is big-endian, matching MessageBuffer's own framing")]
mod header {
    pub const DELIVER: i32 = 1;
    pub const ACK: i32 = 2;

    pub fn encode(kind: i32, seq: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(8);
        out.extend_from_slice(&kind.to_be_bytes());
        out.extend_from_slice(&seq.to_be_bytes());
        out
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<(i32, u32)> {
        let kind = i32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
        let seq = u32::from_be_bytes(bytes.get(4..8)?.try_into().ok()?);
        Some((kind, seq))
    }
}

/// Configuration for a [`PhysicalEndPoint`] (SPEC_FULL §9's
/// `config::EndpointConfig`, merged by `figment` from defaults, a TOML file,
/// and the environment at the binary entry point).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Local address to bind the listener on.
    pub bind_addr: SocketAddr,
    /// Backoff bounds used by every peer's reconnection supervisor.
    pub backoff: BackoffConfig,
    /// Bound on the local receive queue (SPEC_FULL §8).
    pub receive_queue_capacity: usize,
    /// Bound on each peer's pending-send queue, or `None` for unbounded.
    pub tx_queue_capacity: Option<usize>,
}

impl EndpointConfig {
    /// Defaults suitable for most callers, binding on `bind_addr`.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            backoff: BackoffConfig::default(),
            receive_queue_capacity: DEFAULT_RECEIVE_QUEUE_CAPACITY,
            tx_queue_capacity: Some(DEFAULT_TX_QUEUE_CAPACITY),
        }
    }
}

struct Inner {
    local_address: Address,
    local_listen_port: u16,
    remotes: AsyncMutex<HashMap<Address, Arc<RemoteEndPoint>>>,
    receive_tx: mpsc::Sender<Transmission>,
    receive_rx: AsyncMutex<mpsc::Receiver<Transmission>>,
    config: EndpointConfig,
    child_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct RemoteEndPoint {
    address: Address,
    tx_queue: TxQueue,
    seq_alloc: SeqNumAllocator,
    connection: AsyncMutex<Option<OwnedWriteHalf>>,
    lost: ConnectionLost,
    supervisor_started: AtomicBool,
}

impl RemoteEndPoint {
    fn new(address: Address, tx_queue_capacity: Option<usize>) -> Self {
        Self {
            address,
            tx_queue: tx_queue_capacity.map_or_else(TxQueue::new, TxQueue::bounded),
            seq_alloc: SeqNumAllocator::default(),
            connection: AsyncMutex::new(None),
            lost: ConnectionLost::default(),
            supervisor_started: AtomicBool::new(false),
        }
    }
}

/// A bound TCP listener plus the per-peer connections and queues needed to
/// deliver messages reliably over them.
///
/// Cloning is not supported; share one instance behind an [`Arc`] (as
/// [`super::multiplex::Multiplexer`] does).
pub struct PhysicalEndPoint {
    inner: Arc<Inner>,
    listener_task: JoinHandle<()>,
}

impl PhysicalEndPoint {
    /// Bind a listener on `config.bind_addr` and start accepting inbound
    /// connections.
    ///
    /// # Errors
    /// Propagates the bind's I/O error.
    pub async fn bind(config: EndpointConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let local_address = Address::from(local_addr);
        let (receive_tx, receive_rx) = mpsc::channel(config.receive_queue_capacity);
        info!(address = %local_address, "endpoint bound");
        let inner = Arc::new(Inner {
            local_address,
            local_listen_port: local_addr.port(),
            remotes: AsyncMutex::new(HashMap::new()),
            receive_tx,
            receive_rx: AsyncMutex::new(receive_rx),
            config,
            child_tasks: std::sync::Mutex::new(Vec::new()),
        });
        let listener_task = tokio::spawn(accept_loop(inner.clone(), listener));
        Ok(Self { inner, listener_task })
    }

    /// This endpoint's own address, as assigned by the bind.
    #[must_use]
    pub fn local_address(&self) -> &Address { &self.inner.local_address }

    /// Send `transmission`, returning once it has been acknowledged.
    ///
    /// A send to this endpoint's own [`Self::local_address`] bypasses the
    /// transport entirely and is enqueued directly into the local receive
    /// queue (spec §8).
    ///
    /// # Errors
    /// Returns [`TransportError::BackpressureExceeded`] if the peer's send
    /// queue is already at capacity, or [`TransportError::Disposed`] if the
    /// endpoint is torn down before the ack arrives.
    pub async fn send(&self, transmission: Transmission) -> Result<(), TransportError> {
        if transmission.remote_address == self.inner.local_address {
            return self
                .inner
                .receive_tx
                .send(transmission)
                .await
                .map_err(|_| TransportError::Disposed);
        }

        let remote = get_or_create_remote(&self.inner, transmission.remote_address.clone()).await;
        ensure_supervisor(&self.inner, &remote);

        let seq = remote.seq_alloc.next();
        let mut framed = transmission.message;
        framed.push_frame(header::encode(header::DELIVER, seq));
        let Some(ack_rx) = remote.tx_queue.insert(seq, framed.clone()).await else {
            return Err(TransportError::BackpressureExceeded);
        };
        transmit(&remote, &framed).await;
        ack_rx.await.map_err(|_| TransportError::Disposed)
    }

    /// Receive the next message addressed to this endpoint, from a peer or
    /// from ourselves via the local bypass.
    ///
    /// # Errors
    /// Returns [`TransportError::Disposed`] once the endpoint is torn down.
    pub async fn receive(&self) -> Result<Transmission, TransportError> {
        self.inner.receive_rx.lock().await.recv().await.ok_or(TransportError::Disposed)
    }
}

impl Drop for PhysicalEndPoint {
    fn drop(&mut self) {
        self.listener_task.abort();
        let mut tasks = self.inner.child_tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

async fn get_or_create_remote(inner: &Arc<Inner>, address: Address) -> Arc<RemoteEndPoint> {
    let mut guard = inner.remotes.lock().await;
    guard
        .entry(address.clone())
        .or_insert_with(|| Arc::new(RemoteEndPoint::new(address, inner.config.tx_queue_capacity)))
        .clone()
}

fn ensure_supervisor(inner: &Arc<Inner>, remote: &Arc<RemoteEndPoint>) {
    if remote.supervisor_started.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return;
    }
    let inner = inner.clone();
    let remote = remote.clone();
    let handle = tokio::spawn(async move { supervise(inner, remote).await });
    inner_child_tasks_push(&inner, handle);
}

fn inner_child_tasks_push(inner: &Arc<Inner>, handle: JoinHandle<()>) {
    inner.child_tasks.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
}

/// Keeps one peer connected: dials (with backoff) whenever disconnected,
/// installs the new connection, drains `txQueue`, then waits for the next
/// loss (spec §4.2's `ReconnectionManager`).
async fn supervise(inner: Arc<Inner>, remote: Arc<RemoteEndPoint>) {
    loop {
        if remote.connection.lock().await.is_none() {
            let Ok(socket_addr) = remote.address.as_text().parse::<SocketAddr>() else {
                warn!(peer = %remote.address, "peer address has no dialable socket representation; giving up");
                return;
            };
            let local_listen_port = inner.local_listen_port;
            let stream = reconnect_with_backoff(&remote.address.to_string(), inner.config.backoff, move || async move {
                let mut stream = TcpStream::connect(socket_addr).await?;
                tcp::write_handshake(&mut stream, local_listen_port).await?;
                Ok::<TcpStream, TransportError>(stream)
            })
            .await;
            install_connection(&inner, &remote, stream).await;
            for (seq, message) in remote.tx_queue.pending_in_order().await {
                debug!(peer = %remote.address, seq, "resending after reconnect");
                transmit(&remote, &message).await;
            }
        }
        remote.lost.notified().await;
    }
}

async fn install_connection(inner: &Arc<Inner>, remote: &Arc<RemoteEndPoint>, stream: TcpStream) {
    let (read_half, write_half) = stream.into_split();
    *remote.connection.lock().await = Some(write_half);
    let reader_inner = inner.clone();
    let reader_remote = remote.clone();
    let handle = tokio::spawn(async move { read_loop(reader_inner, reader_remote, read_half).await });
    inner_child_tasks_push(inner, handle);
}

async fn read_loop(inner: Arc<Inner>, remote: Arc<RemoteEndPoint>, mut read_half: OwnedReadHalf) {
    loop {
        let mut buffer = match tcp::read_buffer(&mut read_half).await {
            Ok(buffer) => buffer,
            Err(err) => {
                debug!(peer = %remote.address, error = %err, "connection lost");
                *remote.connection.lock().await = None;
                remote.lost.signal();
                return;
            }
        };
        let Ok(header_frame) = buffer.pop_frame() else {
            warn!(peer = %remote.address, "dropping frame with no transport header");
            continue;
        };
        let Some((kind, seq)) = header::decode(header_frame.payload()) else {
            warn!(peer = %remote.address, "dropping frame with malformed transport header");
            continue;
        };
        match kind {
            header::DELIVER => {
                let transmission = Transmission::new(buffer, remote.address.clone());
                if inner.receive_tx.send(transmission).await.is_err() {
                    return;
                }
                send_ack(&remote, seq).await;
            }
            header::ACK => remote.tx_queue.complete(seq).await,
            other => warn!(peer = %remote.address, kind = other, "dropping frame with unknown transport message type"),
        }
    }
}

async fn send_ack(remote: &Arc<RemoteEndPoint>, seq: u32) {
    let mut ack = MessageBuffer::new();
    ack.push_frame(header::encode(header::ACK, seq));
    transmit(remote, &ack).await;
}

/// Best-effort write: failure marks the peer disconnected and signals its
/// supervisor, but never itself returns an error — the caller relies on the
/// ack waiter (for a `Deliver`) or simply drops an unacknowledged `Ack`.
async fn transmit(remote: &Arc<RemoteEndPoint>, framed: &MessageBuffer) {
    let mut guard = remote.connection.lock().await;
    if let Some(writer) = guard.as_mut()
        && let Err(err) = tcp::write_buffer(writer, framed).await
    {
        debug!(peer = %remote.address, error = %err, "write failed, awaiting reconnection");
        *guard = None;
        remote.lost.signal();
    }
}

async fn accept_loop(inner: Arc<Inner>, listener: TcpListener) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let inner = inner.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_inbound(&inner, stream, peer_addr).await {
                warn!(peer = %peer_addr, error = %err, "inbound handshake failed");
            }
        });
    }
}

async fn handle_inbound(inner: &Arc<Inner>, mut stream: TcpStream, peer_addr: SocketAddr) -> Result<(), TransportError> {
    let listen_port = tcp::read_handshake(&mut stream).await?;
    let listen_port = u16::try_from(listen_port).map_err(|_| {
        TransportError::Malformed(crate::buffer::BufferError::MalformedMessage("handshake listen port exceeds u16"))
    })?;
    let peer_socket = SocketAddr::new(peer_addr.ip(), listen_port);
    let peer_address = Address::from(peer_socket);
    info!(peer = %peer_address, "accepted inbound connection");
    let remote = get_or_create_remote(inner, peer_address).await;
    install_connection(inner, &remote, stream).await;
    ensure_supervisor(inner, &remote);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn bound(backoff: BackoffConfig) -> PhysicalEndPoint {
        let bind: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        let mut config = EndpointConfig::new(bind);
        config.backoff = backoff;
        PhysicalEndPoint::bind(config).await.expect("bind")
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig { initial: Duration::from_millis(5), max: Duration::from_millis(20) }
    }

    #[tokio::test]
    async fn local_send_bypasses_the_transport() {
        let endpoint = bound(fast_backoff()).await;
        let local = endpoint.local_address().clone();
        let mut message = MessageBuffer::new();
        message.push_frame(b"hello".to_vec());
        endpoint.send(Transmission::new(message, local)).await.expect("send");
        let received = endpoint.receive().await.expect("receive");
        assert_eq!(received.message.peek_frame().expect("frame").payload(), b"hello");
    }

    #[tokio::test]
    async fn messages_round_trip_between_two_bound_endpoints() {
        let a = bound(fast_backoff()).await;
        let b = bound(fast_backoff()).await;
        let b_address = b.local_address().clone();

        let mut message = MessageBuffer::new();
        message.push_frame(b"payload".to_vec());
        a.send(Transmission::new(message, b_address)).await.expect("send");

        let received = b.receive().await.expect("receive");
        assert_eq!(received.message.peek_frame().expect("frame").payload(), b"payload");
        assert_eq!(received.remote_address, a.local_address().clone());
    }

    #[tokio::test]
    async fn a_second_send_reuses_the_established_connection() {
        let a = bound(fast_backoff()).await;
        let b = bound(fast_backoff()).await;
        let b_address = b.local_address().clone();

        for payload in [b"first".to_vec(), b"second".to_vec()] {
            let mut message = MessageBuffer::new();
            message.push_frame(payload.clone());
            a.send(Transmission::new(message, b_address.clone())).await.expect("send");
            let received = b.receive().await.expect("receive");
            assert_eq!(received.message.peek_frame().expect("frame").payload(), payload.as_slice());
        }
    }
}
