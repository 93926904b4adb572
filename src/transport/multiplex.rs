//! Splits one [`PhysicalEndPoint`] into named logical sub-endpoints (spec
//! §4.3).
//!
//! Per-name queues are weakly referenced: [`Multiplexer`] keeps only a
//! [`Weak`] pointer per name, so a queue is dropped the moment its last
//! [`MultiplexHandle`] is dropped, even if messages for that name are still
//! in flight. A message that arrives for a name with no live handle is
//! silently discarded — spec §4.3's explicitly flagged observable effect,
//! not a bug in this port.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tracing::warn;

use super::{Transmission, TransportError, endpoint::PhysicalEndPoint};
use crate::{address::Address, buffer::BufferError};

/// Default bound on a sub-endpoint's inbound queue (SPEC_FULL §8's
/// backpressure resolution applied uniformly across the transport stack).
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct SubEndpointQueue {
    sender: mpsc::Sender<Transmission>,
}

/// Splits `endpoint` into named sub-endpoints and runs the demultiplexing
/// loop for its lifetime.
pub struct Multiplexer {
    endpoint: Arc<PhysicalEndPoint>,
    queues: Arc<std::sync::Mutex<HashMap<String, Weak<SubEndpointQueue>>>>,
    demux_task: JoinHandle<()>,
}

impl Multiplexer {
    /// Start demultiplexing `endpoint`'s receive stream by the name frame
    /// each sub-endpoint pushes on send.
    #[must_use]
    pub fn new(endpoint: Arc<PhysicalEndPoint>) -> Self {
        let queues: Arc<std::sync::Mutex<HashMap<String, Weak<SubEndpointQueue>>>> = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let demux_task = tokio::spawn(demux_loop(endpoint.clone(), queues.clone()));
        Self { endpoint, queues, demux_task }
    }

    /// Open a named sub-endpoint, creating its queue if this is the first
    /// live handle for `name` (or replacing it, if the previous handle for
    /// the same name was already dropped).
    #[must_use]
    pub fn open(&self, name: impl Into<String>) -> MultiplexHandle {
        let name = name.into();
        let (sender, receiver) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
        let queue = Arc::new(SubEndpointQueue { sender });
        let mut guard = self.queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(name.clone(), Arc::downgrade(&queue));
        drop(guard);
        MultiplexHandle {
            name,
            endpoint: self.endpoint.clone(),
            _queue: queue,
            receiver: AsyncMutex::new(receiver),
        }
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) { self.demux_task.abort(); }
}

async fn demux_loop(endpoint: Arc<PhysicalEndPoint>, queues: Arc<std::sync::Mutex<HashMap<String, Weak<SubEndpointQueue>>>>) {
    loop {
        let transmission = match endpoint.receive().await {
            Ok(transmission) => transmission,
            Err(TransportError::Disposed) => return,
            Err(err) => {
                warn!(error = %err, "multiplexer demux loop: receive failed");
                continue;
            }
        };
        match pop_name(transmission.message) {
            Ok((name, remainder)) => {
                let target = queues.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(&name).and_then(Weak::upgrade);
                match target {
                    Some(queue) => {
                        let inner = Transmission::new(remainder, transmission.remote_address);
                        if queue.sender.send(inner).await.is_err() {
                            warn!(name, "multiplex sub-endpoint queue closed; dropping message");
                        }
                    }
                    None => warn!(name, "no live sub-endpoint for multiplex name; dropping message"),
                }
            }
            Err(err) => warn!(error = %err, "dropping malformed multiplex envelope"),
        }
    }
}

fn pop_name(mut message: crate::buffer::MessageBuffer) -> Result<(String, crate::buffer::MessageBuffer), BufferError> {
    let frame = message.pop_frame()?;
    let name = String::from_utf8(frame.into_payload()).map_err(|_| BufferError::MalformedMessage("multiplex name is not valid UTF-8"))?;
    Ok((name, message))
}

/// A handle to one named sub-endpoint. Sending pushes the name frame;
/// receiving observes it already stripped by the demultiplex loop.
pub struct MultiplexHandle {
    name: String,
    endpoint: Arc<PhysicalEndPoint>,
    _queue: Arc<SubEndpointQueue>,
    receiver: AsyncMutex<mpsc::Receiver<Transmission>>,
}

impl MultiplexHandle {
    /// This handle's sub-endpoint name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Send `message` to `remote_address` under this sub-endpoint's name.
    ///
    /// # Errors
    /// Propagates whatever [`PhysicalEndPoint::send`] returns.
    pub async fn send(&self, mut message: crate::buffer::MessageBuffer, remote_address: Address) -> Result<(), TransportError> {
        message.push_frame(self.name.as_bytes().to_vec());
        self.endpoint.send(Transmission::new(message, remote_address)).await
    }

    /// Receive the next message addressed to this sub-endpoint, or `None` if
    /// the multiplexer (and therefore its demux loop) has been dropped.
    pub async fn receive(&self) -> Option<Transmission> { self.receiver.lock().await.recv().await }
}
