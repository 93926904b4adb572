//! Connection-oriented transport: per-peer reliable delivery over TCP
//! (spec §4.2), logical-endpoint multiplexing (spec §4.3), and the
//! reconnection/retry machinery that keeps a peer's send queue flowing
//! across connection loss (spec §4.2's `ReconnectionManager`).
//!
//! [`endpoint::PhysicalEndPoint`] is the aggregate a caller constructs: it
//! owns the listener task, the address-keyed map of peers, and the local
//! receive queue. [`multiplex::Multiplexer`] splits one endpoint into named
//! sub-endpoints for callers — the [`crate::dispatcher::Dispatcher`] is one
//! such caller, using the name `"dispatch"` (spec §6 scenario 5).

#[cfg(feature = "dedup")]
pub mod dedup;
pub mod endpoint;
pub mod multiplex;
pub mod reconnect;
pub mod tcp;
pub mod txqueue;

use thiserror::Error;

use crate::{address::Address, buffer::BufferError};

/// A message addressed to or received from a peer (spec §3: "never
/// default-constructed across a boundary" — there is no `Default` impl).
#[derive(Debug, Clone)]
pub struct Transmission {
    /// The framed payload.
    pub message: crate::buffer::MessageBuffer,
    /// The peer this message was sent to, or received from.
    pub remote_address: Address,
}

impl Transmission {
    /// Construct a transmission.
    #[must_use]
    pub const fn new(message: crate::buffer::MessageBuffer, remote_address: Address) -> Self {
        Self { message, remote_address }
    }
}

/// Errors a [`endpoint::PhysicalEndPoint`] or [`multiplex::Multiplexer`] can
/// report (spec §7's "Transport-local" and "Protocol" error taxonomy).
#[derive(Debug, Error)]
pub enum TransportError {
    /// An underlying I/O operation failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The endpoint (or the sub-endpoint a multiplexer handle refers to) has
    /// been disposed.
    #[error("transport endpoint disposed")]
    Disposed,
    /// The caller's cancellation token fired before the operation completed.
    #[error("transport operation cancelled")]
    Cancelled,
    /// The per-peer send queue was at capacity (spec SPEC_FULL §8: this port
    /// bounds `txQueue`, unlike the unbounded reference design).
    #[error("send queue exceeded its configured capacity")]
    BackpressureExceeded,
    /// A frame failed to parse (spec §7's "Protocol" error class).
    #[error("malformed transport frame: {0}")]
    Malformed(#[from] BufferError),
    /// `send` targeted an address with no known peer and no active listener
    /// relationship to establish one.
    #[error("no route to peer at {0}")]
    UnknownPeer(Address),
}
