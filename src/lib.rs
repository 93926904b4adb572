//! Typed message dispatch for a process cluster: handler registration with
//! type-hierarchy route descent, a processor chain wrapping every
//! invocation, a reliable multiplexed TCP transport for cross-node delivery,
//! and the `Dispatcher` that ties routing, local invocation and remote
//! delivery together.
//!
//! Start at [`registry::HandlerRegistry`] to register handlers, and
//! [`dispatcher::Dispatcher`] to route envelopes to them — locally or, given
//! a [`scope::Scope`] naming another end-point, across [`transport`].

pub mod address;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod data;
pub mod dispatch_data;
pub mod dispatch_result;
pub mod dispatcher;
pub mod handler;
pub mod invoker;
pub mod message;
pub mod registry;
pub mod scope;
pub mod service;
pub mod transport;
pub mod validation;
