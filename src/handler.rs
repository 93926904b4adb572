//! Typed handlers, the context they can opt into, and the type-erased
//! adapter the registry stores them behind.
//!
//! spec §4.5 describes reflection-based context injection onto a
//! "designated context property". spec §9's redesign note says to replace
//! that with "an explicit optional capability... the factory signature
//! receives the context as an argument", since Rust has no attribute-driven
//! property injection. This module implements that redesign:
//! [`Handler::set_context`] is a default no-op a handler overrides to opt in,
//! rather than a reflected property the invoker searches for.

use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    dispatch_data::DispatchData, dispatch_result::DispatchResult, message::Message, scope::Scope,
    service::ServiceResolver,
};

/// The capability set injected into a handler that opts in via
/// [`Handler::set_context`] (spec §4.5's `MessageDispatchContext`).
#[derive(Clone)]
pub struct MessageDispatchContext {
    /// The service resolver the handler's factory was built from.
    pub dispatch_services: Arc<dyn ServiceResolver>,
    /// The envelope under dispatch.
    pub dispatch_data: DispatchData,
    /// Whether this invocation is part of a publish (fan-out) dispatch
    /// rather than point-to-point.
    pub is_publish: bool,
    /// Whether this invocation is running in the local process rather than
    /// having arrived over the transport from a remote node.
    pub is_local_dispatch: bool,
    /// The scope the dispatch was addressed to.
    pub remote_scope: Scope,
}

/// A handler for a concrete message type `M`.
///
/// Implementors are instantiated fresh per invocation by a
/// [`HandlerFactory`] (spec §3: "`factory` is a pure function of a
/// service-resolver that yields a handler object"); `handle` then runs
/// exactly once.
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    /// Handle `message`. `data` is the full envelope `message` was unwrapped
    /// from, for handlers that need the data bag alongside the typed
    /// message.
    async fn handle(&mut self, message: &M, data: &DispatchData) -> DispatchResult;

    /// Accept dispatch context. The default no-op is what most handlers
    /// want; override to opt into [`MessageDispatchContext`] (spec §9).
    fn set_context(&mut self, _context: MessageDispatchContext) {}
}

/// Errors a [`HandlerFactory`] can report while constructing a handler.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The factory could not resolve a dependency it needed.
    #[error("handler factory could not resolve dependency: {0}")]
    MissingDependency(String),
    /// The factory failed for an application-specific reason.
    #[error("handler factory failed: {0}")]
    Failed(String),
}

/// The type-erased handler surface the registry and invoker operate on.
///
/// Produced from a typed [`Handler<M>`] by [`adapt`]; callers outside this
/// crate never implement `ErasedHandler` directly.
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    /// Handle an envelope whose message has already been confirmed
    /// assignable to this handler's declared message type.
    async fn handle_erased(&mut self, data: &DispatchData) -> DispatchResult;

    /// Forward context to the wrapped typed handler.
    fn set_context(&mut self, context: MessageDispatchContext);
}

struct TypedHandlerAdapter<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H> ErasedHandler for TypedHandlerAdapter<M, H>
where
    M: Message,
    H: Handler<M>,
{
    async fn handle_erased(&mut self, data: &DispatchData) -> DispatchResult {
        match data.downcast_ref::<M>() {
            Some(message) => self.handler.handle(message, data).await,
            None => DispatchResult::failure_from_exception(crate::dispatch_result::DispatchException::invalid_operation(
                format!(
                    "handler registered for {} could not accept a message of declared type {}",
                    M::type_name(),
                    data.message_type()
                ),
            )),
        }
    }

    fn set_context(&mut self, context: MessageDispatchContext) { self.handler.set_context(context); }
}

/// Wrap a typed `handler` into the type-erased form the registry stores.
pub fn adapt<M, H>(handler: H) -> Box<dyn ErasedHandler>
where
    M: Message,
    H: Handler<M> + 'static,
{
    Box::new(TypedHandlerAdapter::<M, H> {
        handler,
        _message: PhantomData,
    })
}

/// Builds a fresh handler instance for one invocation from a service
/// resolver (spec §3's `HandlerRegistration.factory`).
///
/// `Ok(None)` represents the "factory returns a null sentinel" case spec
/// §4.5 calls out explicitly: the invoker converts it to
/// `Failure{exception: InvalidOperation}` without crashing.
pub type HandlerFactory = Arc<dyn Fn(&dyn ServiceResolver) -> Result<Option<Box<dyn ErasedHandler>>, FactoryError> + Send + Sync>;

/// Build a [`HandlerFactory`] from a closure that always succeeds and never
/// returns a null handler — the common case for a statically known handler
/// type with a trivial (or no) constructor.
pub fn factory<M, H, F>(make: F) -> HandlerFactory
where
    M: Message,
    H: Handler<M> + 'static,
    F: Fn(&dyn ServiceResolver) -> H + Send + Sync + 'static,
{
    Arc::new(move |resolver| Ok(Some(adapt::<M, H>(make(resolver)))))
}

#[cfg(test)]
mod tests {
    use crate::{message, service::EmptyServiceResolver};

    use super::*;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Ping(u32);
    message!(Ping);

    struct EchoHandler {
        context: Option<MessageDispatchContext>,
    }

    #[async_trait]
    impl Handler<Ping> for EchoHandler {
        async fn handle(&mut self, message: &Ping, _data: &DispatchData) -> DispatchResult { DispatchResult::success(message.0) }

        fn set_context(&mut self, context: MessageDispatchContext) { self.context = Some(context); }
    }

    #[tokio::test]
    async fn adapted_handler_downcasts_and_invokes() {
        let mut erased = adapt::<Ping, _>(EchoHandler { context: None });
        let data = DispatchData::builder_for(Ping(9)).build().expect("valid envelope");
        let result = erased.handle_erased(&data).await;
        let DispatchResult::Success { value: Some(value), .. } = result else {
            panic!("expected typed success");
        };
        assert_eq!(value.downcast_ref::<u32>(), Some(&9));
    }

    #[tokio::test]
    async fn mismatched_message_type_fails_without_panicking() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct OtherMessage;
        message!(OtherMessage);

        let mut erased = adapt::<Ping, _>(EchoHandler { context: None });
        let data = DispatchData::builder_for(OtherMessage).build().expect("valid envelope");
        let result = erased.handle_erased(&data).await;
        assert!(!result.is_success());
    }

    #[test]
    fn factory_builds_a_handler_via_the_service_resolver() {
        let make = factory::<Ping, _, _>(|_resolver| EchoHandler { context: None });
        let built = make(&EmptyServiceResolver).expect("factory succeeds");
        assert!(built.is_some());
    }
}
