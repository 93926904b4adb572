//! `Dispatcher`: resolves a target scope, then routes an envelope either
//! locally (route descent or publish fan-out, spec §4.4) or remotely over a
//! dedicated `"dispatch"` transport sub-endpoint (spec §6 scenario 5).
//!
//! A remote dispatch gets its own request/response correlation: a `seqNum`
//! frame this module allocates and tracks, entirely independent of the
//! transport's own per-message `seqNum` (spec §4.2). The transport layer
//! already guarantees a `Deliver` reaches its peer exactly once (modulo
//! reconnects); this layer only needs to match a reply back to the call that
//! is awaiting it.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use serde_json::{Value, json};
use thiserror::Error;
use tokio::{
    sync::{Mutex as AsyncMutex, oneshot},
    task::JoinHandle,
};
use tracing::warn;

use crate::{
    address::Address,
    buffer::MessageBuffer,
    codec::{MessageTypeResolver, ResultCodec},
    dispatch_data::DispatchData,
    dispatch_result::{DispatchException, DispatchResult},
    handler::MessageDispatchContext,
    invoker::HandlerInvoker,
    registry::{HandlerProvider, HandlerRegistry},
    scope::Scope,
    service::ServiceResolver,
    transport::{
        TransportError,
        endpoint::{EndpointConfig, PhysicalEndPoint},
        multiplex::{MultiplexHandle, Multiplexer},
    },
    validation,
};

/// The sub-endpoint name the dispatcher multiplexes its remote traffic under
/// (spec §6 scenario 5).
pub const SUBENDPOINT_NAME: &str = "dispatch";

mod frame {
    //! The dispatcher's own correlation header: 4-byte BE kind + 4-byte BE
    //! seqNum, one frame, pushed under the multiplexer's name frame. Distinct
    //! from (and layered above) the transport's `Deliver`/`Ack` header.
    pub const REQUEST: i32 = 1;
    pub const RESPONSE: i32 = 2;

    #[expect(clippy::big_endian_bytes, reason = "wire header is big-endian, matching MessageBuffer's own framing")]
    pub fn encode(kind: i32, seq: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&kind.to_be_bytes());
        bytes.extend_from_slice(&seq.to_be_bytes());
        bytes
    }

    #[expect(clippy::big_endian_bytes, reason = "wire header is big-endian, matching MessageBuffer's own framing")]
    pub fn decode(bytes: &[u8]) -> Option<(i32, u32)> {
        let kind = i32::from_be_bytes(bytes.get(0..4)?.try_into().ok()?);
        let seq = u32::from_be_bytes(bytes.get(4..8)?.try_into().ok()?);
        Some((kind, seq))
    }
}

/// Errors raised while binding a [`Dispatcher`].
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// The underlying transport endpoint failed to bind.
    #[error("dispatcher transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Tuning for remote dispatch behaviour.
#[derive(Clone)]
pub struct DispatcherConfig {
    /// How long a remote dispatch waits for a response before reporting
    /// [`DispatchResult::Timeout`]. `None` waits indefinitely (spec §4.6
    /// flags the due time as caller-configurable, not mandatory).
    pub due_time: Option<Duration>,
    /// An optional cluster node identifier further qualifying this
    /// dispatcher's own [`Scope`], compared against an inbound scope's
    /// `cluster_node_id` when deciding whether a dispatch targets this node.
    pub cluster_node_id: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            due_time: Some(Duration::from_secs(30)),
            cluster_node_id: None,
        }
    }
}

type CorrelationTable = Arc<AsyncMutex<HashMap<u32, oneshot::Sender<DispatchResult>>>>;

/// Routes dispatch envelopes to local handlers or, for a scope naming another
/// end-point, across the transport (spec §4.6).
pub struct Dispatcher {
    local_address: Address,
    cluster_node_id: Option<String>,
    registry: Arc<HandlerRegistry>,
    invoker: Arc<HandlerInvoker>,
    resolver: Arc<dyn ServiceResolver>,
    codec: ResultCodec,
    multiplex: Arc<MultiplexHandle>,
    seq_next: std::sync::atomic::AtomicU32,
    correlations: CorrelationTable,
    due_time: Option<Duration>,
    _endpoint: Arc<PhysicalEndPoint>,
    _multiplexer: Multiplexer,
    inbound_task: JoinHandle<()>,
}

impl Dispatcher {
    /// Bind a fresh transport endpoint at `bind_addr` and start dispatching.
    ///
    /// # Errors
    /// Returns [`DispatcherError::Transport`] if the endpoint fails to bind.
    pub async fn bind(
        bind_addr: SocketAddr,
        registry: Arc<HandlerRegistry>,
        invoker: Arc<HandlerInvoker>,
        resolver: Arc<dyn ServiceResolver>,
        type_resolver: Arc<dyn MessageTypeResolver>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatcherError> {
        let endpoint = Arc::new(PhysicalEndPoint::bind(EndpointConfig::new(bind_addr)).await?);
        let local_address = endpoint.local_address().clone();
        let multiplexer = Multiplexer::new(endpoint.clone());
        let multiplex = Arc::new(multiplexer.open(SUBENDPOINT_NAME));

        let correlations: CorrelationTable = Arc::new(AsyncMutex::new(HashMap::new()));
        let local_scope = Scope::EndPoint {
            address: local_address.clone(),
            cluster_node_id: config.cluster_node_id.clone(),
        };
        let inbound_task = tokio::spawn(inbound_loop(
            multiplex.clone(),
            registry.clone(),
            invoker.clone(),
            resolver.clone(),
            type_resolver,
            ResultCodec::new(),
            correlations.clone(),
            local_scope,
        ));

        Ok(Self {
            local_address,
            cluster_node_id: config.cluster_node_id,
            registry,
            invoker,
            resolver,
            codec: ResultCodec::new(),
            multiplex,
            seq_next: std::sync::atomic::AtomicU32::new(0),
            correlations,
            due_time: config.due_time,
            _endpoint: endpoint,
            _multiplexer: multiplexer,
            inbound_task,
        })
    }

    /// This dispatcher's local end-point address (spec §4.6's
    /// `getLocalEndPoint`).
    #[must_use]
    pub const fn local_end_point(&self) -> &Address { &self.local_address }

    /// This dispatcher's own scope, for a caller comparing a target scope
    /// against "is this us" (spec §4.6's `getScope`).
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::EndPoint {
            address: self.local_address.clone(),
            cluster_node_id: self.cluster_node_id.clone(),
        }
    }

    /// Route `data` to `scope`: locally if `scope` is [`Scope::NoScope`] or
    /// names this dispatcher's own end-point, otherwise across the
    /// transport.
    pub async fn dispatch(&self, data: DispatchData, publish: bool, scope: Scope) -> DispatchResult {
        match scope {
            Scope::NoScope => self.dispatch_local(data, publish).await,
            Scope::EndPoint { address, cluster_node_id } if address == self.local_address && cluster_node_id == self.cluster_node_id => {
                self.dispatch_local(data, publish).await
            }
            Scope::EndPoint { address, .. } => self.dispatch_remote(data, publish, address).await,
        }
    }

    /// Route `data` through this process's own registry, skipping scope
    /// resolution entirely (spec §4.6's `dispatchLocal`).
    pub async fn dispatch_local(&self, data: DispatchData, publish: bool) -> DispatchResult {
        let local_scope = self.scope();
        route_local(&self.registry.snapshot(), &self.invoker, &self.resolver, &local_scope, data, publish).await
    }

    /// Send the request and await its reply, entirely within `self.due_time`
    /// if one is configured — the transport's own `send` already waits on a
    /// per-message ack with no timeout of its own, so the due time has to
    /// wrap that wait too, not just the reply (spec §4.6's due-time option
    /// bounds the whole remote round trip).
    async fn dispatch_remote(&self, data: DispatchData, publish: bool, target: Address) -> DispatchResult {
        let seq = self.seq_next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = json!({ "publish": publish, "data": self.codec.encode_data(&data) });
        let payload_bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => return DispatchResult::failure_from_exception(DispatchException::new("CodecError", err.to_string())),
        };

        let (tx, rx) = oneshot::channel();
        self.correlations.lock().await.insert(seq, tx);

        let mut message = MessageBuffer::new();
        message.push_frame(frame::encode(frame::REQUEST, seq));
        message.push_frame(payload_bytes);

        let round_trip = self.send_and_await_reply(message, target, rx);
        let outcome = match self.due_time {
            Some(due) => match tokio::time::timeout(due, round_trip).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.correlations.lock().await.remove(&seq);
                    return DispatchResult::Timeout { due_time: Some(due) };
                }
            },
            None => round_trip.await,
        };

        match outcome {
            Ok(result) => result,
            Err(RemoteDispatchFailure::Transport(err)) => {
                self.correlations.lock().await.remove(&seq);
                DispatchResult::failure_from_exception(DispatchException::new("TransportError", err.to_string()))
            }
            Err(RemoteDispatchFailure::Disposed) => {
                DispatchResult::failure_from_exception(DispatchException::invalid_operation("dispatcher disposed before a remote response arrived"))
            }
        }
    }

    async fn send_and_await_reply(
        &self,
        message: MessageBuffer,
        target: Address,
        rx: oneshot::Receiver<DispatchResult>,
    ) -> Result<DispatchResult, RemoteDispatchFailure> {
        self.multiplex.send(message, target).await.map_err(RemoteDispatchFailure::Transport)?;
        rx.await.map_err(|_| RemoteDispatchFailure::Disposed)
    }
}

/// Why [`Dispatcher::send_and_await_reply`] did not produce a
/// [`DispatchResult`]. A caller-side timeout is handled separately, outside
/// this type, since it races the whole future rather than failing it.
enum RemoteDispatchFailure {
    /// The transport-level send failed outright.
    Transport(TransportError),
    /// The dispatcher was dropped (and its correlation table with it) before
    /// a response arrived.
    Disposed,
}

impl Drop for Dispatcher {
    fn drop(&mut self) { self.inbound_task.abort(); }
}

/// Local route resolution shared by [`Dispatcher::dispatch_local`] and the
/// inbound loop handling a request that arrived over the transport.
async fn route_local(
    snapshot: &HandlerProvider,
    invoker: &HandlerInvoker,
    resolver: &Arc<dyn ServiceResolver>,
    local_scope: &Scope,
    data: DispatchData,
    publish: bool,
) -> DispatchResult {
    if validation::inner_type_name(data.message_type()).is_some() {
        return validation::ValidationMessageHandler::handle(snapshot, invoker, &data).await;
    }

    let hierarchy: Vec<&str> = data.hierarchy().iter().map(String::as_str).collect();
    if publish {
        dispatch_publish(snapshot, &hierarchy, invoker, resolver, local_scope, data).await
    } else {
        dispatch_point_to_point(snapshot, &hierarchy, invoker, resolver, local_scope, data).await
    }
}

/// Route-descent point-to-point dispatch (spec §4.4): try each non-publish-only
/// registration at the most-derived tier first, descending to a base tier
/// only once every registration at the current tier reports
/// [`DispatchResult::DispatchFailure`].
async fn dispatch_point_to_point(
    snapshot: &HandlerProvider,
    hierarchy: &[&str],
    invoker: &HandlerInvoker,
    resolver: &Arc<dyn ServiceResolver>,
    local_scope: &Scope,
    data: DispatchData,
) -> DispatchResult {
    for tier in snapshot.tiers(hierarchy) {
        for registration in tier.into_iter().filter(|reg| !reg.config.publish_only) {
            let context = context_for(&data, false, local_scope, resolver);
            let result = invoker.invoke(registration, &data, resolver.as_ref(), context).await;
            if !result.is_dispatch_failure() {
                return result;
            }
        }
    }
    DispatchResult::DispatchFailure { message_type_name: data.message_type().to_owned() }
}

/// Publish (fan-out) dispatch (spec §4.4): invoke every registration across
/// every tier, including publish-only ones, and aggregate every outcome. An
/// envelope with no registered handlers at all reports `Success`, never
/// `DispatchFailure`.
async fn dispatch_publish(
    snapshot: &HandlerProvider,
    hierarchy: &[&str],
    invoker: &HandlerInvoker,
    resolver: &Arc<dyn ServiceResolver>,
    local_scope: &Scope,
    data: DispatchData,
) -> DispatchResult {
    let handlers = snapshot.get_handlers(hierarchy);
    if handlers.is_empty() {
        return DispatchResult::success_ack();
    }
    let mut children = Vec::with_capacity(handlers.len());
    for registration in handlers {
        let context = context_for(&data, true, local_scope, resolver);
        children.push(invoker.invoke(registration, &data, resolver.as_ref(), context).await);
    }
    DispatchResult::aggregate(children)
}

fn context_for(data: &DispatchData, is_publish: bool, local_scope: &Scope, resolver: &Arc<dyn ServiceResolver>) -> MessageDispatchContext {
    MessageDispatchContext {
        dispatch_services: resolver.clone(),
        dispatch_data: data.clone(),
        is_publish,
        is_local_dispatch: true,
        remote_scope: local_scope.clone(),
    }
}

#[expect(clippy::too_many_arguments, reason = "threading the dispatcher's collaborators through a spawned task, mirroring the fields Dispatcher itself holds")]
async fn inbound_loop(
    multiplex: Arc<MultiplexHandle>,
    registry: Arc<HandlerRegistry>,
    invoker: Arc<HandlerInvoker>,
    resolver: Arc<dyn ServiceResolver>,
    type_resolver: Arc<dyn MessageTypeResolver>,
    codec: ResultCodec,
    correlations: CorrelationTable,
    local_scope: Scope,
) {
    loop {
        let Some(transmission) = multiplex.receive().await else {
            return;
        };
        let remote_address = transmission.remote_address;
        let mut message = transmission.message;

        let Ok(header) = message.pop_frame() else {
            warn!("dropping dispatch transmission with no correlation header");
            continue;
        };
        let Some((kind, seq)) = frame::decode(header.payload()) else {
            warn!("dropping dispatch transmission with a malformed correlation header");
            continue;
        };
        let Ok(payload_frame) = message.pop_frame() else {
            warn!("dropping dispatch transmission with no payload");
            continue;
        };
        let Ok(payload) = serde_json::from_slice::<Value>(payload_frame.payload()) else {
            warn!("dropping dispatch transmission with malformed JSON payload");
            continue;
        };

        match kind {
            frame::REQUEST => {
                handle_request(&multiplex, &registry, &invoker, &resolver, type_resolver.as_ref(), &codec, &local_scope, remote_address, seq, payload)
                    .await;
            }
            frame::RESPONSE => {
                handle_response(&codec, &correlations, seq, &payload).await;
            }
            other => warn!(kind = other, "dropping dispatch transmission with an unknown correlation frame kind"),
        }
    }
}

#[expect(clippy::too_many_arguments, reason = "inlines one branch of the inbound loop's dispatch")]
async fn handle_request(
    multiplex: &MultiplexHandle,
    registry: &HandlerRegistry,
    invoker: &HandlerInvoker,
    resolver: &Arc<dyn ServiceResolver>,
    type_resolver: &dyn MessageTypeResolver,
    codec: &ResultCodec,
    local_scope: &Scope,
    remote_address: Address,
    seq: u32,
    envelope: Value,
) {
    let publish = envelope.get("publish").and_then(Value::as_bool).unwrap_or(false);
    let Some(data_json) = envelope.get("data") else {
        warn!("dropping remote dispatch request with no data field");
        return;
    };
    let data = match codec.decode_data(data_json, type_resolver) {
        Ok(data) => data,
        Err(err) => {
            warn!(error = %err, "dropping remote dispatch request with an undecodable envelope");
            return;
        }
    };

    let result = route_local(&registry.snapshot(), invoker, resolver, local_scope, data, publish).await;
    let response_bytes = match serde_json::to_vec(&codec.encode_result(&result)) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to encode a dispatch response");
            return;
        }
    };

    let mut response = MessageBuffer::new();
    response.push_frame(frame::encode(frame::RESPONSE, seq));
    response.push_frame(response_bytes);
    if let Err(err) = multiplex.send(response, remote_address).await {
        warn!(error = %err, "failed to send a dispatch response");
    }
}

async fn handle_response(codec: &ResultCodec, correlations: &CorrelationTable, seq: u32, payload: &Value) {
    let Some(sender) = correlations.lock().await.remove(&seq) else {
        warn!(seq, "dropping dispatch response with no matching outstanding request");
        return;
    };
    match codec.decode_result(payload) {
        Ok(result) => {
            let _ = sender.send(result);
        }
        Err(err) => {
            let _ = sender.send(DispatchResult::failure_from_exception(DispatchException::new("CodecError", err.to_string())));
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        codec::{NullTypeResolver, TypeRegistry},
        handler::{self, Handler},
        invoker::{Processor, ProcessorOutcome},
        message,
        registry::HandlerConfig,
        service::EmptyServiceResolver,
    };

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Ping(u32);
    message!(Ping);

    #[derive(serde::Serialize, serde::Deserialize)]
    struct DerivedPing;
    message!(DerivedPing, ["Ping"]);

    struct EchoHandler;

    #[async_trait]
    impl Handler<Ping> for EchoHandler {
        async fn handle(&mut self, message: &Ping, _data: &DispatchData) -> DispatchResult { DispatchResult::success(message.0) }
    }

    fn loopback() -> SocketAddr { "127.0.0.1:0".parse().expect("addr") }

    async fn dispatcher_with_echo_handler() -> Dispatcher {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register::<Ping>(HandlerConfig::new(), handler::factory::<Ping, _, _>(|_resolver| EchoHandler));
        Dispatcher::bind(
            loopback(),
            registry,
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(TypeRegistry::new().register::<Ping>()),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind")
    }

    #[tokio::test]
    async fn no_scope_dispatches_locally() {
        let dispatcher = dispatcher_with_echo_handler().await;
        let data = DispatchData::builder_for(Ping(7)).build().expect("valid envelope");
        let result = dispatcher.dispatch(data, false, Scope::NoScope).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn own_scope_dispatches_locally() {
        let dispatcher = dispatcher_with_echo_handler().await;
        let own_scope = dispatcher.scope();
        let data = DispatchData::builder_for(Ping(3)).build().expect("valid envelope");
        let result = dispatcher.dispatch(data, false, own_scope).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn point_to_point_descends_to_a_base_tier_registration() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register::<Ping>(HandlerConfig::new(), handler::factory::<Ping, _, _>(|_resolver| EchoHandler));
        let dispatcher = Dispatcher::bind(
            loopback(),
            registry,
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind");

        let data = DispatchData::builder_for(DerivedPing).build().expect("valid envelope");
        let result = dispatcher.dispatch_local(data, false).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn point_to_point_with_no_registration_is_a_dispatch_failure() {
        let dispatcher = Dispatcher::bind(
            loopback(),
            Arc::new(HandlerRegistry::new()),
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind");
        let data = DispatchData::builder_for(Ping(1)).build().expect("valid envelope");
        let result = dispatcher.dispatch_local(data, false).await;
        assert!(result.is_dispatch_failure());
    }

    #[tokio::test]
    async fn publish_with_no_registration_succeeds_rather_than_dispatch_failing() {
        let dispatcher = Dispatcher::bind(
            loopback(),
            Arc::new(HandlerRegistry::new()),
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind");
        let data = DispatchData::builder_for(Ping(1)).build().expect("valid envelope");
        let result = dispatcher.dispatch_local(data, true).await;
        assert!(result.is_success());
        assert!(!result.is_dispatch_failure());
    }

    #[tokio::test]
    async fn publish_aggregates_every_registration_including_publish_only() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register::<Ping>(HandlerConfig::new(), handler::factory::<Ping, _, _>(|_resolver| EchoHandler));
        registry.register::<Ping>(HandlerConfig::new().publish_only(), handler::factory::<Ping, _, _>(|_resolver| EchoHandler));
        let dispatcher = Dispatcher::bind(
            loopback(),
            registry,
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind");
        let data = DispatchData::builder_for(Ping(1)).build().expect("valid envelope");
        let result = dispatcher.dispatch_local(data, true).await;
        let DispatchResult::Aggregate { children, .. } = result else {
            panic!("expected aggregate");
        };
        assert_eq!(children.len(), 2);
    }

    struct RejectsZero;

    #[async_trait]
    impl Processor for RejectsZero {
        async fn process(&self, data: &DispatchData) -> ProcessorOutcome {
            if data.downcast_ref::<Ping>().is_some_and(|ping| ping.0 == 0) {
                ProcessorOutcome::ShortCircuit(DispatchResult::failure("zero is not a valid ping"))
            } else {
                ProcessorOutcome::Continue
            }
        }

        fn call_on_validation(&self) -> bool { true }
    }

    #[tokio::test]
    async fn validation_dispatch_runs_only_the_flagged_processor_and_skips_the_handler() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register::<Ping>(HandlerConfig::new(), handler::factory::<Ping, _, _>(|_resolver| EchoHandler));
        let dispatcher = Dispatcher::bind(
            loopback(),
            registry,
            Arc::new(HandlerInvoker::new(vec![Arc::new(RejectsZero)])),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind");

        let data = validation::validation_envelope(Ping(0)).build().expect("valid envelope");
        let result = dispatcher.dispatch_local(data, false).await;
        assert!(!result.is_success());
        assert!(!matches!(result, DispatchResult::Success { value: Some(_), .. }));
    }

    #[tokio::test]
    async fn remote_dispatch_round_trips_to_the_target_end_point() {
        let receiver = dispatcher_with_echo_handler().await;
        let sender = Dispatcher::bind(
            loopback(),
            Arc::new(HandlerRegistry::new()),
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig::default(),
        )
        .await
        .expect("bind");

        let data = DispatchData::builder_for(Ping(5)).build().expect("valid envelope");
        let target = Scope::end_point(receiver.local_end_point().clone());
        let result = sender.dispatch(data, false, target).await;
        assert!(result.is_success(), "expected success, got failure");
    }

    #[tokio::test]
    async fn remote_dispatch_to_an_unreachable_peer_reports_a_timeout() {
        let sender = Dispatcher::bind(
            loopback(),
            Arc::new(HandlerRegistry::new()),
            Arc::new(HandlerInvoker::default()),
            Arc::new(EmptyServiceResolver),
            Arc::new(NullTypeResolver),
            DispatcherConfig {
                due_time: Some(Duration::from_millis(200)),
                cluster_node_id: None,
            },
        )
        .await
        .expect("bind");

        // A closed TCP port at localhost: the supervisor keeps retrying to
        // connect, so the request never gets a response within the due time.
        let unreachable: SocketAddr = "127.0.0.1:1".parse().expect("addr");
        let target = Scope::end_point(Address::from(unreachable));
        let data = DispatchData::builder_for(Ping(1)).build().expect("valid envelope");
        let result = sender.dispatch(data, false, target).await;
        assert!(matches!(result, DispatchResult::Timeout { .. }));
    }
}
