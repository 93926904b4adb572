//! End-to-end cross-node dispatch over real loopback TCP sockets (spec.md §8
//! scenario 5): two independently bound `Dispatcher`s, one dispatching to
//! the other's `Scope` and observing the remote handler's result.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use dispatchd::{
    codec::TypeRegistry,
    data::DataBag,
    dispatch_data::DispatchData,
    dispatch_result::DispatchResult,
    dispatcher::{Dispatcher, DispatcherConfig},
    handler::{self, Handler},
    invoker::HandlerInvoker,
    message,
    registry::{HandlerConfig, HandlerRegistry},
    scope::Scope,
    service::EmptyServiceResolver,
};

#[derive(serde::Serialize, serde::Deserialize)]
struct Ping(u32);
message!(Ping);

struct PongHandler;

#[async_trait]
impl Handler<Ping> for PongHandler {
    async fn handle(&mut self, message: &Ping, _data: &DispatchData) -> DispatchResult {
        // `value` (DispatchResult::success's typed return) only survives a
        // remote round trip when built via `TypedValue::serializable`
        // (codec.rs only puts a value's `wire()` form on the wire) — this
        // handler answers through `data` instead, which every `Success`
        // always carries.
        let mut data = DataBag::new();
        data.insert("pong", serde_json::Value::from(format!("pong:{}", message.0)));
        DispatchResult::Success { message: "pong".to_owned(), data, value: None }
    }
}

fn loopback() -> SocketAddr { "127.0.0.1:0".parse().expect("valid address literal") }

async fn bind_node(registry: Arc<HandlerRegistry>) -> Dispatcher {
    Dispatcher::bind(
        loopback(),
        registry,
        Arc::new(HandlerInvoker::default()),
        Arc::new(EmptyServiceResolver),
        Arc::new(TypeRegistry::new().register::<Ping>()),
        DispatcherConfig::default(),
    )
    .await
    .expect("dispatcher binds on an ephemeral loopback port")
}

#[tokio::test]
async fn a_dispatches_ping_to_b_and_observes_the_remote_pong() {
    let b_registry = Arc::new(HandlerRegistry::new());
    b_registry.register::<Ping>(HandlerConfig::new(), handler::factory::<Ping, _, _>(|_resolver| PongHandler));
    let b = bind_node(b_registry).await;
    let a = bind_node(Arc::new(HandlerRegistry::new())).await;

    let target = Scope::end_point(b.local_end_point().clone());
    let data = DispatchData::builder_for(Ping(42)).build().expect("valid envelope");
    let result = a.dispatch(data, false, target).await;

    assert!(result.is_success(), "expected the remote handler's result to be a success");
    assert_eq!(result.message(), "pong");
    assert_eq!(result.data().get("pong"), &serde_json::Value::from("pong:42"));
}

#[tokio::test]
async fn point_to_point_to_an_unregistered_remote_type_is_a_dispatch_failure() {
    let b = bind_node(Arc::new(HandlerRegistry::new())).await;
    let a = bind_node(Arc::new(HandlerRegistry::new())).await;

    let target = Scope::end_point(b.local_end_point().clone());
    let data = DispatchData::builder_for(Ping(1)).build().expect("valid envelope");
    let result = a.dispatch(data, false, target).await;

    assert!(matches!(result, DispatchResult::DispatchFailure { .. }));
}
