//! Handler registry: the map from message type to ordered handler
//! registrations, with atomic snapshot publication (spec §4.4).
//!
//! Mutation (`register`/`unregister`) is serialised through a mutex-guarded
//! builder state, but readers never take that lock: every mutation
//! immediately publishes a fresh, immutable [`HandlerProvider`] behind an
//! `Arc` swap (spec §9: "the only true globals are the registry snapshot
//! (atomic swap)... express both as explicitly-owned fields of the endpoint
//! aggregate; no process-wide singletons").

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::watch;

use crate::{
    handler::HandlerFactory,
    message::Message,
};

/// Opaque handle returned by [`HandlerRegistry::register`], used to later
/// [`HandlerRegistry::unregister`] that exact registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// Construct a registration id directly, for tests that build a
    /// [`HandlerRegistration`] outside [`HandlerRegistry::register`].
    #[must_use]
    pub(crate) const fn for_test(raw: u64) -> Self { Self(raw) }
}

/// Recognised and opaque configuration on a [`HandlerRegistration`] (spec
/// §6). `publish_only` is interpreted by the core; every other key is
/// preserved verbatim but never inspected by the registry or dispatcher.
#[derive(Debug, Clone, Default)]
pub struct HandlerConfig {
    /// Excludes this registration from point-to-point dispatch (spec §4.4's
    /// route-descent rule skips `publish_only` registrations).
    pub publish_only: bool,
    /// Opaque `(key, value)` pairs a caller attached to this registration,
    /// uninterpreted by the core.
    pub options: Vec<(String, String)>,
}

impl HandlerConfig {
    /// A default configuration: not publish-only, no extra options.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Mark this registration publish-only.
    #[must_use]
    pub const fn publish_only(mut self) -> Self {
        self.publish_only = true;
        self
    }

    /// Attach an opaque option, preserved but uninterpreted by the core.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }
}

/// An immutable `(messageType, configuration, factory)` tuple (spec §3).
#[derive(Clone)]
pub struct HandlerRegistration {
    pub(crate) id: RegistrationId,
    /// The declared message type this registration handles.
    pub message_type: &'static str,
    /// Recognised and opaque configuration.
    pub config: HandlerConfig,
    /// Builds a fresh handler instance for one invocation.
    pub factory: HandlerFactory,
}

impl HandlerRegistration {
    /// This registration's identity, stable across snapshots until
    /// unregistered.
    #[must_use]
    pub const fn id(&self) -> RegistrationId { self.id }
}

/// An immutable snapshot over a set of [`HandlerRegistration`]s.
///
/// Snapshots never change after construction; [`HandlerRegistry`] replaces
/// the current snapshot atomically on every mutation (spec §4.4).
#[derive(Clone, Default)]
pub struct HandlerProvider {
    registrations: Vec<HandlerRegistration>,
}

impl HandlerProvider {
    /// Registrations whose `message_type` is equal to or a base type of
    /// `hierarchy` (most-derived first, as declared by [`Message::type_hierarchy`]),
    /// grouped tier-by-tier in descent order. Each tier preserves
    /// registration order. Spec §4.4: "ordered outermost-derived first,
    /// registration-order within a tier".
    #[must_use]
    pub fn tiers(&self, hierarchy: &[&str]) -> Vec<Vec<&HandlerRegistration>> {
        hierarchy
            .iter()
            .map(|tier_type| {
                self.registrations
                    .iter()
                    .filter(|reg| reg.message_type == *tier_type)
                    .collect()
            })
            .collect()
    }

    /// All registrations across every tier, flattened in descent order, for
    /// callers that don't need per-tier grouping (e.g. publish dispatch).
    #[must_use]
    pub fn get_handlers(&self, hierarchy: &[&str]) -> Vec<&HandlerRegistration> {
        self.tiers(hierarchy).into_iter().flatten().collect()
    }

    /// Total number of live registrations in this snapshot.
    #[must_use]
    pub fn len(&self) -> usize { self.registrations.len() }

    /// Whether this snapshot has no registrations.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.registrations.is_empty() }
}

/// Mutable registry that publishes an atomically-swapped [`HandlerProvider`]
/// snapshot on every change, and notifies subscribers via a watch channel.
pub struct HandlerRegistry {
    snapshot: RwLock<Arc<HandlerProvider>>,
    next_id: AtomicU64,
    changes: watch::Sender<()>,
}

impl Default for HandlerRegistry {
    fn default() -> Self { Self::new() }
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _receiver) = watch::channel(());
        Self {
            snapshot: RwLock::new(Arc::new(HandlerProvider::default())),
            next_id: AtomicU64::new(0),
            changes,
        }
    }

    /// The current immutable snapshot. Cheap: an `Arc` clone under a brief
    /// read lock.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HandlerProvider> {
        self.snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to registry change notifications. The receiver's value
    /// carries no payload; callers re-fetch [`Self::snapshot`] on wake-up.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<()> { self.changes.subscribe() }

    /// Register a handler factory for `M`, publishing a new snapshot that
    /// includes it. Returns an id for later [`Self::unregister`].
    pub fn register<M: Message>(&self, config: HandlerConfig, factory: HandlerFactory) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = HandlerRegistration {
            id,
            message_type: M::type_name(),
            config,
            factory,
        };
        self.mutate(|registrations| registrations.push(registration));
        id
    }

    /// Remove the registration identified by `id`, if still present,
    /// publishing a new snapshot without it.
    pub fn unregister(&self, id: RegistrationId) {
        self.mutate(|registrations| registrations.retain(|reg| reg.id != id));
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<HandlerRegistration>)) {
        let mut guard = self.snapshot.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut registrations = guard.registrations.clone();
        f(&mut registrations);
        *guard = Arc::new(HandlerProvider { registrations });
        drop(guard);
        let _ = self.changes.send(());
    }
}

/// A fluent, startup-time builder over a fresh [`HandlerRegistry`] (spec's
/// SPEC_FULL §7: the manual substitute for assembly-scanning/DI-container
/// module registration, which spec §1 scopes out as an external
/// collaborator).
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    registry: HandlerRegistry,
}

impl HandlerRegistryBuilder {
    /// Start building a registry with no registrations.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a handler factory for `M` and continue building.
    #[must_use]
    pub fn register<M: Message>(self, config: HandlerConfig, factory: HandlerFactory) -> Self {
        self.registry.register::<M>(config, factory);
        self
    }

    /// Finish building, yielding the populated registry.
    #[must_use]
    pub fn build(self) -> HandlerRegistry { self.registry }
}

#[cfg(test)]
mod tests {
    use crate::{handler, message, service::EmptyServiceResolver};

    use super::*;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct BaseMsg;
    #[derive(serde::Serialize, serde::Deserialize)]
    struct DerivedMsg;
    message!(BaseMsg);
    message!(DerivedMsg, ["BaseMsg"]);

    struct NoopHandler;

    #[async_trait::async_trait]
    impl crate::handler::Handler<BaseMsg> for NoopHandler {
        async fn handle(&mut self, _message: &BaseMsg, _data: &crate::dispatch_data::DispatchData) -> crate::dispatch_result::DispatchResult {
            crate::dispatch_result::DispatchResult::success_ack()
        }
    }

    #[test]
    fn register_then_snapshot_sees_the_registration() {
        let registry = HandlerRegistry::new();
        assert!(registry.snapshot().is_empty());
        let factory = handler::factory::<BaseMsg, _, _>(|_resolver| NoopHandler);
        registry.register::<BaseMsg>(HandlerConfig::new(), factory);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let handlers = snapshot.get_handlers(DerivedMsg::type_hierarchy());
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].message_type, "BaseMsg");
    }

    #[test]
    fn tiers_group_by_hierarchy_position() {
        let registry = HandlerRegistry::new();
        registry.register::<BaseMsg>(HandlerConfig::new(), handler::factory::<BaseMsg, _, _>(|_resolver| NoopHandler));
        let snapshot = registry.snapshot();
        let tiers = snapshot.tiers(DerivedMsg::type_hierarchy());
        assert_eq!(tiers.len(), 2); // ["DerivedMsg", "BaseMsg"]
        assert!(tiers[0].is_empty());
        assert_eq!(tiers[1].len(), 1);
    }

    #[test]
    fn unregister_removes_from_the_next_snapshot() {
        let registry = HandlerRegistry::new();
        let id = registry.register::<BaseMsg>(HandlerConfig::new(), handler::factory::<BaseMsg, _, _>(|_resolver| NoopHandler));
        assert_eq!(registry.snapshot().len(), 1);
        registry.unregister(id);
        assert_eq!(registry.snapshot().len(), 0);
    }

    #[tokio::test]
    async fn change_notification_fires_on_mutation() {
        let registry = HandlerRegistry::new();
        let mut rx = registry.subscribe();
        registry.register::<BaseMsg>(HandlerConfig::new(), handler::factory::<BaseMsg, _, _>(|_resolver| NoopHandler));
        rx.changed().await.expect("registry still alive");
    }

    #[test]
    fn publish_only_handlers_are_still_returned_by_get_handlers() {
        let registry = HandlerRegistry::new();
        registry.register::<BaseMsg>(
            HandlerConfig::new().publish_only(),
            handler::factory::<BaseMsg, _, _>(|_resolver| NoopHandler),
        );
        let snapshot = registry.snapshot();
        let handlers = snapshot.get_handlers(BaseMsg::type_hierarchy());
        assert_eq!(handlers.len(), 1);
        assert!(handlers[0].config.publish_only);
        let _ = EmptyServiceResolver;
    }
}
