//! The tagged outcome of routing a [`crate::dispatch_data::DispatchData`]
//! envelope through one or more handlers.
//!
//! `DispatchResult` is a sum type rather than a class hierarchy with
//! downcasts (spec §9's "Tagged `DispatchResult` variants" redesign note):
//! every variant carries `is_success`, a synthesised default `message` when
//! none was supplied, and a [`DataBag`] reachable uniformly through
//! [`DispatchResult::data`] regardless of which variant produced it.

use std::{any::Any, sync::Arc, time::Duration};

use crate::data::DataBag;

/// One `(fieldName, message)` entry in a [`DispatchResult::ValidationFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationEntry {
    /// The field that failed validation.
    pub field_name: String,
    /// A human-readable explanation of the failure.
    pub message: String,
}

impl ValidationEntry {
    /// Construct a validation entry.
    #[must_use]
    pub fn new(field_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            message: message.into(),
        }
    }
}

/// An opaque carrier for a handler exception that crossed a process
/// boundary. Local handler panics never reach here directly; the invoker
/// catches them and constructs this from the panic payload (spec §9:
/// "the exception object crosses a process boundary only through the
/// serialisation codec; on deserialisation it becomes an opaque
/// `{typeName, message, stackTrace?}` carrier").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchException {
    /// The exception's nominal type name, e.g. `"InvalidOperation"`.
    pub type_name: String,
    /// The exception's message.
    pub message: String,
    /// An optional stack trace, present only when the producing side chose
    /// to include one.
    pub stack_trace: Option<String>,
}

impl DispatchException {
    /// Construct an exception carrier with no stack trace.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    /// The canonical `InvalidOperation` exception the invoker raises for a
    /// null-sentinel or wrong-type handler factory (spec §4.5).
    #[must_use]
    pub fn invalid_operation(message: impl Into<String>) -> Self { Self::new("InvalidOperation", message) }
}

/// A handler's typed return value, reachable from a [`DispatchResult::Success`]
/// without a downcast at the call site when the caller knows the concrete
/// type (spec §3's `Success<T>{value, message, data}`).
///
/// `wire` is populated only by [`Self::serializable`], for values a
/// [`crate::codec::ResultCodec`] can actually put on the wire; a value built
/// with [`Self::new`] is reachable locally by [`Self::downcast_ref`] but
/// travels as a bare success acknowledgement across a remote dispatch.
#[derive(Clone)]
pub struct TypedValue {
    any: Arc<dyn Any + Send + Sync>,
    wire: Option<(String, serde_json::Value)>,
}

impl TypedValue {
    /// Wrap a concrete value that never needs to cross the wire.
    #[must_use]
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            any: Arc::new(value),
            wire: None,
        }
    }

    /// Wrap a concrete value that also knows how to serialise itself, under
    /// the nominal type name a remote [`crate::codec::ResultCodec`] tags it
    /// with. If serialisation fails, the value is still usable locally but
    /// is dropped (not a wire error) when the containing result crosses the
    /// transport.
    #[must_use]
    pub fn serializable<T>(value: T, type_name: impl Into<String>) -> Self
    where
        T: Any + Send + Sync + serde::Serialize,
    {
        let wire = serde_json::to_value(&value).ok().map(|json| (type_name.into(), json));
        Self {
            any: Arc::new(value),
            wire,
        }
    }

    /// Downcast to `T`, if this value was constructed from one.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> { self.any.downcast_ref::<T>() }

    /// The value's wire tag and JSON form, if it was built with
    /// [`Self::serializable`] and serialisation succeeded.
    #[must_use]
    pub fn wire(&self) -> Option<(&str, &serde_json::Value)> { self.wire.as_ref().map(|(name, json)| (name.as_str(), json)) }
}

/// Outcome of invoking one or more handlers against an envelope.
///
/// Every variant answers `is_success`, `message`, and `data` uniformly
/// through the inherent methods below; match on the variant itself only when
/// the caller needs variant-specific fields (a validation entry list, an
/// entity identifier, a due time, ...).
#[derive(Clone)]
pub enum DispatchResult {
    /// A handler produced a result, optionally carrying a typed return value.
    Success {
        /// Human-readable outcome message.
        message: String,
        /// Result-specific data.
        data: DataBag,
        /// The handler's typed return value, if it produced one beyond a
        /// bare acknowledgement.
        value: Option<TypedValue>,
    },
    /// A handler failed, either with an application message or a captured
    /// exception.
    Failure {
        /// Human-readable failure message.
        message: String,
        /// Result-specific data.
        data: DataBag,
        /// The captured exception, if the failure originated from one
        /// rather than a handler explicitly returning `Failure`.
        exception: Option<DispatchException>,
    },
    /// One or more fields failed validation (produced only by the
    /// [`crate::validation::ValidationMessageHandler`] validation shortcut).
    ValidationFailure {
        /// Per-field validation failures.
        results: Vec<ValidationEntry>,
    },
    /// The dispatch referenced an entity that does not exist.
    EntityNotFound {
        /// The entity's nominal type name, if known.
        entity_type_name: Option<String>,
        /// The entity's identifier, if known.
        id: Option<String>,
    },
    /// The dispatch attempted to create an entity that already exists.
    EntityAlreadyPresent {
        /// The entity's nominal type name, if known.
        entity_type_name: Option<String>,
        /// The entity's identifier, if known.
        id: Option<String>,
    },
    /// A handler-level "not found" distinct from routing failure: a handler
    /// ran and determined the requested resource does not exist.
    NotFound {
        /// Human-readable message.
        message: String,
        /// Result-specific data.
        data: DataBag,
    },
    /// No registration accepted the envelope for point-to-point dispatch
    /// (spec §4.4's route-descent rule; empty publish dispatch reports
    /// `Success` instead, never this variant).
    DispatchFailure {
        /// The message type name that had no accepting registration.
        message_type_name: String,
    },
    /// The dispatch did not complete within its due time.
    Timeout {
        /// The configured due time, if one was set.
        due_time: Option<Duration>,
    },
    /// The combined outcome of dispatching to every matching registration
    /// under publish semantics (spec §4.4). `is_success` is the conjunction
    /// of every child's `is_success`; `data` is a child-order-precedence
    /// merge view with `overrides` applied on top (spec §3).
    Aggregate {
        /// Per-handler outcomes, in route-descent/registration order.
        children: Vec<DispatchResult>,
        /// Values the aggregate itself contributes or removes, taking
        /// precedence over every child (a `Value::Null` entry removes the
        /// key from the merge view).
        overrides: DataBag,
    },
}

impl DispatchResult {
    /// Build a `Success` result from a typed return value, with a synthesised
    /// default message and no extra data.
    #[must_use]
    pub fn success<T: Any + Send + Sync>(value: T) -> Self {
        Self::Success {
            message: "Success".to_owned(),
            data: DataBag::new(),
            value: Some(TypedValue::new(value)),
        }
    }

    /// Build a bare `Success` result with no typed value, as produced by a
    /// handler that only acknowledges.
    #[must_use]
    pub fn success_ack() -> Self {
        Self::Success {
            message: "Success".to_owned(),
            data: DataBag::new(),
            value: None,
        }
    }

    /// Build a `Failure` result from an application message, with no
    /// captured exception.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            data: DataBag::new(),
            exception: None,
        }
    }

    /// Build a `Failure` result from a captured exception (spec §4.5 step 4:
    /// "any exception thrown inside the chain is caught and converted to
    /// `Failure{exception}`").
    #[must_use]
    pub fn failure_from_exception(exception: DispatchException) -> Self {
        Self::Failure {
            message: exception.message.clone(),
            data: DataBag::new(),
            exception: Some(exception),
        }
    }

    /// Build an aggregate result from a set of per-handler outcomes with no
    /// override data, flattening any nested aggregates so `Aggregate` never
    /// contains an `Aggregate` as a direct child.
    #[must_use]
    pub fn aggregate(children: Vec<DispatchResult>) -> Self { Self::aggregate_with_overrides(children, DataBag::new()) }

    /// As [`Self::aggregate`], but with override data that takes precedence
    /// over every child in the merge view (spec §3).
    #[must_use]
    pub fn aggregate_with_overrides(children: Vec<DispatchResult>, overrides: DataBag) -> Self {
        let mut flat = Vec::with_capacity(children.len());
        let mut flattened_overrides = DataBag::new();
        for child in children {
            match child {
                Self::Aggregate {
                    children: nested,
                    overrides: nested_overrides,
                } => {
                    flat.extend(nested);
                    flattened_overrides = DataBag::first_wins([&flattened_overrides, &nested_overrides]);
                }
                other => flat.push(other),
            }
        }
        let overrides = flattened_overrides.merged_with_overrides(&overrides);
        Self::Aggregate { children: flat, overrides }
    }

    /// Whether this result represents a successful dispatch. For an
    /// aggregate, every child must succeed (spec §8's quantified invariant).
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Success { .. } => true,
            Self::Failure { .. }
            | Self::ValidationFailure { .. }
            | Self::EntityNotFound { .. }
            | Self::EntityAlreadyPresent { .. }
            | Self::NotFound { .. }
            | Self::DispatchFailure { .. }
            | Self::Timeout { .. } => false,
            Self::Aggregate { children, .. } => children.iter().all(Self::is_success),
        }
    }

    /// The result's message, synthesising a stable default for variants that
    /// were not given one explicitly.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Success { message, .. } | Self::Failure { message, .. } | Self::NotFound { message, .. } => message.clone(),
            Self::ValidationFailure { results } => format!("{} field(s) failed validation", results.len()),
            Self::EntityNotFound { entity_type_name, id } => describe_entity("not found", entity_type_name, id),
            Self::EntityAlreadyPresent { entity_type_name, id } => describe_entity("already present", entity_type_name, id),
            Self::DispatchFailure { message_type_name } => format!("no handler accepted message type {message_type_name:?}"),
            Self::Timeout { due_time: Some(due) } => format!("dispatch timed out after {due:?}"),
            Self::Timeout { due_time: None } => "dispatch timed out".to_owned(),
            Self::Aggregate { children, .. } => format!("aggregate of {} result(s)", children.len()),
        }
    }

    /// The result's data bag. For an aggregate, this is the child-order
    /// merge view with `overrides` applied (spec §3/§8).
    #[must_use]
    pub fn data(&self) -> DataBag {
        match self {
            Self::Success { data, .. } | Self::Failure { data, .. } | Self::NotFound { data, .. } => data.clone(),
            Self::ValidationFailure { .. }
            | Self::EntityNotFound { .. }
            | Self::EntityAlreadyPresent { .. }
            | Self::DispatchFailure { .. }
            | Self::Timeout { .. } => DataBag::new(),
            Self::Aggregate { children, overrides } => {
                let child_data: Vec<DataBag> = children.iter().map(Self::data).collect();
                DataBag::first_wins(child_data.iter()).merged_with_overrides(overrides)
            }
        }
    }

    /// Whether no registration accepted the envelope at all.
    #[must_use]
    pub fn is_dispatch_failure(&self) -> bool {
        match self {
            Self::DispatchFailure { .. } => true,
            Self::Aggregate { children, .. } => !children.is_empty() && children.iter().all(Self::is_dispatch_failure),
            _ => false,
        }
    }

    /// Iterate every successful envelope's typed value contained in this
    /// result, including (recursively) those nested inside an aggregate.
    pub fn successes(&self) -> impl Iterator<Item = &TypedValue> {
        let mut out = Vec::new();
        self.collect_successes(&mut out);
        out.into_iter()
    }

    fn collect_successes<'a>(&'a self, out: &mut Vec<&'a TypedValue>) {
        match self {
            Self::Success { value: Some(value), .. } => out.push(value),
            Self::Aggregate { children, .. } => {
                for child in children {
                    child.collect_successes(out);
                }
            }
            _ => {}
        }
    }
}

fn describe_entity(suffix: &str, entity_type_name: &Option<String>, id: &Option<String>) -> String {
    match (entity_type_name, id) {
        (Some(name), Some(id)) => format!("entity {name} {id:?} {suffix}"),
        (Some(name), None) => format!("entity {name} {suffix}"),
        (None, Some(id)) => format!("entity {id:?} {suffix}"),
        (None, None) => format!("entity {suffix}"),
    }
}
