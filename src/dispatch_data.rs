//! The immutable dispatch envelope: a typed message plus an opaque
//! string-keyed data bag, built only through [`DispatchDataBuilder`].

use std::{any::Any, sync::Arc};

use serde_json::Value;
use thiserror::Error;

use crate::{data::DataBag, message::Message};

/// Object-safe surface a [`MessagePayload::Typed`] message exposes: a
/// downcast target plus, where the concrete type allows it, its own wire
/// form. [`Message`]'s `Serialize` bound can't appear directly on a `dyn`
/// trait object, so this is the erased substitute
/// [`crate::codec::ResultCodec::encode_data`] and [`DispatchData::downcast_ref`]
/// actually operate on.
pub trait ErasedMessage: Any + Send + Sync {
    /// This message as `dyn Any`, for [`DispatchData::downcast_ref`].
    fn as_any(&self) -> &dyn Any;

    /// This message's wire form, or `None` if serialisation fails.
    fn to_wire(&self) -> Option<Value>;
}

impl<T: Message> ErasedMessage for T {
    fn as_any(&self) -> &dyn Any { self }

    fn to_wire(&self) -> Option<Value> { serde_json::to_value(self).ok() }
}

/// Errors returned while building a [`DispatchData`] envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchDataError {
    /// The message type name was empty, or one of the reserved names a
    /// concrete dispatchable message may never use (`"void"`, `"object"`).
    #[error("message type name {0:?} is not a valid dispatch message type")]
    InvalidMessageType(String),
}

const RESERVED_TYPE_NAMES: [&str; 2] = ["void", "object"];

fn validate_type_name(name: &str) -> Result<(), DispatchDataError> {
    let lower = name.to_ascii_lowercase();
    if name.is_empty() || RESERVED_TYPE_NAMES.contains(&lower.as_str()) {
        return Err(DispatchDataError::InvalidMessageType(name.to_owned()));
    }
    Ok(())
}

/// The message carried by a [`DispatchData`] envelope.
///
/// `Typed` holds a concrete, locally constructed Rust value reachable by
/// `downcast_ref`. `Encoded` is what a [`crate::codec::ResultCodec`] produces
/// when it deserialises a dispatch envelope whose declared message type is
/// unknown to the local type resolver — preserving `message_type` and `data`
/// while representing the message itself generically.
#[derive(Clone)]
pub enum MessagePayload {
    /// A concrete, locally typed message.
    Typed(Arc<dyn ErasedMessage>),
    /// A generic carrier used when the concrete type could not be resolved.
    Encoded(Value),
}

/// An immutable `(messageType, message)` pair plus an opaque data bag.
///
/// Construction is always validated (see [`DispatchDataError`]); mutation
/// after construction is not possible — use [`DispatchDataBuilder`] to derive
/// a new envelope from an existing one.
#[derive(Clone)]
pub struct DispatchData {
    message_type: String,
    hierarchy: Vec<String>,
    message: MessagePayload,
    data: DataBag,
}

impl DispatchData {
    /// The declared message type name.
    #[must_use]
    pub fn message_type(&self) -> &str { &self.message_type }

    /// This envelope's type hierarchy, most-derived first, used to drive
    /// [`crate::registry::HandlerProvider`] route descent (spec §4.4). A
    /// typed envelope built through [`Self::builder_for`] carries its
    /// compile-time-declared [`Message::type_hierarchy`]; an encoded or
    /// remote-decoded envelope has only its own declared name, a single-tier
    /// hierarchy.
    #[must_use]
    pub fn hierarchy(&self) -> &[String] { &self.hierarchy }

    /// The message payload.
    #[must_use]
    pub const fn message(&self) -> &MessagePayload { &self.message }

    /// Downcast the message to a concrete type, if it is locally typed and
    /// matches `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match &self.message {
            MessagePayload::Typed(erased) => erased.as_any().downcast_ref::<T>(),
            MessagePayload::Encoded(_) => None,
        }
    }

    /// Fetch a data value by key, returning a `null` sentinel rather than
    /// `None` when the key is absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &Value { self.data.get(key) }

    /// Iterate the data bag's entries in stable (lexicographic) key order.
    pub fn iter_data(&self) -> impl Iterator<Item = (&str, &Value)> { self.data.iter() }

    /// Start building a fresh envelope around a concrete, locally typed
    /// message.
    #[must_use]
    pub fn builder_for<T: Message>(message: T) -> DispatchDataBuilder {
        DispatchDataBuilder {
            message_type: T::type_name().to_owned(),
            hierarchy: T::type_hierarchy().iter().map(|name| (*name).to_owned()).collect(),
            message: MessagePayload::Typed(Arc::new(message)),
            data: DataBag::new(),
        }
    }

    /// Start building an envelope around a generically encoded message,
    /// typically produced by a [`crate::codec::ResultCodec`] when the
    /// concrete type is not known locally.
    #[must_use]
    pub fn builder_for_encoded(message_type: impl Into<String>, message: Value) -> DispatchDataBuilder {
        let message_type = message_type.into();
        DispatchDataBuilder {
            hierarchy: vec![message_type.clone()],
            message_type,
            message: MessagePayload::Encoded(message),
            data: DataBag::new(),
        }
    }

    /// Start building an envelope around a message payload already resolved
    /// to either form, used by [`crate::codec::ResultCodec`] when its
    /// [`crate::codec::MessageTypeResolver`] successfully reconstructs a
    /// concrete type.
    #[must_use]
    pub(crate) fn builder_for_payload(message_type: impl Into<String>, message: MessagePayload) -> DispatchDataBuilder {
        let message_type = message_type.into();
        DispatchDataBuilder {
            hierarchy: vec![message_type.clone()],
            message_type,
            message,
            data: DataBag::new(),
        }
    }

    /// Derive a builder pre-populated with this envelope's contents, for
    /// producing a modified copy.
    #[must_use]
    pub fn to_builder(&self) -> DispatchDataBuilder {
        DispatchDataBuilder {
            message_type: self.message_type.clone(),
            hierarchy: self.hierarchy.clone(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

/// Builder that validates and produces a fresh, immutable [`DispatchData`].
pub struct DispatchDataBuilder {
    message_type: String,
    hierarchy: Vec<String>,
    message: MessagePayload,
    data: DataBag,
}

impl DispatchDataBuilder {
    /// Set a data-bag entry, overwriting any previous value for `key`.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key, value);
        self
    }

    /// Validate and produce the immutable envelope.
    ///
    /// # Errors
    /// Returns [`DispatchDataError::InvalidMessageType`] if the message type
    /// name is empty or reserved.
    pub fn build(self) -> Result<DispatchData, DispatchDataError> {
        validate_type_name(&self.message_type)?;
        Ok(DispatchData {
            message_type: self.message_type,
            hierarchy: self.hierarchy,
            message: self.message,
            data: self.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::message;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Ping(pub u32);
    message!(Ping);

    #[test]
    fn builds_a_typed_envelope_and_downcasts() {
        let data = DispatchData::builder_for(Ping(7))
            .with_data("trace-id", Value::String("abc".into()))
            .build()
            .expect("valid envelope");
        assert_eq!(data.message_type(), "Ping");
        assert_eq!(data.downcast_ref::<Ping>().map(|p| p.0), Some(7));
        assert_eq!(data.get("trace-id"), &Value::String("abc".into()));
    }

    #[test]
    fn missing_data_key_returns_null_sentinel() {
        let data = DispatchData::builder_for(Ping(1)).build().expect("valid envelope");
        assert_eq!(data.get("absent"), &Value::Null);
    }

    #[rstest]
    #[case("")]
    #[case("void")]
    #[case("Void")]
    #[case("object")]
    fn rejects_reserved_or_empty_type_names(#[case] name: &str) {
        let err = DispatchData::builder_for_encoded(name, Value::Null)
            .build()
            .expect_err("should reject");
        assert!(matches!(err, DispatchDataError::InvalidMessageType(_)));
    }

    #[test]
    fn to_builder_preserves_contents_for_a_modified_copy() {
        let original = DispatchData::builder_for(Ping(1))
            .with_data("k", Value::from(1))
            .build()
            .expect("valid envelope");
        let modified = original.to_builder().with_data("k", Value::from(2)).build().expect("valid envelope");
        assert_eq!(original.get("k"), &Value::from(1));
        assert_eq!(modified.get("k"), &Value::from(2));
    }
}
