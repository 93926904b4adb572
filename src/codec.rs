//! Self-describing wire serialisation for [`DispatchData`] and
//! [`DispatchResult`] (spec §6's "Result envelope").
//!
//! The format is a JSON tree carrying a nominal type tag for the message (or,
//! for a result, a discriminator string for the variant) so a peer that
//! does not know the concrete Rust type can still preserve `is_success`,
//! `message`, and `data` (spec §8: "unknown types downgrade to an
//! object-typed carrier while preserving `data` and `message`").

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::{
    data::DataBag,
    dispatch_data::{DispatchData, DispatchDataError, MessagePayload},
    dispatch_result::{DispatchException, DispatchResult, TypedValue, ValidationEntry},
    message::Message,
};

/// Errors encoding or decoding a dispatch envelope or result.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The JSON tree was missing a required field or had the wrong shape.
    #[error("malformed wire envelope: {0}")]
    Malformed(&'static str),
    /// The discriminator tag did not match any known result variant.
    #[error("unknown result variant tag: {0}")]
    UnknownVariant(String),
    /// The decoded envelope failed [`DispatchData`]'s own validation.
    #[error("invalid dispatch data: {0}")]
    InvalidData(#[from] DispatchDataError),
    /// A JSON (de)serialisation error from the underlying `serde_json` call.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolves a nominal message type name to a concrete local Rust type while
/// decoding a [`DispatchData`] envelope a peer sent.
///
/// When resolution fails (the local process has no handler or type
/// registered under that name), the codec falls back to
/// [`MessagePayload::Encoded`], matching spec §4.6 point 5: "results whose
/// declared type is unknown to the local type resolver deserialise into a
/// generic `DispatchResult` preserving `isSuccess`, `message`, `data`".
pub trait MessageTypeResolver: Send + Sync {
    /// Attempt to decode `json` into the concrete type registered under
    /// `message_type`, returning `None` if nothing is registered or
    /// decoding into that type fails.
    fn decode(&self, message_type: &str, json: &Value) -> Option<MessagePayload>;
}

/// A [`MessageTypeResolver`] that never resolves anything, for peers that
/// only need the generic `Encoded` fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTypeResolver;

impl MessageTypeResolver for NullTypeResolver {
    fn decode(&self, _message_type: &str, _json: &Value) -> Option<MessagePayload> { None }
}

/// A [`MessageTypeResolver`] that reconstructs a concrete [`Message`] type
/// for every `M` registered with it via [`Self::register`], falling back to
/// [`MessagePayload::Encoded`] for any other type name (spec §4.6 point 5's
/// pluggable type resolver).
#[derive(Default)]
pub struct TypeRegistry {
    decoders: HashMap<&'static str, Box<dyn Fn(&Value) -> Option<MessagePayload> + Send + Sync>>,
}

impl TypeRegistry {
    /// An empty registry, resolving nothing until populated by
    /// [`Self::register`].
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `M` so a wire payload declaring its type name decodes into a
    /// concrete [`MessagePayload::Typed`] value.
    #[must_use]
    pub fn register<M: Message>(mut self) -> Self {
        self.decoders.insert(
            M::type_name(),
            Box::new(|json| serde_json::from_value::<M>(json.clone()).ok().map(|message| MessagePayload::Typed(Arc::new(message)))),
        );
        self
    }
}

impl MessageTypeResolver for TypeRegistry {
    fn decode(&self, message_type: &str, json: &Value) -> Option<MessagePayload> {
        self.decoders.get(message_type).and_then(|decode| decode(json))
    }
}

fn data_bag_to_json(data: &DataBag) -> Value {
    Value::Object(data.iter().map(|(key, value)| (key.to_owned(), value.clone())).collect())
}

fn data_bag_from_json(value: Option<&Value>) -> DataBag {
    match value.and_then(Value::as_object) {
        Some(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        None => DataBag::new(),
    }
}

/// Serialises and parses the wire form of [`DispatchData`] and
/// [`DispatchResult`].
#[derive(Default)]
pub struct ResultCodec;

impl ResultCodec {
    /// Construct a codec.
    #[must_use]
    pub const fn new() -> Self { Self }

    /// Encode a dispatch envelope to its JSON wire form.
    #[must_use]
    pub fn encode_data(&self, data: &DispatchData) -> Value {
        let message = match data.message() {
            MessagePayload::Encoded(value) => value.clone(),
            MessagePayload::Typed(erased) => erased.to_wire().unwrap_or(Value::Null),
        };
        let data_object: Map<String, Value> = data.iter_data().map(|(key, value)| (key.to_owned(), value.clone())).collect();
        json!({
            "messageType": data.message_type(),
            "message": message,
            "data": Value::Object(data_object),
        })
    }

    /// Decode a dispatch envelope previously produced by
    /// [`Self::encode_data`], consulting `resolver` to reconstruct the
    /// concrete message type when possible.
    ///
    /// # Errors
    /// Returns [`CodecError::Malformed`] if the JSON tree is missing the
    /// `messageType` field, and [`CodecError::InvalidData`] if the decoded
    /// envelope fails [`DispatchData`]'s own validation.
    pub fn decode_data(&self, value: &Value, resolver: &dyn MessageTypeResolver) -> Result<DispatchData, CodecError> {
        let message_type = value
            .get("messageType")
            .and_then(Value::as_str)
            .ok_or(CodecError::Malformed("missing messageType"))?;
        let message_json = value.get("message").cloned().unwrap_or(Value::Null);
        let payload = resolver
            .decode(message_type, &message_json)
            .unwrap_or(MessagePayload::Encoded(message_json));
        let mut builder = DispatchData::builder_for_payload(message_type.to_owned(), payload);
        for (key, entry) in data_bag_from_json(value.get("data")).iter() {
            builder = builder.with_data(key.to_owned(), entry.clone());
        }
        Ok(builder.build()?)
    }

    /// Encode a dispatch result to its JSON wire form.
    #[must_use]
    pub fn encode_result(&self, result: &DispatchResult) -> Value {
        match result {
            DispatchResult::Success { message, data, value } => json!({
                "variant": "success",
                "message": message,
                "data": data_bag_to_json(data),
                "value": value.as_ref().and_then(TypedValue::wire).map(|(type_name, json)| json!({"typeName": type_name, "value": json})),
            }),
            DispatchResult::Failure { message, data, exception } => json!({
                "variant": "failure",
                "message": message,
                "data": data_bag_to_json(data),
                "exception": exception.as_ref().map(encode_exception),
            }),
            DispatchResult::ValidationFailure { results } => json!({
                "variant": "validationFailure",
                "results": results.iter().map(|entry| json!({"fieldName": entry.field_name, "message": entry.message})).collect::<Vec<_>>(),
            }),
            DispatchResult::EntityNotFound { entity_type_name, id } => json!({
                "variant": "entityNotFound",
                "entityTypeName": entity_type_name,
                "id": id,
            }),
            DispatchResult::EntityAlreadyPresent { entity_type_name, id } => json!({
                "variant": "entityAlreadyPresent",
                "entityTypeName": entity_type_name,
                "id": id,
            }),
            DispatchResult::NotFound { message, data } => json!({
                "variant": "notFound",
                "message": message,
                "data": data_bag_to_json(data),
            }),
            DispatchResult::DispatchFailure { message_type_name } => json!({
                "variant": "dispatchFailure",
                "messageTypeName": message_type_name,
            }),
            DispatchResult::Timeout { due_time } => json!({
                "variant": "timeout",
                "dueTimeMs": due_time.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            }),
            DispatchResult::Aggregate { children, overrides } => json!({
                "variant": "aggregate",
                "children": children.iter().map(|child| self.encode_result(child)).collect::<Vec<_>>(),
                "overrides": data_bag_to_json(overrides),
            }),
        }
    }

    /// Decode a dispatch result previously produced by
    /// [`Self::encode_result`].
    ///
    /// # Errors
    /// Returns [`CodecError::Malformed`] if a required field for the
    /// decoded variant is missing, and [`CodecError::UnknownVariant`] if the
    /// `variant` tag is not one this codec recognises (spec's
    /// `ResultCodec` never silently drops an unrecognised result; the
    /// caller decides how to treat the error).
    pub fn decode_result(&self, value: &Value) -> Result<DispatchResult, CodecError> {
        let variant = value
            .get("variant")
            .and_then(Value::as_str)
            .ok_or(CodecError::Malformed("missing variant tag"))?;
        match variant {
            "success" => Ok(DispatchResult::Success {
                message: string_field(value, "message")?,
                data: data_bag_from_json(value.get("data")),
                value: value.get("value").and_then(Value::as_object).map(decode_wire_value),
            }),
            "failure" => Ok(DispatchResult::Failure {
                message: string_field(value, "message")?,
                data: data_bag_from_json(value.get("data")),
                exception: value.get("exception").and_then(Value::as_object).map(decode_exception),
            }),
            "validationFailure" => {
                let results = value
                    .get("results")
                    .and_then(Value::as_array)
                    .ok_or(CodecError::Malformed("missing validationFailure results"))?
                    .iter()
                    .filter_map(|entry| {
                        let field_name = entry.get("fieldName")?.as_str()?.to_owned();
                        let message = entry.get("message")?.as_str()?.to_owned();
                        Some(ValidationEntry::new(field_name, message))
                    })
                    .collect();
                Ok(DispatchResult::ValidationFailure { results })
            }
            "entityNotFound" => Ok(DispatchResult::EntityNotFound {
                entity_type_name: optional_string_field(value, "entityTypeName"),
                id: optional_string_field(value, "id"),
            }),
            "entityAlreadyPresent" => Ok(DispatchResult::EntityAlreadyPresent {
                entity_type_name: optional_string_field(value, "entityTypeName"),
                id: optional_string_field(value, "id"),
            }),
            "notFound" => Ok(DispatchResult::NotFound {
                message: string_field(value, "message")?,
                data: data_bag_from_json(value.get("data")),
            }),
            "dispatchFailure" => Ok(DispatchResult::DispatchFailure {
                message_type_name: string_field(value, "messageTypeName")?,
            }),
            "timeout" => Ok(DispatchResult::Timeout {
                due_time: value.get("dueTimeMs").and_then(Value::as_u64).map(Duration::from_millis),
            }),
            "aggregate" => {
                let children = value
                    .get("children")
                    .and_then(Value::as_array)
                    .ok_or(CodecError::Malformed("missing aggregate children"))?
                    .iter()
                    .map(|child| self.decode_result(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DispatchResult::aggregate_with_overrides(children, data_bag_from_json(value.get("overrides"))))
            }
            other => Err(CodecError::UnknownVariant(other.to_owned())),
        }
    }
}

fn string_field(value: &Value, field: &'static str) -> Result<String, CodecError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(CodecError::Malformed(field))
}

fn optional_string_field(value: &Value, field: &str) -> Option<String> { value.get(field).and_then(Value::as_str).map(str::to_owned) }

fn encode_exception(exception: &DispatchException) -> Value {
    json!({
        "typeName": exception.type_name,
        "message": exception.message,
        "stackTrace": exception.stack_trace,
    })
}

fn decode_exception(map: &Map<String, Value>) -> DispatchException {
    DispatchException {
        type_name: map.get("typeName").and_then(Value::as_str).unwrap_or("Unknown").to_owned(),
        message: map.get("message").and_then(Value::as_str).unwrap_or_default().to_owned(),
        stack_trace: map.get("stackTrace").and_then(Value::as_str).map(str::to_owned),
    }
}

fn decode_wire_value(map: &Map<String, Value>) -> TypedValue {
    let type_name = map.get("typeName").and_then(Value::as_str).unwrap_or("Unknown").to_owned();
    let json = map.get("value").cloned().unwrap_or(Value::Null);
    TypedValue::serializable(json.clone(), type_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Ping(u32);
    message!(Ping);

    #[test]
    fn typed_dispatch_data_round_trips_through_a_registered_type() {
        let data = DispatchData::builder_for(Ping(7)).with_data("trace-id", Value::from("abc")).build().expect("valid envelope");
        let codec = ResultCodec::new();
        let wire = codec.encode_data(&data);
        assert_ne!(wire["message"], Value::Null, "Typed payload must survive encoding, not collapse to null");
        let resolver = TypeRegistry::new().register::<Ping>();
        let decoded = codec.decode_data(&wire, &resolver).expect("decode");
        assert_eq!(decoded.message_type(), "Ping");
        assert_eq!(decoded.downcast_ref::<Ping>().map(|p| p.0), Some(7));
        assert_eq!(decoded.get("trace-id"), &Value::from("abc"));
    }

    #[test]
    fn typed_dispatch_data_falls_back_to_encoded_without_a_matching_registration() {
        let data = DispatchData::builder_for(Ping(7)).build().expect("valid envelope");
        let codec = ResultCodec::new();
        let wire = codec.encode_data(&data);
        let decoded = codec.decode_data(&wire, &NullTypeResolver).expect("decode");
        assert!(matches!(decoded.message(), MessagePayload::Encoded(_)));
    }

    #[test]
    fn encoded_dispatch_data_round_trips_through_the_generic_fallback() {
        let data = DispatchData::builder_for_encoded("Ping", json!({"count": 3}))
            .with_data("trace-id", Value::from("abc"))
            .build()
            .expect("valid envelope");
        let codec = ResultCodec::new();
        let wire = codec.encode_data(&data);
        let decoded = codec.decode_data(&wire, &NullTypeResolver).expect("decode");
        assert_eq!(decoded.message_type(), "Ping");
        assert_eq!(decoded.get("trace-id"), &Value::from("abc"));
    }

    #[test]
    fn unknown_message_type_downgrades_to_encoded_carrier() {
        let data = DispatchData::builder_for_encoded("SomeRemoteType", json!({"x": 1}))
            .build()
            .expect("valid envelope");
        let codec = ResultCodec::new();
        let wire = codec.encode_data(&data);
        let decoded = codec.decode_data(&wire, &NullTypeResolver).expect("decode");
        assert!(matches!(decoded.message(), MessagePayload::Encoded(_)));
        assert_eq!(decoded.message_type(), "SomeRemoteType");
    }

    #[test]
    fn success_result_round_trips() {
        let mut data = DataBag::new();
        data.insert("k", Value::from(1));
        let result = DispatchResult::Success {
            message: "ok".to_owned(),
            data,
            value: Some(TypedValue::serializable(7u32, "u32")),
        };
        let codec = ResultCodec::new();
        let wire = codec.encode_result(&result);
        let decoded = codec.decode_result(&wire).expect("decode");
        assert!(decoded.is_success());
        assert_eq!(decoded.message(), "ok");
        assert_eq!(decoded.data().get("k"), &Value::from(1));
    }

    #[test]
    fn dispatch_failure_round_trips() {
        let result = DispatchResult::DispatchFailure {
            message_type_name: "Ping".to_owned(),
        };
        let codec = ResultCodec::new();
        let decoded = codec.decode_result(&codec.encode_result(&result)).expect("decode");
        assert!(!decoded.is_success());
        assert!(decoded.is_dispatch_failure());
    }

    #[test]
    fn aggregate_round_trips_with_overrides() {
        let mut overrides = DataBag::new();
        overrides.insert("extra", Value::from(true));
        let result = DispatchResult::aggregate_with_overrides(vec![DispatchResult::success_ack()], overrides);
        let codec = ResultCodec::new();
        let decoded = codec.decode_result(&codec.encode_result(&result)).expect("decode");
        assert!(decoded.is_success());
        assert_eq!(decoded.data().get("extra"), &Value::from(true));
    }

    #[test]
    fn unknown_variant_tag_is_an_error_not_a_silent_drop() {
        let codec = ResultCodec::new();
        let err = codec.decode_result(&json!({"variant": "somethingNew"})).expect_err("should fail");
        assert!(matches!(err, CodecError::UnknownVariant(_)));
    }
}
