//! The `Message` trait: the explicit, declared substitute for the reflected
//! class hierarchy a managed runtime would walk for route descent.
//!
//! A garbage-collected host can ask "what are this object's base types?" at
//! runtime. Rust has no such introspection, so a message type declares its
//! own hierarchy up front, most-derived first. `registry::HandlerRegistry`
//! walks this list exactly the way the original walks a class's base-type
//! chain: point-to-point dispatch tries the most-derived tier first and only
//! descends to a base tier when every registration at the current tier
//! returns `DispatchFailure`.

use std::any::Any;

use serde::{Serialize, de::DeserializeOwned};

/// A dispatchable message type.
///
/// `type_hierarchy` must list `Self::type_name()` first, followed by zero or
/// more base-type names in most-derived-to-most-base order. A plain message
/// with no declared base types returns a single-element slice.
///
/// `Serialize + DeserializeOwned` let a [`crate::codec::ResultCodec`] put a
/// typed message on the wire and a peer's [`crate::codec::MessageTypeResolver`]
/// reconstruct it, instead of the payload degrading to the generic `Encoded`
/// carrier on every remote dispatch (spec §8's round-trip property).
pub trait Message: Any + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// This type's name, and the names of every base type it stands in for
    /// during route descent, most-derived first.
    fn type_hierarchy() -> &'static [&'static str]
    where
        Self: Sized;

    /// This type's own name: `Self::type_hierarchy()[0]`.
    fn type_name() -> &'static str
    where
        Self: Sized,
    {
        Self::type_hierarchy().first().copied().unwrap_or("")
    }
}

/// Declare a plain [`Message`] with no base types, matching the common case
/// where a message type participates in route descent only as itself.
#[macro_export]
macro_rules! message {
    ($ty:ty) => {
        impl $crate::message::Message for $ty {
            fn type_hierarchy() -> &'static [&'static str] { &[stringify!($ty)] }
        }
    };
    ($ty:ty, [$($base:expr),+ $(,)?]) => {
        impl $crate::message::Message for $ty {
            fn type_hierarchy() -> &'static [&'static str] { &[stringify!($ty), $($base),+] }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct BaseMsg;
    #[derive(serde::Serialize, serde::Deserialize)]
    struct DerivedMsg;

    message!(BaseMsg);
    message!(DerivedMsg, ["BaseMsg"]);

    #[test]
    fn base_message_hierarchy_is_itself() {
        assert_eq!(BaseMsg::type_hierarchy(), &["BaseMsg"]);
        assert_eq!(BaseMsg::type_name(), "BaseMsg");
    }

    #[test]
    fn derived_message_hierarchy_lists_base_second() {
        assert_eq!(DerivedMsg::type_hierarchy(), &["DerivedMsg", "BaseMsg"]);
        assert_eq!(DerivedMsg::type_name(), "DerivedMsg");
    }
}
