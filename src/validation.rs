//! The `Validate<T>` dispatch shortcut (spec §4.6): runs only the
//! processors flagged [`crate::invoker::Processor::call_on_validation`]
//! against a message of type `T`, without ever invoking `T`'s own handler.

use std::sync::Arc;

use crate::{
    dispatch_data::{DispatchData, DispatchDataBuilder, MessagePayload},
    dispatch_result::{DispatchException, DispatchResult},
    invoker::HandlerInvoker,
    message::Message,
    registry::HandlerProvider,
};

const PREFIX: &str = "Validate<";
const SUFFIX: char = '>';

/// A request to validate `message` against `T`'s registered validation
/// processors without dispatching to `T`'s handler.
///
/// This wrapper exists for call-site ergonomics; the envelope it produces
/// (via [`validation_envelope`]) carries the message type `Validate<T>` as a
/// plain string, since [`crate::dispatch_data::DispatchData`] has no generic
/// parameter of its own to carry `T` through.
pub struct Validate<T> {
    /// The message to validate.
    pub message: T,
}

impl<T> Validate<T> {
    /// Wrap `message` for a validation dispatch.
    #[must_use]
    pub const fn new(message: T) -> Self { Self { message } }
}

/// Build the dispatch envelope for a validation dispatch of `message` (spec
/// §4.6's `Validate<T>`): the message type is `Validate<T>`, but the payload
/// is `message` itself, still downcastable to `T` by any processor that
/// wants to inspect it.
pub fn validation_envelope<T: Message>(message: T) -> DispatchDataBuilder {
    DispatchData::builder_for_payload(validation_type_name::<T>(), MessagePayload::Typed(Arc::new(message)))
}

fn validation_type_name<T: Message>() -> String { format!("{PREFIX}{}{SUFFIX}", T::type_name()) }

/// The inner message type name, if `message_type` names a validation
/// dispatch (i.e. has the form `Validate<Inner>`).
#[must_use]
pub fn inner_type_name(message_type: &str) -> Option<&str> {
    message_type.strip_prefix(PREFIX).and_then(|rest| rest.strip_suffix(SUFFIX))
}

/// Routes a validation dispatch: confirms a registration exists for the
/// inner type, then runs only the validation-flagged processors. The inner
/// type's handler is never invoked (spec §4.6: "The underlying `T` handler
/// is NOT invoked").
pub struct ValidationMessageHandler;

impl ValidationMessageHandler {
    /// Handle `data`, whose message type must be a validation dispatch.
    pub async fn handle(registrations: &HandlerProvider, invoker: &HandlerInvoker, data: &DispatchData) -> DispatchResult {
        let Some(inner_type) = inner_type_name(data.message_type()) else {
            return DispatchResult::failure_from_exception(DispatchException::invalid_operation(format!(
                "{} is not a validation dispatch",
                data.message_type()
            )));
        };
        if registrations.get_handlers(&[inner_type]).is_empty() {
            return DispatchResult::DispatchFailure { message_type_name: inner_type.to_owned() };
        }
        invoker.run_validation_processors(data).await.unwrap_or_else(DispatchResult::success_ack)
    }
}
