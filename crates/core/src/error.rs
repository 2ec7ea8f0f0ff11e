use thiserror::Error;

/// Errors raised while validating or rendering an event payload.
///
/// Every variant describes a permanent failure: retrying the same payload
/// can never succeed, so dispatch sends these straight to the dead-letter
/// state without calling the remote function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    /// The message has no recipients.
    #[error("message has no recipients")]
    NoRecipients,

    /// A recipient address is not valid for the channel.
    #[error("invalid {channel} recipient: {recipient}")]
    InvalidRecipient {
        /// Channel the recipient was addressed on.
        channel: String,
        /// The offending recipient.
        recipient: String,
    },

    /// Neither a template id nor an inline body was provided.
    #[error("message needs either a template_id or a body")]
    MissingContent,

    /// A subject or body template failed to parse or render.
    #[error("malformed template: {0}")]
    Template(String),

    /// A structural field is invalid.
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Error returned when parsing an enum from its string form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    /// Name of the enum being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}
