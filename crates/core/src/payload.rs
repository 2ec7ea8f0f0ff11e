//! Typed event payloads.
//!
//! A queued action carries an [`EventPayload`] whose `message` is tagged by
//! channel. Validation runs at enqueue time and again right before a call,
//! so a malformed payload is a permanent failure and never reaches the
//! remote function.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::channel::Channel;
use crate::error::PayloadError;
use crate::types::AutomationId;

/// Longest SMS body accepted before rendering (ten concatenated segments).
pub const MAX_SMS_BODY_CHARS: usize = 1600;

/// Structured payload stored on every `PendingAction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Automation that produced the action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_id: Option<AutomationId>,
    /// Recipient profile in the business domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    /// The channel-specific message.
    pub message: ChannelMessage,
}

impl EventPayload {
    pub fn new(message: ChannelMessage) -> Self {
        Self {
            automation_id: None,
            profile_id: None,
            message,
        }
    }

    #[must_use]
    pub fn with_automation(mut self, automation_id: impl Into<AutomationId>) -> Self {
        self.automation_id = Some(automation_id.into());
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile_id: impl Into<String>) -> Self {
        self.profile_id = Some(profile_id.into());
        self
    }

    pub fn channel(&self) -> Channel {
        self.message.channel()
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        self.message.validate()
    }
}

/// A message addressed on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ChannelMessage {
    Email(EmailMessage),
    Whatsapp(WhatsappMessage),
    Sms(SmsMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub template_params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhatsappMessage {
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub template_params: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmsMessage {
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub template_params: Map<String, Value>,
}

impl ChannelMessage {
    /// Build a message with only a recipient and an inline body/subject.
    pub fn inline(
        channel: Channel,
        recipient: impl Into<String>,
        subject: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        let to = vec![recipient.into()];
        let body = Some(body.into());
        match channel {
            Channel::Email => Self::Email(EmailMessage {
                to,
                subject,
                body,
                ..EmailMessage::default()
            }),
            Channel::Whatsapp => Self::Whatsapp(WhatsappMessage {
                to,
                body,
                ..WhatsappMessage::default()
            }),
            Channel::Sms => Self::Sms(SmsMessage {
                to,
                body,
                ..SmsMessage::default()
            }),
        }
    }

    /// Build a message that references a remote template.
    pub fn templated(
        channel: Channel,
        recipient: impl Into<String>,
        template_id: impl Into<String>,
        template_params: Map<String, Value>,
    ) -> Self {
        let to = vec![recipient.into()];
        let template_id = Some(template_id.into());
        match channel {
            Channel::Email => Self::Email(EmailMessage {
                to,
                template_id,
                template_params,
                ..EmailMessage::default()
            }),
            Channel::Whatsapp => Self::Whatsapp(WhatsappMessage {
                to,
                template_id,
                template_params,
                ..WhatsappMessage::default()
            }),
            Channel::Sms => Self::Sms(SmsMessage {
                to,
                template_id,
                template_params,
                ..SmsMessage::default()
            }),
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Email(_) => Channel::Email,
            Self::Whatsapp(_) => Channel::Whatsapp,
            Self::Sms(_) => Channel::Sms,
        }
    }

    pub fn recipients(&self) -> &[String] {
        match self {
            Self::Email(m) => &m.to,
            Self::Whatsapp(m) => &m.to,
            Self::Sms(m) => &m.to,
        }
    }

    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Email(m) => m.subject.as_deref(),
            Self::Whatsapp(_) | Self::Sms(_) => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Email(m) => m.body.as_deref(),
            Self::Whatsapp(m) => m.body.as_deref(),
            Self::Sms(m) => m.body.as_deref(),
        }
    }

    pub fn template_id(&self) -> Option<&str> {
        match self {
            Self::Email(m) => m.template_id.as_deref(),
            Self::Whatsapp(m) => m.template_id.as_deref(),
            Self::Sms(m) => m.template_id.as_deref(),
        }
    }

    pub fn template_params(&self) -> &Map<String, Value> {
        match self {
            Self::Email(m) => &m.template_params,
            Self::Whatsapp(m) => &m.template_params,
            Self::Sms(m) => &m.template_params,
        }
    }

    /// Check recipients and content for this channel.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let recipients = self.recipients();
        if recipients.is_empty() {
            return Err(PayloadError::NoRecipients);
        }
        let channel = self.channel();
        for recipient in recipients {
            let valid = match channel {
                Channel::Email => is_email(recipient),
                Channel::Whatsapp | Channel::Sms => is_phone_number(recipient),
            };
            if !valid {
                return Err(PayloadError::InvalidRecipient {
                    channel: channel.to_string(),
                    recipient: recipient.clone(),
                });
            }
        }

        let has_template = self.template_id().is_some_and(|t| !t.trim().is_empty());
        let has_body = self.body().is_some_and(|b| !b.trim().is_empty());
        if !has_template && !has_body {
            return Err(PayloadError::MissingContent);
        }

        if let Self::Sms(m) = self
            && let Some(body) = &m.body
            && body.chars().count() > MAX_SMS_BODY_CHARS
        {
            return Err(PayloadError::Invalid(format!(
                "sms body exceeds {MAX_SMS_BODY_CHARS} characters"
            )));
        }
        Ok(())
    }
}

fn is_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.contains('@')
        }
        None => false,
    }
}

fn is_phone_number(value: &str) -> bool {
    let rest = value.strip_prefix('+').unwrap_or(value);
    let mut digits = 0usize;
    for c in rest.chars() {
        match c {
            '0'..='9' => digits += 1,
            ' ' | '-' | '(' | ')' => {}
            _ => return false,
        }
    }
    (7..=15).contains(&digits)
}

/// Accept either `"to": "a@b.c"` or `"to": ["a@b.c", ...]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}
