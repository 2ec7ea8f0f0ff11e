//! Turn a [`ChannelMessage`] into the exact request body sent to a remote
//! function.

use courier_core::{ChannelMessage, DispatchRequest, IdempotencyKey, PayloadError};
use minijinja::{Environment, UndefinedBehavior, Value};

/// Upper bound on template evaluation work.
const FUEL_LIMIT: u64 = 100_000;

/// Characters of rendered content kept for the automation log.
pub const PREVIEW_CHARS: usize = 500;

/// A validated, rendered request plus a short preview for auditing.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub request: DispatchRequest,
    /// Rendered content, truncated to [`PREVIEW_CHARS`].
    pub preview: String,
}

/// Validate `message` and render its inline subject and body.
///
/// Inline text is rendered locally with strict undefined handling, so a
/// missing parameter or a syntax error becomes a [`PayloadError::Template`]
/// before any remote call. Remote templates (`template_id`) are forwarded
/// with their parameters untouched. Every call gets a fresh `request_id`.
pub fn render_request(
    message: &ChannelMessage,
    idempotency_key: &IdempotencyKey,
) -> Result<RenderedMessage, PayloadError> {
    message.validate()?;

    let params = message.template_params();
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_fuel(Some(FUEL_LIMIT));
    let ctx = Value::from_serialize(params);

    let render = |source: Option<&str>| -> Result<Option<String>, PayloadError> {
        source
            .map(|src| {
                env.render_str(src, ctx.clone())
                    .map_err(|e| PayloadError::Template(e.to_string()))
            })
            .transpose()
    };
    let subject = render(message.subject())?;
    let body = render(message.body())?;

    let preview = preview(message, subject.as_deref(), body.as_deref());
    let request = DispatchRequest {
        channel: message.channel(),
        recipients: message.recipients().to_vec(),
        template_id: message.template_id().map(str::to_owned),
        subject,
        body,
        template_params: (!params.is_empty()).then(|| params.clone()),
        request_id: uuid::Uuid::new_v4().to_string(),
        idempotency_key: idempotency_key.clone(),
        action: None,
    };
    Ok(RenderedMessage { request, preview })
}

fn preview(message: &ChannelMessage, subject: Option<&str>, body: Option<&str>) -> String {
    let text = match (subject, body) {
        (Some(subject), Some(body)) => format!("{subject}\n\n{body}"),
        (None, Some(body)) => body.to_owned(),
        (Some(subject), None) => subject.to_owned(),
        (None, None) => {
            let params = serde_json::Value::Object(message.template_params().clone());
            format!(
                "template:{} {params}",
                message.template_id().unwrap_or_default()
            )
        }
    };
    truncate_chars(&text, PREVIEW_CHARS)
}

/// Truncate on a character boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}
