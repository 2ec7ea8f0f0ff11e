use std::fmt;

use courier_core::{FunctionReply, PayloadError};
use courier_provider::ProviderError;
use serde_json::Value;

/// Whether a failed attempt is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Timeout, transport error, 5xx, 429, or function not deployed.
    Transient,
    /// Validation, malformed template, unknown recipient, or another 4xx.
    Permanent,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

/// The interpreted result of one remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Delivered {
        status: u16,
        external_id: Option<String>,
        body: Value,
    },
    Failed {
        class: FailureClass,
        code: String,
        message: String,
        http_status: Option<u16>,
    },
}

impl AttemptOutcome {
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            class: FailureClass::Permanent,
            code: code.into(),
            message: message.into(),
            http_status: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed { class, .. } => Some(*class),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Delivered { status, .. } => Some(*status),
            Self::Failed { http_status, .. } => *http_status,
        }
    }

    /// `"CODE: message"` for failures.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed { code, message, .. } => Some(format!("{code}: {message}")),
        }
    }
}

impl From<PayloadError> for AttemptOutcome {
    fn from(err: PayloadError) -> Self {
        let code = match err {
            PayloadError::Template(_) => "TEMPLATE",
            _ => "VALIDATION",
        };
        Self::permanent(code, err.to_string())
    }
}

/// Classify a remote call result.
pub fn classify(result: Result<FunctionReply, ProviderError>) -> AttemptOutcome {
    match result {
        Ok(reply) if reply.ok && (200..300).contains(&reply.status) => AttemptOutcome::Delivered {
            status: reply.status,
            external_id: reply.external_id(),
            body: reply.body,
        },
        Ok(reply) => AttemptOutcome::Failed {
            class: classify_status(reply.status),
            code: format!("HTTP_{}", reply.status),
            message: reply.error_message(),
            http_status: Some(reply.status),
        },
        Err(err) => AttemptOutcome::Failed {
            class: if err.is_retryable() {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            },
            code: err.code().to_owned(),
            message: err.to_string(),
            http_status: err.http_status(),
        },
    }
}

/// Classify a failing reply by the status the function reported.
///
/// A 2xx with `ok: false` means the provider looked at the request and
/// refused it, which retrying will not change. 404 means the function is
/// not deployed yet.
fn classify_status(status: u16) -> FailureClass {
    match status {
        404 | 408 | 425 | 429 | 500..=599 => FailureClass::Transient,
        200..=499 => FailureClass::Permanent,
        _ => FailureClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn class_of(result: Result<FunctionReply, ProviderError>) -> Option<FailureClass> {
        classify(result).failure_class()
    }

    #[test]
    fn ok_reply_is_delivered() {
        let outcome = classify(Ok(FunctionReply::ok(json!({"id": "m-1"}))));
        assert_eq!(
            outcome,
            AttemptOutcome::Delivered {
                status: 200,
                external_id: Some("m-1".into()),
                body: json!({"id": "m-1"}),
            }
        );
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [500, 502, 503, 504] {
            assert_eq!(
                class_of(Ok(FunctionReply::failed(status, Value::Null))),
                Some(FailureClass::Transient)
            );
        }
        assert_eq!(
            class_of(Ok(FunctionReply::failed(429, Value::Null))),
            Some(FailureClass::Transient)
        );
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 409, 422] {
            assert_eq!(
                class_of(Ok(FunctionReply::failed(status, Value::Null))),
                Some(FailureClass::Permanent),
                "status {status}"
            );
        }
    }

    #[test]
    fn not_deployed_reply_is_transient() {
        let outcome = classify(Ok(FunctionReply::failed(404, Value::Null)));
        assert_eq!(outcome.failure_class(), Some(FailureClass::Transient));
        assert_eq!(outcome.http_status(), Some(404));
    }

    #[test]
    fn ok_false_with_success_status_is_permanent() {
        let reply = FunctionReply::failed(200, json!({"error": "unknown recipient"}));
        let outcome = classify(Ok(reply));
        assert_eq!(outcome.failure_class(), Some(FailureClass::Permanent));
        assert_eq!(
            outcome.error_text().unwrap(),
            "HTTP_200: provider returned status 200: unknown recipient"
        );
    }

    #[test]
    fn transport_errors_follow_retryability() {
        assert_eq!(
            class_of(Err(ProviderError::Timeout(Duration::from_secs(1)))),
            Some(FailureClass::Transient)
        );
        assert_eq!(
            class_of(Err(ProviderError::NotDeployed("send-email".into()))),
            Some(FailureClass::Transient)
        );
        assert_eq!(
            class_of(Err(ProviderError::Configuration("bad".into()))),
            Some(FailureClass::Permanent)
        );
    }

    #[test]
    fn not_deployed_keeps_http_status() {
        let outcome = classify(Err(ProviderError::NotDeployed("send-sms".into())));
        assert_eq!(outcome.http_status(), Some(404));
    }

    #[test]
    fn payload_errors_are_permanent() {
        let outcome = AttemptOutcome::from(PayloadError::Template("boom".into()));
        assert!(matches!(
            outcome,
            AttemptOutcome::Failed { class: FailureClass::Permanent, ref code, .. } if code == "TEMPLATE"
        ));
        let outcome = AttemptOutcome::from(PayloadError::NoRecipients);
        assert!(matches!(
            outcome,
            AttemptOutcome::Failed { ref code, .. } if code == "VALIDATION"
        ));
    }
}
