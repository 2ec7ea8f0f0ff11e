//! Minimal RFC 4180 writer for operator exports.

use std::borrow::Cow;

use courier_audit::AutomationLogEntry;

/// Quote `field` if it contains a comma, quote, CR or LF.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Append one CRLF-terminated record.
pub fn write_record<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(field.as_ref()));
    }
    out.push_str("\r\n");
}

const LOG_HEADER: [&str; 14] = [
    "id",
    "automation_id",
    "profile_id",
    "channel",
    "status",
    "recipient_info",
    "external_id",
    "error_message",
    "retry_count",
    "executed_at",
    "delivered_at",
    "read_at",
    "message_content",
    "metadata",
];

/// Render log rows as CSV with a header line.
pub fn log_entries_to_csv(entries: &[AutomationLogEntry]) -> String {
    let mut out = String::new();
    write_record(&mut out, &LOG_HEADER);
    for entry in entries {
        write_record(
            &mut out,
            &[
                entry.id.clone(),
                opt(entry.automation_id.as_ref().map(|a| a.as_str())),
                opt(entry.profile_id.as_deref()),
                entry.channel.to_string(),
                entry.status.to_string(),
                entry.recipient_info.clone(),
                opt(entry.external_id.as_deref()),
                opt(entry.error_message.as_deref()),
                entry.retry_count.to_string(),
                entry.executed_at.to_rfc3339(),
                entry.delivered_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                entry.read_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                entry.message_content.clone(),
                entry.metadata.to_string(),
            ],
        );
    }
    out
}

pub(crate) fn opt(value: Option<&str>) -> String {
    value.unwrap_or_default().to_owned()
}
