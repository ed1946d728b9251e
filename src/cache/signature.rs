//! Generation signature appended to statically cached HTML.

use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use time::macros::format_description;

use super::clock::{Clock, Timestamp};
use super::hooks::{ContentContext, Hook, HookError};

/// Appends `<!-- cached statically on: ..., expires on: ... -->` to HTML documents.
pub struct GenerationSignature {
    clock: Arc<dyn Clock>,
}

impl GenerationSignature {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Hook<ContentContext> for GenerationSignature {
    fn name(&self) -> &str {
        "GenerationSignature"
    }

    fn call(&self, mut context: ContentContext) -> Result<ContentContext, HookError> {
        if !looks_like_html(&context.content) {
            return Ok(context);
        }

        let now = self.clock.now();
        let signature = format!(
            "\n<!-- cached statically on: {}, expires on: {} -->",
            format_timestamp(now)?,
            format_timestamp(now.saturating_add(context.time_out_seconds))?
        );

        let mut body = Vec::with_capacity(context.content.len() + signature.len());
        body.extend_from_slice(&context.content);
        body.extend_from_slice(signature.as_bytes());
        context.content = Bytes::from(body);
        Ok(context)
    }
}

/// `DD-MM-YY HH:MM` in UTC.
pub fn format_timestamp(timestamp: Timestamp) -> Result<String, HookError> {
    let format = format_description!("[day]-[month]-[year repr:last_two] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|err| HookError::new(format!("timestamp {timestamp} out of range: {err}")))?
        .format(format)
        .map_err(|err| HookError::new(format!("failed to format timestamp: {err}")))
}

fn looks_like_html(content: &[u8]) -> bool {
    std::str::from_utf8(content)
        .map(|text| text.to_ascii_lowercase().contains("</html>"))
        .unwrap_or(false)
}
