//! Redaction middleware.
//!
//! Produces a masked copy of the request's messages (emails, long digit
//! runs, and credential-shaped substrings replaced by sentinels) and
//! publishes it into the call context under `llm.redacted.messages` when
//! redaction is enabled. A short masked preview of the last one-or-two
//! messages is always published under `llm.redacted.preview`; any later
//! middleware that logs content must use the preview, never the raw
//! request. The original request is never mutated.

use crate::context::{ExecutionContext, items};
use crate::error::Result;
use crate::middleware::{Middleware, Next};
use crate::stream::EventStream;
use crate::types::{ChatResponse, Message};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

const EMAIL_SENTINEL: &str = "***@***";
const PHONE_SENTINEL: &str = "***-****";
const CREDENTIAL_SENTINEL: &str = "[credential]";

/// Maximum preview length in characters.
const PREVIEW_LIMIT: usize = 160;

fn masking_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        // Rule order matters: emails first so their digits are gone before
        // the digit-run rule fires, credentials last so key/token values
        // collapse to a single sentinel.
        vec![
            (
                Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                    .expect("email rule"),
                EMAIL_SENTINEL,
            ),
            (Regex::new(r"\d{7,}").expect("digit-run rule"), PHONE_SENTINEL),
            (
                Regex::new(r"(?i)\b(?:api[_-]?key|secret|token|password|bearer)\b\s*[:=]\s*\S+")
                    .expect("credential rule"),
                CREDENTIAL_SENTINEL,
            ),
            (
                Regex::new(r"\bsk-[A-Za-z0-9_-]{8,}").expect("key-prefix rule"),
                CREDENTIAL_SENTINEL,
            ),
        ]
    })
}

/// Apply the ordered masking rules to one content string.
pub(crate) fn mask(content: &str) -> String {
    let mut masked = content.to_string();
    for (rule, sentinel) in masking_rules() {
        masked = rule.replace_all(&masked, *sentinel).into_owned();
    }
    masked
}

/// Build the sanitized preview: the last one-or-two message contents,
/// whitespace-normalized and masked, joined by ` | ` and trimmed to 160
/// characters.
pub(crate) fn preview(messages: &[Message]) -> String {
    let tail_start = messages.len().saturating_sub(2);
    let joined = messages[tail_start..]
        .iter()
        .map(|m| mask(&normalize_whitespace(&m.content)))
        .collect::<Vec<_>>()
        .join(" | ");
    truncate_chars(&joined, PREVIEW_LIMIT)
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Middleware publishing masked message copies and the logging preview.
#[derive(Default)]
pub struct RedactionMiddleware;

impl RedactionMiddleware {
    /// Create a redaction middleware.
    pub fn new() -> Self {
        RedactionMiddleware
    }

    fn publish(&self, ctx: &ExecutionContext) {
        if ctx.options.enable_redaction {
            let masked: Vec<Message> = ctx
                .request
                .messages
                .iter()
                .map(|m| Message::new(m.role, mask(&m.content)))
                .collect();
            if let Ok(value) = serde_json::to_value(&masked) {
                ctx.call.set_item(items::REDACTED_MESSAGES, value);
            }
        }
        ctx.call
            .set_item(items::REDACTED_PREVIEW, preview(&ctx.request.messages));
    }
}

#[async_trait]
impl Middleware for RedactionMiddleware {
    async fn handle(&self, ctx: &mut ExecutionContext, next: Next<'_>) -> Result<ChatResponse> {
        self.publish(ctx);
        next.run(ctx).await
    }

    async fn handle_stream(
        &self,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<EventStream> {
        self.publish(ctx);
        next.run_stream(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_emails() {
        assert_eq!(
            mask("reach me at jane.doe+test@example.co.uk today"),
            "reach me at ***@*** today"
        );
    }

    #[test]
    fn test_masks_long_digit_runs() {
        assert_eq!(mask("call 5551234567 now"), "call ***-**** now");
        // Short runs stay readable.
        assert_eq!(mask("room 421"), "room 421");
    }

    #[test]
    fn test_masks_credentials() {
        assert_eq!(mask("api_key=abc123XYZ"), "[credential]");
        assert_eq!(mask("password: hunter2"), "[credential]");
        assert_eq!(
            mask("use sk-ABCdefGHIjklMNO123 for auth"),
            "use [credential] for auth"
        );
    }

    #[test]
    fn test_preview_uses_last_two_messages() {
        let messages = vec![
            Message::system("never shown"),
            Message::user("first kept"),
            Message::assistant("second\n  kept"),
        ];
        assert_eq!(preview(&messages), "first kept | second kept");
    }

    #[test]
    fn test_preview_single_message() {
        let messages = vec![Message::user("only one")];
        assert_eq!(preview(&messages), "only one");
    }

    #[test]
    fn test_preview_is_trimmed_to_160_chars() {
        let messages = vec![Message::user("x".repeat(500))];
        assert_eq!(preview(&messages).chars().count(), 160);
    }

    #[test]
    fn test_preview_is_masked_even_for_sensitive_tails() {
        let messages = vec![Message::user("mail bob@example.com")];
        assert_eq!(preview(&messages), "mail ***@***");
    }

    #[test]
    fn test_mask_leaves_input_untouched() {
        let original = "bob@example.com".to_string();
        let _ = mask(&original);
        assert_eq!(original, "bob@example.com");
    }
}
