//! Server-Sent Events payload extraction.
//!
//! The transport port delivers streamed bodies as one string; this module
//! pulls the `data:` payloads back out in arrival order. Each `data:` line
//! is one JSON payload (or the `[DONE]` sentinel); `event:`, `id:` and
//! `retry:` lines are ignored, and a trailing payload without its blank-line
//! terminator is still surfaced as a final event.

/// Extract `data:` payloads from an SSE body, in order.
pub(crate) fn data_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}
