//! Compatibility shim for backends that predate `context_ack` frames.
//!
//! Those backends acknowledge a context update by sending an ordinary
//! assistant message whose text starts with a fixed prefix. Recognising it
//! is a heuristic: an assistant can produce the same text on its own, so
//! the check is switchable through `SessionConfig::legacy_text_ack`.

/// Text older backends put at the start of their acknowledgment message.
pub const LEGACY_ACK_PREFIX: &str = "Context updated";

/// Whether `content` looks like a legacy context acknowledgment.
pub fn is_legacy_context_ack(content: &str) -> bool {
    content
        .trim_start_matches(|c: char| c.is_whitespace() || !c.is_alphanumeric())
        .starts_with(LEGACY_ACK_PREFIX)
}
