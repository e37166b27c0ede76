//! Removal of IRC formatting cruft from free text.
//!
//! Colour escapes (`\x03` followed by a foreground and optional background
//! number) and control bytes are dropped before anything is logged or
//! indexed. Tab survives; newlines and carriage returns do not, so every
//! event stays on a single log line. The remaining bytes are decoded as
//! UTF-8 with malformed sequences replaced by U+FFFD.

use once_cell::sync::Lazy;
use regex::bytes::Regex;

static FORMATTING_CRUFT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)\x03[0-9]{1,2}(?:,[0-9]{1,2})?|[\x00-\x08\x0A-\x1F]")
        .expect("formatting regex is valid")
});

/// Sanitize raw bytes from the wire.
pub fn sanitize_bytes(raw: &[u8]) -> String {
    let cleaned = FORMATTING_CRUFT.replace_all(raw, &b""[..]);
    String::from_utf8_lossy(&cleaned).into_owned()
}

/// Sanitize text that is already valid UTF-8.
pub fn sanitize(text: &str) -> String {
    sanitize_bytes(text.as_bytes())
}
