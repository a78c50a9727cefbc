//! Sanitization of untrusted identifiers into filesystem-safe segments.
//!
//! Conversation ids, caller phone numbers and agent ids all arrive from
//! the network and end up as directory and file name components. The
//! transform here is pure and deterministic so the same identifier always
//! resolves to the same path segment and correlation key.

/// Fallback segment when sanitization leaves nothing usable.
const EMPTY_FALLBACK: &str = "unknown";

/// Maximum segment length in bytes (common filesystem limit).
const MAX_SEGMENT_BYTES: usize = 255;

/// Windows reserved device names that cannot be used as file names.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize an untrusted identifier into a safe path segment.
///
/// Guarantees on the output:
/// - contains no `..` and no path separators
/// - never starts with a separator, dot or drive qualifier
/// - at most 255 bytes, never empty
/// - idempotent: `sanitize_segment(sanitize_segment(x)) == sanitize_segment(x)`
pub fn sanitize_segment(candidate: &str) -> String {
    if candidate.is_empty() {
        return EMPTY_FALLBACK.to_string();
    }

    // Drop traversal sequences before mapping separators so "..%2F" style
    // combinations cannot reassemble into a parent reference.
    let mut cleaned = candidate.replace("..", "");
    cleaned = cleaned.replace(['/', '\\'], "_");
    let cleaned: String = cleaned.chars().filter(|ch| !ch.is_control()).collect();

    // Leading/trailing dots and spaces are rejected by Windows and make
    // hidden files on unix. Trimmed before the allow-set pass so a leading
    // space becomes nothing rather than a leading underscore.
    let trimmed = cleaned.trim_matches(['.', ' ']);

    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if is_allowed(ch) {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    if RESERVED_NAMES
        .iter()
        .any(|name| out.eq_ignore_ascii_case(name))
    {
        out = format!("_{}_", out);
    }

    if out.len() > MAX_SEGMENT_BYTES {
        out = truncate_to_boundary(&out, MAX_SEGMENT_BYTES);
        // Truncation can expose a trailing dot again.
        out = out.trim_matches(['.', ' ']).to_string();
    }

    if out.is_empty() {
        return EMPTY_FALLBACK.to_string();
    }

    out
}

fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '+' | '@')
}

/// Truncate to at most `max` bytes on a char boundary.
fn truncate_to_boundary(s: &str, max: usize) -> String {
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
