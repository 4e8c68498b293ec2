//! Free-text input sanitization
//!
//! Strips markup and script-bearing fragments from user input before it is
//! stored or echoed back. Removal runs to a fixed point so that nested
//! payloads cannot reassemble themselves once an inner fragment is removed.

use regex::Regex;
use std::sync::LazyLock;

/// Fragments removed from free text, applied in order
static DANGEROUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[<>]",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)data:",
        r"(?i)\bon\w+\s*=",
        r"(?i)expression\s*\([^)]*\)?",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Maximum length of an email address (RFC 5321 path limit)
const MAX_EMAIL_LENGTH: usize = 254;

/// Sanitize a free-text field, keeping at most `max_length` characters.
///
/// Never fails; the result may be empty.
pub fn sanitize_input(input: &str, max_length: usize) -> String {
    let mut current = input.to_string();

    loop {
        let mut next = current.clone();
        for pattern in DANGEROUS_PATTERNS.iter() {
            next = pattern.replace_all(&next, "").into_owned();
        }

        if next == current {
            break;
        }
        current = next;
    }

    let truncated: String = current.chars().take(max_length).collect();
    truncated.trim().to_string()
}

/// Normalize an email address for lookups
pub fn sanitize_email(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'))
        .take(MAX_EMAIL_LENGTH)
        .collect()
}

/// Escape text for interpolation into HTML
pub fn escape_html(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&quot;"),
            '\'' => output.push_str("&#x27;"),
            _ => output.push(c),
        }
    }
    output
}
