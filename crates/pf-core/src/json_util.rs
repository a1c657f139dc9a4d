//! Shared JSON helpers for feed messages.
//!
//! The feed encodes prices as JSON numbers, but starting-price projections
//! may carry the non-numeric tokens `NaN` / `Infinity`, sometimes quoted and
//! sometimes bare (which is not valid JSON). These helpers make both forms
//! parseable and map them to an explicit absence instead of a number.

use std::borrow::Cow;

/// Parse a textual number, returning `None` for non-finite values.
///
/// Accepts `"1.98"`, `"NaN"`, `"Infinity"`, `"-Infinity"` (case-insensitive
/// for the tokens); the latter three yield `None`.
#[inline]
pub fn parse_finite_f64(s: &str) -> Option<f64> {
    fast_float2::parse::<f64, _>(s.trim())
        .ok()
        .filter(|v| v.is_finite())
}

const BARE_TOKENS: [&str; 3] = ["-Infinity", "Infinity", "NaN"];

/// Wrap bare `NaN` / `Infinity` / `-Infinity` tokens that appear outside of
/// string literals in double quotes so the line becomes valid JSON.
///
/// Returns the input unchanged (borrowed) when no such token is present.
pub fn quote_bare_non_finite(line: &str) -> Cow<'_, str> {
    if !line.contains("NaN") && !line.contains("Infinity") {
        return Cow::Borrowed(line);
    }

    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    let mut changed = false;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if c == b'\\' {
                escaped = true;
            } else if c == b'"' {
                in_string = false;
            }
        } else if c == b'"' {
            in_string = true;
        } else if let Some(token) = BARE_TOKENS.iter().find(|t| line[i..].starts_with(**t)) {
            out.push('"');
            out.push_str(token);
            out.push('"');
            i += token.len();
            changed = true;
            continue;
        }

        // Copy the whole UTF-8 sequence starting at `i`.
        let len = utf8_len(c);
        out.push_str(&line[i..i + len]);
        i += len;
    }

    if changed { Cow::Owned(out) } else { Cow::Borrowed(line) }
}

#[inline]
fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tokens_as_absent() {
        assert_eq!(parse_finite_f64("1.98"), Some(1.98));
        assert_eq!(parse_finite_f64("NaN"), None);
        assert_eq!(parse_finite_f64("Infinity"), None);
        assert_eq!(parse_finite_f64("-Infinity"), None);
        assert_eq!(parse_finite_f64("abc"), None);
    }

    #[test]
    fn quotes_bare_tokens_only_outside_strings() {
        let line = r#"{"spn":NaN,"spf":-Infinity,"name":"NaN Runner","x":Infinity}"#;
        let fixed = quote_bare_non_finite(line);
        assert_eq!(
            fixed,
            r#"{"spn":"NaN","spf":"-Infinity","name":"NaN Runner","x":"Infinity"}"#
        );
        let v: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["name"], "NaN Runner");
    }

    #[test]
    fn untouched_lines_are_borrowed() {
        let line = r#"{"op":"heartbeat","id":3,"name":"Café NaN"}"#;
        assert!(matches!(quote_bare_non_finite(line), Cow::Borrowed(_)));
        let plain = r#"{"op":"heartbeat","id":3}"#;
        assert!(matches!(quote_bare_non_finite(plain), Cow::Borrowed(_)));
    }
}
