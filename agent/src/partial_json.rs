//! Fault-tolerant parsing of streaming JSON prefixes.
//!
//! Tool-call arguments arrive as concatenated fragments of a JSON document.
//! UIs want to render them before the document is complete, so
//! [`parse_partial`] accepts any prefix and returns the best value the
//! prefix supports: closed structural delimiters bind, unterminated strings
//! and containers are closed at the last safe point, and dangling tokens are
//! dropped. The output is always plain JSON.
//!
//! The algorithm is repair-and-retry: scan the prefix for open containers
//! and string state, append the missing closers, and attempt a strict parse;
//! on failure, trim trailing partial tokens and shrink the prefix until a
//! strict parse succeeds. Deterministic for any input.

use serde_json::Value;

/// Parses a prefix of a JSON document, returning the best partial value.
///
/// Returns `None` when the prefix contains no parsable structure at all
/// (e.g. empty input or a bare `{"` with nothing recoverable yet still
/// yields `Some({})` — only genuinely valueless input yields `None`).
#[must_use]
pub fn parse_partial(input: &str) -> Option<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    let mut prefix = trimmed.to_string();
    loop {
        if let Some(value) = try_repair(&prefix) {
            return Some(value);
        }
        // Shrink toward the last safe point and retry.
        prefix.pop()?;
        if prefix.is_empty() {
            return None;
        }
    }
}

/// One repair attempt: trim dangling separators, close the open string, and
/// close every open container.
fn try_repair(prefix: &str) -> Option<Value> {
    let mut candidate = prefix.trim_end().to_string();
    while candidate.ends_with(',') {
        candidate.pop();
        while candidate.ends_with(char::is_whitespace) {
            candidate.pop();
        }
    }
    if candidate.ends_with(':') {
        candidate.push_str("null");
    }

    let (open, in_string) = scan(&candidate);
    if in_string {
        candidate.push('"');
    }
    for delimiter in open.iter().rev() {
        candidate.push(match delimiter {
            b'{' => '}',
            _ => ']',
        });
    }

    serde_json::from_str(&candidate).ok()
}

/// Returns the stack of unclosed container delimiters and whether the input
/// ends inside a string literal.
fn scan(input: &str) -> (Vec<u8>, bool) {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for byte in input.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(byte),
            b'}' | b']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    (stack, in_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_documents_parse_strictly() {
        assert_eq!(
            parse_partial(r#"{"path": "."}"#),
            Some(json!({"path": "."}))
        );
    }

    #[test]
    fn unterminated_string_closes() {
        assert_eq!(
            parse_partial(r#"{"path": "/tm"#),
            Some(json!({"path": "/tm"}))
        );
    }

    #[test]
    fn dangling_key_drops() {
        // `"b` opened a key but carries no value yet.
        assert_eq!(parse_partial(r#"{"a": 1, "b"#), Some(json!({"a": 1})));
    }

    #[test]
    fn bare_colon_binds_null() {
        assert_eq!(parse_partial(r#"{"a":"#), Some(json!({"a": null})));
    }

    #[test]
    fn partial_literal_truncates() {
        assert_eq!(parse_partial(r#"{"a": tru"#), Some(json!({"a": null})));
    }

    #[test]
    fn nested_containers_close() {
        assert_eq!(
            parse_partial(r#"{"cmd": ["ls", "-l"#),
            Some(json!({"cmd": ["ls", "-l"]}))
        );
    }

    #[test]
    fn open_brace_alone_is_empty_object() {
        assert_eq!(parse_partial("{"), Some(json!({})));
        assert_eq!(parse_partial(r#"{"pa"#), Some(json!({})));
    }

    #[test]
    fn empty_input_is_none() {
        assert_eq!(parse_partial(""), None);
        assert_eq!(parse_partial("   "), None);
    }

    #[test]
    fn escapes_do_not_confuse_the_scanner() {
        assert_eq!(
            parse_partial(r#"{"s": "quote \" brace { bracket ["#),
            Some(json!({"s": "quote \" brace { bracket ["}))
        );
    }

    #[test]
    fn every_prefix_of_a_document_is_stable() {
        let doc = r#"{"path": "/tmp/x.rs", "lines": [1, 2, 3], "opts": {"deep": true}}"#;
        for end in 1..=doc.len() {
            if !doc.is_char_boundary(end) {
                continue;
            }
            // No prefix may panic, and from the first complete key-value
            // pair onward a value must be recovered.
            let parsed = parse_partial(&doc[..end]);
            if end >= doc.len() {
                assert_eq!(parsed, Some(serde_json::from_str(doc).unwrap()));
            }
            if end > 20 {
                assert!(parsed.is_some(), "no value for prefix {:?}", &doc[..end]);
            }
        }
    }
}
