// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Repair-parsing for LLM JSON output.
//!
//! Models return fenced, truncated, comment-ridden, or otherwise broken JSON.
//! [`parse_lenient`] runs an ordered repair ladder and returns `None` rather
//! than ever erroring:
//!
//! 1. strip markdown code fences
//! 2. direct parse
//! 3. sanitize (line/trailing `//` comments outside strings, trailing commas
//!    before `}`/`]`, `NaN`/`±Infinity` → `null`)
//! 4. locate the outermost balanced JSON object with a bracket/string-aware
//!    stack scan
//! 5. append best-guess closing tokens derived from the unbalanced stack
//! 6. try short fixed suffix completions

use serde_json::Value;

/// Remove markdown code fences so we get raw JSON.
pub fn strip_fences(raw: &str) -> String {
    let mut cleaned = raw.trim().to_string();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest.trim_start().to_string();
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest.trim_start().to_string();
    }
    if let Some(pos) = cleaned.find("```") {
        cleaned.truncate(pos);
    }
    let mut cleaned = cleaned.trim().to_string();
    // Models sometimes follow a "start with {{" literal from the prompt.
    if cleaned.starts_with("{{") {
        cleaned.remove(0);
    }
    if cleaned.ends_with("}}") {
        cleaned.pop();
    }
    cleaned
}

/// Fix common LLM JSON errors so direct parsing succeeds.
///
/// Comment removal is conservative: only whole-line `//` and `, //` tails,
/// which cannot occur inside a double-quoted URL value.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with("//") {
            continue;
        }
        if let Some(pos) = line.find(", //") {
            out.push_str(&line[..=pos]);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    let out = remove_trailing_commas(&out);
    // Word-bounded so identifiers inside strings are untouched.
    let out = nan_re().replace_all(&out, "null").into_owned();
    infinity_re().replace_all(&out, "null").into_owned()
}

fn nan_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| regex::Regex::new(r"\bNaN\b").expect("static pattern"))
}

fn infinity_re() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| regex::Regex::new(r"-?\bInfinity\b").expect("static pattern"))
}

fn remove_trailing_commas(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if escape {
            escape = false;
            out.push(c);
            i += 1;
            continue;
        }
        if in_string {
            if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            // Look ahead past whitespace for a closing bracket.
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == b'}' || bytes[j] == b']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Outcome of the bracket/string-aware scan from the first `{`.
struct ScanOutcome {
    /// Byte offset one past the balanced closing brace, if balance was reached.
    end: Option<usize>,
    /// Closing tokens still expected, innermost last.
    open_stack: Vec<char>,
    /// Whether the scan ended inside a string literal.
    in_string: bool,
}

fn scan_balanced(text: &str, start: usize) -> ScanOutcome {
    let bytes = text.as_bytes();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut i = start;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if escape {
            escape = false;
            i += 1;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            i += 1;
            continue;
        }
        if in_string {
            i += 1;
            continue;
        }
        match c {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() != Some(&c) {
                    break;
                }
                stack.pop();
                if stack.is_empty() {
                    return ScanOutcome {
                        end: Some(i + 1),
                        open_stack: stack,
                        in_string: false,
                    };
                }
            }
            _ => {}
        }
        i += 1;
    }
    ScanOutcome {
        end: None,
        open_stack: stack,
        in_string,
    }
}

/// Parse possibly-broken LLM JSON output into an object. Returns `None` when
/// every repair strategy fails; never returns an error.
pub fn parse_lenient(raw: &str) -> Option<Value> {
    let cleaned = strip_fences(raw);

    if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
        if v.is_object() {
            return Some(v);
        }
    }

    let sanitized = sanitize(&cleaned);
    if let Ok(v) = serde_json::from_str::<Value>(&sanitized) {
        if v.is_object() {
            return Some(v);
        }
    }

    let start = sanitized.find('{')?;
    let outcome = scan_balanced(&sanitized, start);

    let candidate = match outcome.end {
        Some(end) => sanitized[start..end].to_string(),
        None => {
            // Unbalanced: close out of any open string, then unwind the stack.
            let body = &sanitized[start..];
            let suffix: String = outcome.open_stack.iter().rev().collect();
            if outcome.in_string {
                for extra in ["\"", "\": \"\""] {
                    let attempt = format!("{body}{extra}{suffix}");
                    if let Ok(v) = serde_json::from_str::<Value>(&attempt) {
                        if v.is_object() {
                            return Some(v);
                        }
                    }
                }
                format!("{body}\"{suffix}")
            } else {
                format!("{body}{suffix}")
            }
        }
    };

    if let Ok(v) = serde_json::from_str::<Value>(&candidate) {
        if v.is_object() {
            return Some(v);
        }
    }

    for suffix in ["]", "}", "]}", "}]}", "}]}]}"] {
        let attempt = format!("{candidate}{suffix}");
        if let Ok(v) = serde_json::from_str::<Value>(&attempt) {
            if v.is_object() {
                return Some(v);
            }
        }
    }

    tracing::warn!(preview = &raw[..raw.len().min(200)], "json_parse_failed");
    None
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_valid_json() {
        let raw = "```json\n{\"entities\": [{\"name\": \"NVIDIA\"}]}\n```";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["entities"][0]["name"], "NVIDIA");
    }

    #[test]
    fn test_bare_fence_without_language() {
        let raw = "```\n{\"entities\": []}\n```";
        let v = parse_lenient(raw).unwrap();
        assert!(v["entities"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_plain_valid_json() {
        let v = parse_lenient("{\"a\": 1}").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_truncated_mid_key() {
        // Object key cut off mid-string; must not error.
        let raw = "{\"entities\": [{\"name\": \"Acme\", \"entity_ty";
        let v = parse_lenient(raw);
        if let Some(v) = v {
            assert!(v.is_object());
        }
    }

    #[test]
    fn test_truncated_mid_array_element() {
        let raw = "{\"entities\": [{\"name\": \"Acme Corp\"}, {\"name\": \"Glob";
        let v = parse_lenient(raw);
        if let Some(v) = v {
            assert!(v.is_object());
            // The first, complete entity should survive when repair succeeds.
            let entities = v["entities"].as_array().unwrap();
            assert!(!entities.is_empty());
            assert_eq!(entities[0]["name"], "Acme Corp");
        }
    }

    #[test]
    fn test_trailing_comma_before_brace() {
        let raw = "{\"entities\": [{\"name\": \"Acme\"},]}";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["entities"][0]["name"], "Acme");
    }

    #[test]
    fn test_trailing_comma_before_bracket() {
        let raw = "{\"items\": [1, 2, 3,], \"n\": 3,}";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["n"], 3);
    }

    #[test]
    fn test_line_comments_removed() {
        let raw = "{\n// model commentary\n\"a\": 1\n}";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_url_with_slashes_survives_sanitize() {
        let raw = "{\"url\": \"https://example.com/path\"}";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["url"], "https://example.com/path");
    }

    #[test]
    fn test_nan_and_infinity_replaced() {
        let raw = "{\"a\": NaN, \"b\": Infinity, \"c\": -Infinity}";
        let v = parse_lenient(raw).unwrap();
        assert!(v["a"].is_null());
        assert!(v["b"].is_null());
        assert!(v["c"].is_null());
    }

    #[test]
    fn test_prose_around_object() {
        let raw = "Here is the extraction you asked for:\n{\"a\": 1}\nLet me know!";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_doubled_braces_from_prompt_literal() {
        let raw = "{{\"a\": 1}}";
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_unclosed_nested_arrays() {
        let raw = "{\"entities\": [{\"aliases\": [\"a\", \"b\"";
        let v = parse_lenient(raw);
        if let Some(v) = v {
            assert!(v.is_object());
        }
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(parse_lenient("no json here at all").is_none());
        assert!(parse_lenient("").is_none());
    }

    #[test]
    fn test_top_level_array_is_rejected() {
        // Callers expect an object envelope; bare arrays are not extractions.
        assert!(parse_lenient("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_escaped_quotes_inside_strings() {
        let raw = r#"{"quote": "she said \"hello\" to us"}"#;
        let v = parse_lenient(raw).unwrap();
        assert_eq!(v["quote"], "she said \"hello\" to us");
    }

    #[test]
    fn test_brackets_inside_strings_ignored_by_scan() {
        let raw = r#"{"text": "array syntax looks like [1, {2}]"} trailing"#;
        let v = parse_lenient(raw).unwrap();
        assert!(v["text"].as_str().unwrap().contains('['));
    }
}
