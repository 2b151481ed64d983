use serde_json::Value;

// BOM and the zero-width family that spreadsheet exports like to leave behind
const INVISIBLE: [char; 5] = ['\u{FEFF}', '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}'];

// Pairs that may wrap a whole cell, e.g. "\"Hello\"" or «Hello»
const QUOTE_PAIRS: [(char, char); 4] = [('"', '"'), ('\'', '\''), ('«', '»'), ('“', '”')];

/// Turns a raw cell value into a clean display string.
///
/// Strips invisible characters, normalizes line endings, trims, and peels off
/// symmetric quoting layer by layer. A value made only of quote characters
/// becomes empty. The result is a fixed point: `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str) -> String {
    let mut s: String = raw.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    s = s.replace("\r\n", "\n").replace('\r', "\n");

    let mut s = s.trim().to_string();
    if only_quotes(&s) {
        return String::new();
    }

    while let Some(inner) = strip_quote_pair(&s) {
        s = inner.trim().to_string();
    }

    // Peeling can expose a leftover lone quote, e.g. `" ' "`
    if only_quotes(&s) {
        return String::new();
    }
    s
}

/// Same as [`sanitize`] but for arbitrary JSON-ish values.
///
/// `null` becomes empty, strings are sanitized as-is, everything else goes
/// through its JSON text form first.
pub fn sanitize_value(raw: &Value) -> String {
    match raw {
        Value::Null => String::new(),
        Value::String(s) => sanitize(s),
        other => sanitize(&other.to_string()),
    }
}

fn is_quote(c: char) -> bool {
    QUOTE_PAIRS.iter().any(|(open, close)| c == *open || c == *close)
}

fn only_quotes(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_quote)
}

fn strip_quote_pair(s: &str) -> Option<&str> {
    let mut chars = s.chars();
    let first = chars.next()?;
    let last = chars.next_back()?;
    QUOTE_PAIRS
        .iter()
        .any(|(open, close)| first == *open && last == *close)
        .then(|| &s[first.len_utf8()..s.len() - last.len_utf8()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_invisible_characters_and_whitespace() {
        assert_eq!(sanitize("\u{FEFF}  Hello\u{200B} world \r\n"), "Hello world");
        assert_eq!(sanitize("line one\r\nline two\rline three"), "line one\nline two\nline three");
    }

    #[test]
    fn peels_nested_quotes() {
        assert_eq!(sanitize("\"Hello\""), "Hello");
        assert_eq!(sanitize("\" 'Hello' \""), "Hello");
        assert_eq!(sanitize("«Хінкалі»"), "Хінкалі");
        assert_eq!(sanitize("\"Hello\" and \"bye\""), "Hello\" and \"bye");
    }

    #[test]
    fn asymmetric_quotes_are_kept() {
        assert_eq!(sanitize("\"Hello'"), "\"Hello'");
        assert_eq!(sanitize("It's fine"), "It's fine");
    }

    #[test]
    fn quotes_only_become_empty() {
        assert_eq!(sanitize("\"\""), "");
        assert_eq!(sanitize("'\"'\""), "");
        assert_eq!(sanitize("\" ' \""), "");
        assert_eq!(sanitize("   "), "");
    }

    #[test]
    fn handles_non_string_values() {
        assert_eq!(sanitize_value(&Value::Null), "");
        assert_eq!(sanitize_value(&json!(42)), "42");
        assert_eq!(sanitize_value(&json!(" \"text\" ")), "text");
        assert_eq!(sanitize_value(&json!({"a": [1, 2]})), "{\"a\":[1,2]}");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "",
            "plain",
            "\"quoted\"",
            "\" ' \"",
            "\"'\"'",
            "'\u{200B}'x'\u{200B}'",
            "  «“nested”»  ",
            "\"a\"b\"",
            "\r\n\"multi\r\nline\"\r\n",
            "''''x",
            "x''''",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "input {:?}", sample);
        }
    }
}
