use std::sync::LazyLock;

use regex::Regex;

static FLAT_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("valid regex"));

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code blocks from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// The outermost `{...}` span in a model response (first `{` to last `}`).
/// Models often wrap JSON in prose; nested arrays and objects survive.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    (end > start).then(|| &response[start..=end])
}

/// The first `{...}` span without nested braces. Used for flat score objects
/// where a trailing second object should be ignored.
pub fn extract_flat_json_object(response: &str) -> Option<&str> {
    FLAT_OBJECT.find(response).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_char_boundary() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn test_truncate_within_bounds() {
        let text = "Hello";
        assert_eq!(truncate_to_char_boundary(text, 100), "Hello");
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn extracts_outer_object_with_nested_arrays() {
        let text = "Here you go:\n{\"people\": [\"A\"], \"other\": {\"x\": 1}}\nThanks";
        assert_eq!(
            extract_json_object(text),
            Some("{\"people\": [\"A\"], \"other\": {\"x\": 1}}")
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }

    #[test]
    fn flat_extraction_takes_first_object() {
        let text = "{\"d1\": 2} and later {\"d1\": 3}";
        assert_eq!(extract_flat_json_object(text), Some("{\"d1\": 2}"));
    }
}
