//! User-input sanitization for prompt injection surfaces.

/// Maximum characters of user input accepted into a composition.
const MAX_USER_INPUT_LEN: usize = 10_000;

/// Strip control characters (except newline and tab) and cap the length.
/// Printable UTF-8 passes through untouched.
pub fn sanitize_user_input(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    if cleaned.chars().count() > MAX_USER_INPUT_LEN {
        cleaned.chars().take(MAX_USER_INPUT_LEN).collect()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_text_untouched() {
        let text = "What is the weather in Zürich? 42°C — окей";
        assert_eq!(sanitize_user_input(text), text);
    }

    #[test]
    fn test_control_characters_stripped() {
        let text = "line1\nline2\ttabbed\x00\x07\x1b[31m";
        let sanitized = sanitize_user_input(text);
        assert!(sanitized.contains('\n'));
        assert!(sanitized.contains('\t'));
        assert!(!sanitized.contains('\x00'));
        assert!(!sanitized.contains('\x1b'));
    }

    #[test]
    fn test_length_capped() {
        let long = "a".repeat(MAX_USER_INPUT_LEN + 500);
        assert_eq!(sanitize_user_input(&long).len(), MAX_USER_INPUT_LEN);
    }
}
