//! Placeholder masking for markup, digits and punctuation.
//! Tags become `__HTML_TAG_i__`, digit runs and punctuation marks become
//! `__SPECIAL_CHAR_i__`, so the provider only sees natural-language words.

use regex::{Captures, Regex};

const HTML_PREFIX: &str = "HTML_TAG";
const SPECIAL_PREFIX: &str = "SPECIAL_CHAR";

/// Masked text plus the originals needed to put it back together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedText {
    pub masked_text: String,
    pub html_placeholders: Vec<String>,
    pub special_char_placeholders: Vec<String>,
}

pub struct TextProtector {
    whitespace: Regex,
    tokens: Regex,
    placeholders: Regex,
    sentence_start: Regex,
}

impl TextProtector {
    pub fn new() -> Self {
        Self {
            whitespace: Regex::new(r"\s+").unwrap(),
            // A whole tag, a run of digits, or a single punctuation mark.
            tokens: Regex::new(r#"<[^>]+>|[0-9]+|[!@#$%^&*()_+\-=\[\]{};':"\\|,.<>/?]"#).unwrap(),
            placeholders: Regex::new(r"__(HTML_TAG|SPECIAL_CHAR)_(\d+)__").unwrap(),
            sentence_start: Regex::new(r"\.\s+[a-z]").unwrap(),
        }
    }

    /// Collapse whitespace runs to one space and trim.
    pub fn normalize_whitespace(&self, text: &str) -> String {
        self.whitespace.replace_all(text, " ").trim().to_string()
    }

    /// Normalize `text` and mask every protected token in one left-to-right pass.
    pub fn protect(&self, text: &str) -> ProtectedText {
        let normalized = self.normalize_whitespace(text);
        let mut html = Vec::new();
        let mut special = Vec::new();

        let masked = self.tokens.replace_all(&normalized, |caps: &Captures| {
            let token = &caps[0];
            if token.starts_with('<') && token.len() > 1 {
                html.push(token.to_string());
                format!("__{HTML_PREFIX}_{}__", html.len() - 1)
            } else {
                special.push(token.to_string());
                format!("__{SPECIAL_PREFIX}_{}__", special.len() - 1)
            }
        });

        ProtectedText {
            masked_text: masked.into_owned(),
            html_placeholders: html,
            special_char_placeholders: special,
        }
    }

    /// Swap placeholders in `masked` back for their originals, then uppercase a
    /// lowercase letter that follows a full stop and whitespace.
    /// Placeholders with no matching entry are left as they are.
    pub fn restore(&self, masked: &str, protected: &ProtectedText) -> String {
        let restored = self.placeholders.replace_all(masked, |caps: &Captures| {
            let list = if &caps[1] == HTML_PREFIX {
                &protected.html_placeholders
            } else {
                &protected.special_char_placeholders
            };
            caps[2]
                .parse::<usize>()
                .ok()
                .and_then(|i| list.get(i))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        });

        self.sentence_start
            .replace_all(&restored, |caps: &Captures| caps[0].to_uppercase())
            .into_owned()
    }
}

impl Default for TextProtector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_tags_digits_and_punctuation() {
        let p = TextProtector::new();
        let protected = p.protect("<p>Hello 123!</p>");
        assert_eq!(
            protected.masked_text,
            "__HTML_TAG_0__Hello __SPECIAL_CHAR_0____SPECIAL_CHAR_1____HTML_TAG_1__"
        );
        assert_eq!(protected.html_placeholders, vec!["<p>", "</p>"]);
        assert_eq!(protected.special_char_placeholders, vec!["123", "!"]);
    }

    #[test]
    fn restore_inverts_protect() {
        let p = TextProtector::new();
        let inputs = [
            "<p>Hello 123!</p>",
            "  Order   #42 costs $9.99,\n\tthanks!  ",
            "<a href=\"x\">Go</a> now? Yes: 100%",
            "a < b and snake_case_name",
            "No markup at all",
        ];
        for input in inputs {
            let protected = p.protect(input);
            assert_eq!(
                p.restore(&protected.masked_text, &protected),
                p.normalize_whitespace(input),
                "round trip failed for {input:?}"
            );
        }
    }

    #[test]
    fn masked_text_has_no_raw_tokens() {
        let p = TextProtector::new();
        let protected = p.protect("Call 555-1234 <b>now</b>.");
        let without_placeholders = p.placeholders.replace_all(&protected.masked_text, "");
        assert_eq!(without_placeholders, "Call  now");
    }

    #[test]
    fn restore_tolerates_reordering_by_provider() {
        let p = TextProtector::new();
        let protected = p.protect("<b>Hi</b> 7");
        // Provider moved the number to the front.
        let translated = "__SPECIAL_CHAR_0__ __HTML_TAG_0__Salut__HTML_TAG_1__";
        assert_eq!(p.restore(translated, &protected), "7 <b>Salut</b>");
    }

    #[test]
    fn restore_leaves_unknown_placeholder() {
        let p = TextProtector::new();
        let protected = p.protect("plain");
        assert_eq!(p.restore("x __HTML_TAG_3__", &protected), "x __HTML_TAG_3__");
    }

    #[test]
    fn restore_capitalizes_after_full_stop() {
        let p = TextProtector::new();
        let protected = ProtectedText::default();
        assert_eq!(p.restore("hola. que tal.  bien", &protected), "hola. Que tal.  Bien");
    }
}
