//! Text normalisation applied before chunking.

use regex::Regex;
use std::sync::OnceLock;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Lowercase ASCII letters, digits, whitespace and `.,?!'` survive.
fn special_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9\s.,?!']").expect("static regex"))
}

#[derive(Debug, Clone, Copy)]
pub struct TextCleaner {
    pub remove_special_chars: bool,
}

impl Default for TextCleaner {
    fn default() -> Self {
        Self {
            remove_special_chars: true,
        }
    }
}

impl TextCleaner {
    pub fn new(remove_special_chars: bool) -> Self {
        Self {
            remove_special_chars,
        }
    }

    /// Lowercases, collapses whitespace and, when enabled, strips every
    /// character outside the allowed set.
    ///
    /// The filter runs after whitespace normalisation, so removing a
    /// character between two spaces leaves a double space behind.
    pub fn clean_text(&self, text: &str) -> String {
        let text = self.normalize_whitespace(&text.to_lowercase());
        if self.remove_special_chars {
            special_chars_re().replace_all(&text, "").into_owned()
        } else {
            text
        }
    }

    pub fn normalize_whitespace(&self, text: &str) -> String {
        whitespace_re().replace_all(text, " ").trim().to_string()
    }
}
