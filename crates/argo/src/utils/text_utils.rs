//! Char-safe text helpers for previews and prompt budgets

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

const ELLIPSIS: &str = "...";

pub struct TextUtils;

impl TextUtils {
    /// Collapse runs of whitespace (newlines included) into single spaces.
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// First `max_chars` characters of the whitespace-normalized text, without a marker.
    pub fn snippet(text: &str, max_chars: usize) -> String {
        Self::normalize_whitespace(text).chars().take(max_chars).collect()
    }

    /// First `max_chars` characters, counted in chars rather than bytes.
    pub fn char_prefix(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }

    /// Keep the last `max_chars` characters, prefixed with `...` when anything was cut.
    pub fn truncate_tail(text: &str, max_chars: usize) -> Cow<'_, str> {
        let total = text.chars().count();
        if total <= max_chars {
            return Cow::Borrowed(text);
        }
        let skip = total - max_chars;
        let start = text
            .char_indices()
            .nth(skip)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());
        let mut result = String::with_capacity(ELLIPSIS.len() + text.len() - start);
        result.push_str(ELLIPSIS);
        result.push_str(&text[start..]);
        Cow::Owned(result)
    }
}

pub fn snippet(text: &str, max_chars: usize) -> String {
    TextUtils::snippet(text, max_chars)
}
