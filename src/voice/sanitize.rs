//! Reply text cleanup before synthesis
//!
//! Agent replies are written for screens: markdown, emoji, tags and
//! symbols read badly (or not at all) through a speech engine.

use std::sync::LazyLock;

use regex::Regex;

use super::TextSanitizer;

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^<>]*>").expect("valid regex"));

static DASH_RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*(?:-{2,}|[\x{2013}\x{2014}])\s*").expect("valid regex"));

static SPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));

/// Sanitizer for markdown-flavoured chat replies
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownSanitizer;

impl TextSanitizer for MarkdownSanitizer {
    fn sanitize(&self, text: &str) -> String {
        sanitize_for_tts(text)
    }
}

/// Strip everything a speech engine should not read aloud
///
/// Returns an empty string when nothing speakable remains.
#[must_use]
pub fn sanitize_for_tts(text: &str) -> String {
    let text = TAG_REGEX.replace_all(text, " ");
    let text = text.replace('&', " and ");
    let text = DASH_RUN_REGEX.replace_all(&text, ", ");

    let mapped: String = text
        .chars()
        .filter_map(|c| match c {
            '\\' | '|' | '[' | ']' | '{' | '}' | '\t' => Some(' '),
            '\r' => None,
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c),
            c if is_spoken_punctuation(c) => Some(c),
            _ => None,
        })
        .collect();

    let collapsed = SPACE_REGEX.replace_all(&mapped, " ");

    collapsed
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', ',', ' ']).trim())
        .filter(|line| line.chars().any(char::is_alphanumeric))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_spoken_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ','
            | '!'
            | '?'
            | ';'
            | ':'
            | '\''
            | '"'
            | '('
            | ')'
            | '-'
            | '$'
            | '%'
            | '/'
            | '+'
            | '\u{2018}'
            | '\u{2019}'
            | '\u{201c}'
            | '\u{201d}'
    )
}

/// Split text into sentences for per-sentence synthesis
///
/// Breaks after `.`, `!` or `?` followed by whitespace, and at newlines.
/// Fragments without any letters or digits are dropped.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_none_or(|next| next.is_whitespace()) {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let sentence = current.trim();
    if sentence.chars().any(char::is_alphanumeric) {
        sentences.push(sentence.to_string());
    }
    current.clear();
}
