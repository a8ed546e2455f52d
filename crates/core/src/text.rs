//! Text cleanup ahead of chunking: normalization, sentence splitting and the
//! word-count token estimate used for chunk budgets.

use regex::Regex;
use std::sync::OnceLock;

const TOKENS_PER_WORD: f64 = 1.3;

fn hyphen_wrap_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-[ \t]*\n[ \t]*").expect("static regex"))
}

fn paragraph_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[^\S\n]*(?:\n[^\S\n]*)+").expect("static regex"))
}

fn horizontal_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\S\n]{2,}").expect("static regex"))
}

fn sentence_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static regex"))
}

/// Clean raw extracted text.
///
/// Line endings are unified, words hyphenated across a line wrap are joined,
/// single newlines become spaces while paragraph breaks collapse to exactly
/// one blank line, and horizontal whitespace runs collapse to one space.
/// Whitespace-only input yields an empty string.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let joined = join_hyphen_wraps(&unified);

    paragraph_break_re()
        .split(&joined)
        .map(|paragraph| {
            let single_line = paragraph.replace('\n', " ");
            horizontal_run_re()
                .replace_all(&single_line, " ")
                .trim()
                .to_string()
        })
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Drops every `-\n` wrap that sits between two word characters. Neighbours
/// are read from the source text, so consecutive wraps all join.
fn join_hyphen_wraps(text: &str) -> String {
    let mut joined = String::with_capacity(text.len());
    let mut copied_to = 0;

    for wrap in hyphen_wrap_re().find_iter(text) {
        let before = text[..wrap.start()].chars().next_back();
        let after = text[wrap.end()..].chars().next();
        if before.is_some_and(is_word_char) && after.is_some_and(is_word_char) {
            joined.push_str(&text[copied_to..wrap.start()]);
            copied_to = wrap.end();
        }
    }

    joined.push_str(&text[copied_to..]);
    joined
}

fn opens_sentence(c: char) -> bool {
    c.is_uppercase()
        || c.is_ascii_digit()
        || matches!(c, '"' | '\'' | '\u{201c}' | '\u{2018}' | '(' | '[')
}

/// Split normalized text into sentence-like units.
///
/// A boundary is `.`, `!` or `?` followed by whitespace and then an upper-case
/// letter, digit, opening quote or parenthesis. Abbreviations such as "Dr. Who"
/// split too.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in sentence_end_re().find_iter(text) {
        let next = text[boundary.end()..].chars().next();
        if !next.is_some_and(opens_sentence) {
            continue;
        }

        // punctuation is a single ASCII byte
        let sentence = text[start..boundary.start() + 1].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = boundary.end();
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Token estimate for a span with `words` whitespace-delimited words.
pub fn tokens_for_words(words: usize) -> usize {
    ((words as f64 * TOKENS_PER_WORD).round() as usize).max(1)
}

/// Approximate token cost of `text`: `max(1, round(words * 1.3))`.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_words(word_count(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizer_repairs_wrapped_lines() {
        let raw = "The hydra-\nulic pump\r\nfails   under\tload.\n\n\n\nNext  paragraph\r\nhere.";
        assert_eq!(
            normalize_text(raw),
            "The hydraulic pump fails under\tload.\n\nNext paragraph here."
        );
    }

    #[test]
    fn normalizer_joins_consecutive_hyphen_wraps() {
        assert_eq!(normalize_text("a-\nb-\nc"), "abc");
        assert_eq!(normalize_text("inter-\n  nation-\nal law"), "international law");
        assert_eq!(normalize_text("list -\nitem"), "list - item");
    }

    #[test]
    fn normalizer_treats_whitespace_lines_as_paragraph_breaks() {
        let raw = "First line\n   \n \t \nSecond line";
        assert_eq!(normalize_text(raw), "First line\n\nSecond line");
    }

    #[test]
    fn normalizer_blank_input_is_empty() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \n\t\r\n  "), "");
    }

    #[test]
    fn normalizer_is_idempotent() {
        let raw = "  Some -\n text with  gaps\n\nand a co-\noperative ending.  ";
        let once = normalize_text(raw);
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn splitter_breaks_on_capitals_digits_and_quotes() {
        let text =
            "It rained. Then it stopped! 3 birds sang? \"Quiet,\" she said. (Not really.) end";
        assert_eq!(
            split_sentences(text),
            vec![
                "It rained.",
                "Then it stopped!",
                "3 birds sang?",
                "\"Quiet,\" she said.",
                "(Not really.) end",
            ]
        );
    }

    #[test]
    fn splitter_keeps_lowercase_continuations_together() {
        let text = "Version 2.5 is out. see the notes e.g. below.";
        assert_eq!(
            split_sentences(text),
            vec!["Version 2.5 is out. see the notes e.g. below."]
        );
    }

    #[test]
    fn splitter_on_empty_text() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn token_estimate_follows_word_ratio() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("one"), 1);
        assert_eq!(estimate_tokens("one two"), 3);
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
        assert_eq!(tokens_for_words(100), 130);
    }
}
