use std::sync::OnceLock;

use regex::Regex;

fn punctuation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Apostrophes inside words are kept so "don't" stays one word.
    RE.get_or_init(|| Regex::new(r"[^\w\s']|'\B|\B'").expect("valid punctuation pattern"))
}

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace pattern"))
}

/// Lowercases, strips punctuation and collapses whitespace.
pub fn normalize_transcript(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = punctuation().replace_all(&lowered, " ");
    whitespace().replace_all(stripped.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn golden_phrase_normalizes() {
        assert_eq!(normalize_transcript(" Welcome to Neural Chat."), "welcome to neural chat");
    }

    #[test]
    fn collapses_whitespace_and_punctuation() {
        assert_eq!(normalize_transcript("Hello,   world!\n  Bye?"), "hello world bye");
    }

    #[test]
    fn keeps_inner_apostrophes() {
        assert_eq!(normalize_transcript("'Don't' stop."), "don't stop");
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize_transcript("  ...  "), "");
    }
}
