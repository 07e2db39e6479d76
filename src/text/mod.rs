//! Pure text sanitizing helpers for conversation surfaces.
//!
//! Everything in this module is deterministic, does no I/O and never
//! panics: these functions sit between drifting backend payloads and the
//! UI, so "garbage in, tidy string out" is the whole contract.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static FRAMING_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(regarding|about|zum thema|betreffend|betreff)\s+[^:]{1,60}:\s*").unwrap());
static ASCII_ELLIPSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());
static ELLIPSIS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"…(\s*…)+").unwrap());
static PUNCT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"([?!,;:])([?!,;:])+").unwrap());

/// Default word limit for a displayed question.
pub const DEFAULT_WORD_LIMIT: usize = 30;

/// List caps applied after normalization.
pub const MAX_CONTEXT_ITEMS: usize = 4;
pub const MAX_TALK_LINES: usize = 2;
pub const MAX_FOLLOWUPS: usize = 4;
pub const MAX_ANSWER_HELPERS: usize = 3;

/// Collapse newline/whitespace runs into single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()
}

/// Normalize one question candidate for display.
///
/// Strips framing prefixes ("Regarding sleep: ..."), collapses repeated
/// punctuation and ellipsis runs, truncates to `word_limit` words (with a
/// trailing `…` when something was cut) and guarantees the result ends in
/// `?` or `…`. Empty input yields empty output. Idempotent.
pub fn sanitize_question(raw: &str, word_limit: usize) -> String {
    let mut s = normalize_whitespace(raw);
    if s.is_empty() {
        return s;
    }

    s = FRAMING_PREFIX.replace(&s, "").into_owned();
    s = ASCII_ELLIPSIS.replace_all(&s, "…").into_owned();
    s = ELLIPSIS_RUN.replace_all(&s, "…").into_owned();
    s = PUNCT_RUN.replace_all(&s, "$1").into_owned();
    s = s.trim().to_string();
    if s.is_empty() {
        return s;
    }

    let words: Vec<&str> = s.split_whitespace().collect();
    if words.len() > word_limit {
        let mut truncated = words[..word_limit].join(" ");
        truncated = truncated
            .trim_end_matches(['.', ',', ';', ':', '!', '?', '…'])
            .to_string();
        truncated.push('…');
        s = truncated;
    }

    if s.ends_with('?') || s.ends_with('…') {
        return s;
    }
    let stripped = s.trim_end_matches(['.', ',', ';', ':', '!']).trim_end();
    if stripped.is_empty() {
        return String::new();
    }
    format!("{}?", stripped)
}

/// Reduce a string to its dedup key: lowercase, alphanumerics only.
pub fn normalized_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Drop entries whose normalized key was already seen, keeping the first
/// occurrence's original casing and the overall order.
pub fn dedupe_preserve_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(normalized_key(trimmed)) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n\n b\t c  "), "a b c");
        assert_eq!(normalize_whitespace(""), "");
    }

    #[test]
    fn test_sanitize_appends_question_mark() {
        assert_eq!(
            sanitize_question("Wie geht es dir", DEFAULT_WORD_LIMIT),
            "Wie geht es dir?"
        );
        assert_eq!(
            sanitize_question("Wie geht es dir?", DEFAULT_WORD_LIMIT),
            "Wie geht es dir?"
        );
    }

    #[test]
    fn test_sanitize_strips_framing_prefix() {
        assert_eq!(
            sanitize_question("Regarding sleep: how did you rest?", DEFAULT_WORD_LIMIT),
            "how did you rest?"
        );
        assert_eq!(
            sanitize_question("Zum Thema Arbeit: was belastet dich?", DEFAULT_WORD_LIMIT),
            "was belastet dich?"
        );
    }

    #[test]
    fn test_sanitize_collapses_punctuation() {
        assert_eq!(sanitize_question("Echt???", DEFAULT_WORD_LIMIT), "Echt?");
        assert_eq!(sanitize_question("Na gut...", DEFAULT_WORD_LIMIT), "Na gut…");
        assert_eq!(sanitize_question("So!!!", DEFAULT_WORD_LIMIT), "So?");
    }

    #[test]
    fn test_sanitize_word_limit() {
        let long = "eins zwei drei vier fünf sechs sieben acht";
        let out = sanitize_question(long, 4);
        assert_eq!(out, "eins zwei drei vier…");
        let words = out.trim_end_matches('…').split_whitespace().count();
        assert!(words <= 4);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "Regarding work: what weighs on you today???",
            "eins zwei drei vier fünf sechs",
            "Wie geht es dir",
            "Na dann....",
            "",
        ];
        for raw in inputs {
            let once = sanitize_question(raw, 4);
            let twice = sanitize_question(&once, 4);
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_sanitize_empty_input() {
        assert_eq!(sanitize_question("", DEFAULT_WORD_LIMIT), "");
        assert_eq!(sanitize_question("   \n ", DEFAULT_WORD_LIMIT), "");
    }

    #[test]
    fn test_dedupe_preserve_order() {
        let out = dedupe_preserve_order(["Schlaf", "schlaf!", "Arbeit", "  ", "ARBEIT"]);
        assert_eq!(out, vec!["Schlaf", "Arbeit"]);
    }

    #[test]
    fn test_dedupe_no_equal_keys_remain() {
        let out = dedupe_preserve_order(["a b", "A-B", "c", "c!", "d"]);
        let keys: Vec<String> = out.iter().map(|s| normalized_key(s)).collect();
        let mut unique = keys.clone();
        unique.dedup();
        assert_eq!(keys.len(), unique.len());
        assert_eq!(out[0], "a b");
    }
}
