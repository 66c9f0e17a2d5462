//! # Mongolian Text Cleanup
//!
//! Rule-based post-processing for Mongolian transcripts. The recognition
//! model makes a handful of recurring orthography mistakes on Mongolian
//! Cyrillic ("сонсох" coming out as "сансах" and similar), so this module
//! applies a deterministic rewrite pass on top of generic whitespace and
//! punctuation normalization.
//!
//! ## Pipeline (fixed order):
//! 1. Empty input returns unchanged.
//! 2. Runs of whitespace collapse to a single space; ends are trimmed.
//! 3. Whitespace before `, . ! ? …` is removed.
//! 4. A single space is inserted after one of those marks when it is
//!    directly followed by a non-space character.
//! 5. The literal substitution table is applied globally, one pair at a
//!    time, in table order; each pass rewrites the output of the previous
//!    pass.
//!
//! The table order is load-bearing: a replacement can itself contain a
//! later pair's pattern (or shadow it entirely), and callers depend on the
//! current behavior. The tests below pin it. Do not reorder or dedupe the
//! table without re-checking real transcripts.

use regex::Regex;
use std::sync::LazyLock;

/// Language code that triggers the cleanup pass and the guiding prompt.
pub const MN_LANG: &str = "mn";

/// Seed text handed to the recognition model for Mongolian audio. Biases
/// the decoder toward Cyrillic script and standard orthography.
pub const MN_PROMPT: &str = "Энэ бол монгол хэл дээрх подкаст. \
    Кирилл үсгээр, зөв бичгийн дүрмээр, утга төгөлдөр өгүүлбэрээр хөрвүүл. \
    Зөв үг сонголт хий: сэтгэл, магадлал, сонсох, зөвлөе гэх мэт.";

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([,.!?…])").unwrap());
static PUNCT_WITHOUT_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([,.!?…])([^\s])").unwrap());

/// Common recognition mistakes and their corrections, applied in order.
/// Conservative by intent: only substitutions that improved real podcast
/// transcripts are listed.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("сэдгэл", "сэтгэл"),
    ("сэдэх", "сэдэх"),
    ("маагдал", "магадлал"),
    ("сансах", "сонсох"),
    ("сансаха", "сонсох"),
    ("зүвлэй", "зөвлөе"),
    ("зүвлээ", "зөвлөе"),
    ("зүвлэй.", "зөвлөе."),
    ("үйдээ", "үедээ"),
    ("хүв", "хувь"),
    ("сангол", "сонголт"),
    ("сангал", "сонголт"),
    ("таахдар", "тавгүйдэх"),
];

/// Normalize whitespace, punctuation spacing, and common Mongolian
/// recognition errors in `text`.
///
/// Pure and total: never fails, and empty input short-circuits. The
/// whitespace and punctuation rules are idempotent; the substitution table
/// is not guaranteed to be (see the module docs).
pub fn cleanup_transcript(text: &str) -> String {
    if text.is_empty() {
        return text.to_string();
    }

    let text = WHITESPACE_RUN.replace_all(text, " ");
    let text = text.trim();
    let text = SPACE_BEFORE_PUNCT.replace_all(text, "${1}");
    let mut text = PUNCT_WITHOUT_SPACE
        .replace_all(&text, "${1} ${2}")
        .into_owned();

    for (pattern, replacement) in REPLACEMENTS {
        text = text.replace(pattern, replacement);
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_unchanged() {
        assert_eq!(cleanup_transcript(""), "");
    }

    #[test]
    fn test_whitespace_collapses_and_trims() {
        assert_eq!(cleanup_transcript("  сайн\t\nбайна   уу  "), "сайн байна уу");
    }

    #[test]
    fn test_space_inserted_after_punctuation() {
        assert_eq!(cleanup_transcript("a,b"), "a, b");
    }

    #[test]
    fn test_space_before_punctuation_removed() {
        // Space before the comma goes away, then the missing space after
        // it is added back.
        assert_eq!(cleanup_transcript("a ,b"), "a, b");
    }

    #[test]
    fn test_ellipsis_treated_like_terminal_punctuation() {
        assert_eq!(cleanup_transcript("тийм …за"), "тийм… за");
    }

    #[test]
    fn test_whitespace_punct_rules_are_idempotent() {
        let once = cleanup_transcript("сайн  байна ,тийм");
        let twice = cleanup_transcript(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_common_word_substitutions() {
        assert_eq!(cleanup_transcript("сэдгэл"), "сэтгэл");
        assert_eq!(cleanup_transcript("маагдал"), "магадлал");
        assert_eq!(cleanup_transcript("үйдээ"), "үедээ");
    }

    // The next two tests pin the table's ordering quirks. They document
    // current behavior, they are not aspirational.

    #[test]
    fn test_substitution_order_shadows_longer_pattern() {
        // "сансах" fires before "сансаха" can match, so the trailing vowel
        // survives the rewrite.
        assert_eq!(cleanup_transcript("сансаха"), "сонсоха");
    }

    #[test]
    fn test_substitution_order_makes_dotted_entry_unreachable() {
        // "зүвлэй" rewrites first, so the "зүвлэй." entry never sees its
        // pattern; the result is identical either way.
        assert_eq!(cleanup_transcript("зүвлэй."), "зөвлөе.");
    }

    #[test]
    fn test_substitution_applies_globally() {
        assert_eq!(
            cleanup_transcript("сансах сансах сансах"),
            "сонсох сонсох сонсох"
        );
    }

    #[test]
    fn test_full_pipeline_combined() {
        assert_eq!(
            cleanup_transcript("  сансах  уу ?тийм"),
            "сонсох уу? тийм"
        );
    }
}
