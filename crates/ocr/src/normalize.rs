use std::sync::Arc;

use crate::dictionary::Dictionary;
use crate::types::{NormalizedLine, RecognizedLine};

pub const DEFAULT_MAX_DISTANCE: usize = 1;
pub const DEFAULT_MIN_TOKEN_CHARS: usize = 2;

/// Dictionary-assisted token correction.
///
/// Each whitespace-delimited token is replaced by its nearest dictionary term
/// when that term is within `max_distance` edits. Tokens that already match,
/// carry digits (amounts, quantities, codes), or are shorter than
/// `min_token_chars` are left alone. Whitespace between tokens is preserved,
/// so normalizing a normalized line is a no-op.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    dictionary: Arc<Dictionary>,
    max_distance: usize,
    min_token_chars: usize,
}

impl TextNormalizer {
    pub fn new(dictionary: Arc<Dictionary>) -> Self {
        Self {
            dictionary,
            max_distance: DEFAULT_MAX_DISTANCE,
            min_token_chars: DEFAULT_MIN_TOKEN_CHARS,
        }
    }

    pub fn with_max_distance(mut self, max_distance: usize) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_min_token_chars(mut self, min_token_chars: usize) -> Self {
        self.min_token_chars = min_token_chars;
        self
    }

    pub fn normalize_lines(&self, lines: &[RecognizedLine]) -> Vec<NormalizedLine> {
        lines
            .iter()
            .map(|l| NormalizedLine::new(self.normalize_text(&l.text), l.order))
            .collect()
    }

    pub fn normalize_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut token = String::new();
        for c in text.chars() {
            if c.is_whitespace() {
                if !token.is_empty() {
                    out.push_str(self.correct_token(&token));
                    token.clear();
                }
                out.push(c);
            } else {
                token.push(c);
            }
        }
        if !token.is_empty() {
            out.push_str(self.correct_token(&token));
        }
        out
    }

    /// The replacement for `token`, or `token` itself.
    fn correct_token<'a>(&'a self, token: &'a str) -> &'a str {
        if self.dictionary.contains(token) || !self.is_correctable(token) {
            return token;
        }

        let chars: Vec<char> = token.chars().collect();
        let mut best: Option<(&str, usize)> = None;
        for term in self.dictionary.terms() {
            if term.chars.len().abs_diff(chars.len()) > self.max_distance {
                continue;
            }
            let d = levenshtein_distance(&chars, &term.chars);
            // Strict comparison keeps the first of equally close terms.
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((term.text.as_str(), d));
                if d == 0 {
                    break;
                }
            }
        }

        match best {
            Some((term, d)) if d <= self.max_distance => {
                tracing::debug!("Corrected OCR token '{token}' -> '{term}' (distance {d})");
                term
            }
            _ => token,
        }
    }

    fn is_correctable(&self, token: &str) -> bool {
        token.chars().count() >= self.min_token_chars
            && token.chars().any(char::is_alphabetic)
            && !token.chars().any(|c| c.is_ascii_digit())
    }
}

/// Levenshtein edit distance over characters using the two-row O(min(m,n))
/// space algorithm. Works on `char`s so multi-byte Hangul counts as one edit.
pub fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    let (m, n) = (a.len(), b.len());

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let (a, b, m, n) = if m <= n { (a, b, m, n) } else { (b, a, n, m) };

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dist(a: &str, b: &str) -> usize {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        levenshtein_distance(&a, &b)
    }

    fn normalizer(terms: &[&str]) -> TextNormalizer {
        TextNormalizer::new(Arc::new(Dictionary::from_terms(terms.iter().copied())))
    }

    fn lines(texts: &[&str]) -> Vec<RecognizedLine> {
        texts.iter().enumerate().map(|(i, t)| RecognizedLine::new(*t, i)).collect()
    }

    #[test]
    fn distance_basics() {
        assert_eq!(dist("abc", "abc"), 0);
        assert_eq!(dist("", "abc"), 3);
        assert_eq!(dist("abc", ""), 3);
        assert_eq!(dist("cat", "bat"), 1);
        assert_eq!(dist("abc", "abcd"), 1);
        assert_eq!(dist("amazon", "amzn"), dist("amzn", "amazon"));
    }

    #[test]
    fn hangul_syllables_count_as_single_edits() {
        assert_eq!(dist("김밥", "김밮"), 1);
        assert_eq!(dist("돈까스", "돈가스"), 1);
    }

    #[test]
    fn corrects_token_within_threshold() {
        let n = normalizer(&["김밥", "라면"]);
        assert_eq!(n.normalize_text("김밮 3,000"), "김밥 3,000");
    }

    #[test]
    fn leaves_distant_tokens_alone() {
        let n = normalizer(&["김밥"]);
        assert_eq!(n.normalize_text("떡볶이"), "떡볶이");
    }

    #[test]
    fn never_touches_numeric_tokens() {
        let n = normalizer(&["김밥", "x2"]);
        assert_eq!(n.normalize_text("3000 x3 2개"), "3000 x3 2개");
    }

    #[test]
    fn ties_resolve_to_first_dictionary_entry() {
        let n = normalizer(&["cola", "cold"]);
        assert_eq!(n.normalize_text("colx"), "cola");
        let n = normalizer(&["cold", "cola"]);
        assert_eq!(n.normalize_text("colx"), "cold");
    }

    #[test]
    fn threshold_is_tunable() {
        let n = normalizer(&["Americano"]);
        assert_eq!(n.normalize_text("Amerlcan0"), "Amerlcan0");
        let n = n.with_max_distance(2);
        // '0' makes it a digit-bearing token, so still untouched.
        assert_eq!(n.normalize_text("Amerlcan0"), "Amerlcan0");
        assert_eq!(n.normalize_text("Amerlcanu"), "Americano");
    }

    #[test]
    fn preserves_whitespace_layout() {
        let n = normalizer(&["김밥"]);
        assert_eq!(n.normalize_text("  김밮\t 2   6,000 "), "  김밥\t 2   6,000 ");
    }

    #[test]
    fn short_tokens_are_skipped() {
        let n = normalizer(&["CU"]);
        assert_eq!(n.normalize_text("C"), "C");
        assert_eq!(n.normalize_text("CV"), "CU");
    }

    #[test]
    fn keeps_order_and_cardinality() {
        let n = normalizer(&["김밥", "라면"]);
        let input = lines(&["김밮천국", "", "라먼 4,500", "합계 4,500"]);
        let out = n.normalize_lines(&input);
        assert_eq!(out.len(), input.len());
        assert_eq!(out.iter().map(|l| l.order).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(out[2].text, "라면 4,500");
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = TextNormalizer::new(Arc::new(Dictionary::builtin()));
        let input = lines(&[
            "김밥천굮",
            "김밮 2 3,000 6,000",
            "돈가스 1 10,000 10,000",
            "아메리카누  x2  9,000",
            "합계 25,000",
            "~~ @@ ##",
        ]);
        let once = n.normalize_lines(&input);
        let again: Vec<_> = once.iter().cloned().map(NormalizedLine::into_recognized).collect();
        let twice = n.normalize_lines(&again);
        assert_eq!(once, twice);
        assert_eq!(once[1].text, "김밥 2 3,000 6,000");
    }
}
