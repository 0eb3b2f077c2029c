use std::collections::HashSet;
use std::io;
use std::path::Path;

const BUILTIN: &str = include_str!("../resources/dictionary.txt");

/// Known merchant and menu terms used to correct OCR tokens.
///
/// Terms keep their first-seen order; that order breaks ties between equally
/// close candidates. Built once per batch and shared read-only (`Arc<Dictionary>`).
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    terms: Vec<Term>,
    exact: HashSet<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Term {
    pub(crate) text: String,
    pub(crate) chars: Vec<char>,
}

impl Dictionary {
    /// Parse one-term-per-line text. Blank lines and `#` comments are skipped;
    /// a line with several words contributes each word, since correction works
    /// on single tokens.
    pub fn parse(text: &str) -> Self {
        Self::from_terms(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .flat_map(str::split_whitespace),
        )
    }

    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = Dictionary::default();
        for term in terms {
            let term = term.as_ref().trim();
            if term.is_empty() || dict.exact.contains(term) {
                continue;
            }
            dict.exact.insert(term.to_string());
            dict.terms.push(Term { text: term.to_string(), chars: term.chars().collect() });
        }
        dict
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let dict = Self::parse(&std::fs::read_to_string(path)?);
        tracing::info!("Loaded {} dictionary terms from {}", dict.len(), path.display());
        Ok(dict)
    }

    /// The term list bundled with the crate.
    pub fn builtin() -> Self {
        Self::parse(BUILTIN)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.exact.contains(token)
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|t| t.text.as_str())
    }

    pub(crate) fn terms(&self) -> &[Term] {
        &self.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_blanks() {
        let d = Dictionary::parse("# header\n\n김밥\n  라면  \n#trailing");
        assert_eq!(d.iter().collect::<Vec<_>>(), vec!["김밥", "라면"]);
    }

    #[test]
    fn duplicates_keep_first_position() {
        let d = Dictionary::parse("라면\n김밥\n라면");
        assert_eq!(d.iter().collect::<Vec<_>>(), vec!["라면", "김밥"]);
    }

    #[test]
    fn multi_word_lines_split_into_terms() {
        let d = Dictionary::parse("Iced Americano");
        assert!(d.contains("Iced"));
        assert!(d.contains("Americano"));
        assert!(!d.contains("Iced Americano"));
    }

    #[test]
    fn builtin_is_populated() {
        let d = Dictionary::builtin();
        assert!(d.contains("김밥"));
        assert!(d.contains("돈까스"));
        assert!(!d.is_empty());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dict.txt");
        std::fs::write(&path, "떡볶이\n순대\n").unwrap();
        let d = Dictionary::load(&path).unwrap();
        assert_eq!(d.len(), 2);
    }
}
