//! Glossary loading and post-translation term substitution.
//! Terms are stored lowercased and matched as whole words, case-insensitively.
//! The replacement follows the case pattern of the matched occurrence.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    pub source: String,
    pub target: String,
}

/// On-disk glossary file format.
#[derive(Debug, Deserialize)]
struct GlossaryFile {
    version: u32,
    entries: Vec<GlossaryEntry>,
}

struct Term {
    entry: GlossaryEntry,
    matcher: Regex,
}

/// Ordered term table. `fingerprint` is a blake3 digest of the entries in
/// order and keys glossary-applied translations in the cache; `version` is
/// the file's own counter and only bumps locally on change.
pub struct Glossary {
    version: u32,
    fingerprint: String,
    terms: Vec<Term>,
}

#[derive(Debug)]
pub enum GlossaryError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    InvalidTerm(String),
}

impl std::fmt::Display for GlossaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlossaryError::Io(e) => write!(f, "glossary IO error: {e}"),
            GlossaryError::Parse(e) => write!(f, "glossary parse error: {e}"),
            GlossaryError::InvalidTerm(term) => write!(f, "invalid glossary term: {term:?}"),
        }
    }
}

impl std::error::Error for GlossaryError {}

impl From<std::io::Error> for GlossaryError {
    fn from(e: std::io::Error) -> Self {
        GlossaryError::Io(e)
    }
}

impl From<serde_json::Error> for GlossaryError {
    fn from(e: serde_json::Error) -> Self {
        GlossaryError::Parse(e)
    }
}

impl Glossary {
    pub fn empty() -> Self {
        let mut glossary = Self {
            version: 0,
            fingerprint: String::new(),
            terms: Vec::new(),
        };
        glossary.refresh_fingerprint();
        glossary
    }

    /// Load glossary from a JSON file: `{"version": 1, "entries": [{"source", "target"}]}`.
    pub fn load_from_file(path: &Path) -> Result<Self, GlossaryError> {
        let content = std::fs::read_to_string(path)?;
        let file: GlossaryFile = serde_json::from_str(&content)?;
        let mut glossary = Self::empty();
        for entry in file.entries {
            glossary.add_term(&entry.source, &entry.target)?;
        }
        glossary.version = file.version;
        Ok(glossary)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Hex digest over the ordered `(source, target)` entries. Equal term
    /// tables give equal fingerprints across processes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &GlossaryEntry> {
        self.terms.iter().map(|t| &t.entry)
    }

    /// Map `term` (lowercased) to `translation`, replacing any earlier mapping
    /// in place so glossary order is kept.
    pub fn add_term(&mut self, term: &str, translation: &str) -> Result<(), GlossaryError> {
        let source = term.trim().to_lowercase();
        if source.is_empty() {
            return Err(GlossaryError::InvalidTerm(term.to_string()));
        }

        let entry = GlossaryEntry {
            source: source.clone(),
            target: translation.to_string(),
        };

        if let Some(existing) = self.terms.iter_mut().find(|t| t.entry.source == source) {
            existing.entry = entry;
        } else {
            let matcher = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&source)))
                .map_err(|_| GlossaryError::InvalidTerm(term.to_string()))?;
            self.terms.push(Term { entry, matcher });
        }
        self.version = self.version.wrapping_add(1);
        self.refresh_fingerprint();
        Ok(())
    }

    fn refresh_fingerprint(&mut self) {
        let mut hasher = blake3::Hasher::new();
        for term in &self.terms {
            hasher.update(term.entry.source.as_bytes());
            hasher.update(b"\0");
            hasher.update(term.entry.target.as_bytes());
            hasher.update(b"\0");
        }
        self.fingerprint = hasher.finalize().to_hex().to_string();
    }

    /// Replace every whole-word occurrence of each term, in glossary order.
    /// Later terms see the output of earlier ones; overlaps are not deduplicated.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for term in &self.terms {
            let target = &term.entry.target;
            out = term
                .matcher
                .replace_all(&out, |caps: &Captures| match_case(&caps[0], target))
                .into_owned();
        }
        out
    }
}

/// All-caps match → all-caps replacement; leading capital → capitalized
/// replacement; anything else → replacement verbatim.
fn match_case(matched: &str, replacement: &str) -> String {
    let has_letters = matched.chars().any(char::is_alphabetic);
    if has_letters && matched == matched.to_uppercase() {
        return replacement.to_uppercase();
    }
    if matched.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
            None => String::new(),
        };
    }
    replacement.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> Glossary {
        let mut g = Glossary::empty();
        g.add_term("hello", "hola").unwrap();
        g.add_term("world", "mundo").unwrap();
        g
    }

    #[test]
    fn preserves_case_pattern() {
        let g = sample();
        assert_eq!(g.apply("Hello, World!"), "Hola, Mundo!");
        assert_eq!(g.apply("HELLO WORLD"), "HOLA MUNDO");
        assert_eq!(g.apply("hello world"), "hola mundo");
        assert_eq!(g.apply("hElLo"), "hola");
    }

    #[test]
    fn capitalized_replacement_lowercases_tail() {
        let mut g = Glossary::empty();
        g.add_term("nyc", "New York City").unwrap();
        assert_eq!(g.apply("Nyc is big"), "New york city is big");
        assert_eq!(g.apply("nyc is big"), "New York City is big");
    }

    #[test]
    fn whole_words_only() {
        let mut g = sample();
        g.add_term("test", "prueba").unwrap();
        assert_eq!(g.apply("Hello, World! This is a test."), "Hola, Mundo! This is a prueba.");
        assert_eq!(g.apply("testing helloworld"), "testing helloworld");
    }

    #[test]
    fn overwrite_keeps_position_and_bumps_version() {
        let mut g = sample();
        let v = g.version();
        g.add_term("HELLO", "bonjour").unwrap();
        assert_eq!(g.len(), 2);
        assert!(g.version() > v);
        assert_ne!(g.fingerprint(), sample().fingerprint());
        let sources: Vec<_> = g.entries().map(|e| e.source.as_str()).collect();
        assert_eq!(sources, vec!["hello", "world"]);
        assert_eq!(g.apply("Hello"), "Bonjour");
    }

    #[test]
    fn later_terms_see_earlier_output() {
        let mut g = Glossary::empty();
        g.add_term("cat", "dog").unwrap();
        g.add_term("dog", "wolf").unwrap();
        assert_eq!(g.apply("cat"), "wolf");
    }

    #[test]
    fn rejects_empty_term() {
        let mut g = Glossary::empty();
        assert!(matches!(g.add_term("  ", "x"), Err(GlossaryError::InvalidTerm(_))));
    }

    #[test]
    fn loads_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"version": 7, "entries": [{{"source": "Hello", "target": "hola"}}]}}"#
        )
        .unwrap();
        let g = Glossary::load_from_file(file.path()).unwrap();
        assert_eq!(g.version(), 7);
        assert_eq!(g.apply("hello there"), "hola there");

        let mut same = Glossary::empty();
        same.add_term("hello", "hola").unwrap();
        assert_eq!(g.fingerprint(), same.fingerprint());
    }

    #[test]
    fn fingerprint_follows_content_not_counter() {
        let mut first = Glossary::empty();
        first.add_term("hello", "hola").unwrap();
        let mut second = Glossary::empty();
        second.add_term("hello", "bonjour").unwrap();

        assert_eq!(first.version(), second.version());
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert_ne!(first.fingerprint(), Glossary::empty().fingerprint());
        assert!(Glossary::empty().is_empty() && !first.is_empty());
    }
}
