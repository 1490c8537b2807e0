//! Keyword relevance scoring.
//!
//! Lexicons are built from configured phrases as unigram and bigram sets.
//! A text part scores `(unigram_hits + 2 * bigram_hits) / sqrt(max(1, tokens))`
//! over distinct terms; parts are weighted, a completeness bonus is added, and
//! negative terms shrink the result.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use crate::models::{Document, ScoringConfig};

/// Characters of extracted full text considered.
pub const FULLTEXT_EXCERPT_CHARS: usize = 5000;
/// Full text shorter than this is ignored.
pub const FULLTEXT_MIN_CHARS: usize = 100;
/// Bytes read from an extracted-text file; covers the excerpt at 4 bytes per char.
const FULLTEXT_READ_BYTES: u64 = (FULLTEXT_EXCERPT_CHARS * 4) as u64;

/// Whether extracted text is long enough to contribute to a score.
pub fn is_usable_fulltext(text: &str) -> bool {
    text.chars().count() > FULLTEXT_MIN_CHARS
}

/// Lowercased alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Adjacent token pairs joined by a space.
pub fn bigrams(tokens: &[String]) -> Vec<String> {
    tokens
        .windows(2)
        .map(|pair| format!("{} {}", pair[0], pair[1]))
        .collect()
}

/// Unigram and bigram sets of a phrase list.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    unigrams: HashSet<String>,
    bigrams: HashSet<String>,
    phrases: Vec<Phrase>,
}

#[derive(Debug, Clone)]
struct Phrase {
    text: String,
    unigrams: HashSet<String>,
    bigrams: HashSet<String>,
}

impl Lexicon {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Self {
        let mut lexicon = Self::default();
        for phrase in phrases {
            let text = phrase.as_ref().trim();
            if text.is_empty() {
                continue;
            }
            let tokens = tokenize(text);
            let phrase = Phrase {
                text: text.to_string(),
                unigrams: tokens.iter().cloned().collect(),
                bigrams: bigrams(&tokens).into_iter().collect(),
            };
            lexicon.unigrams.extend(phrase.unigrams.iter().cloned());
            lexicon.bigrams.extend(phrase.bigrams.iter().cloned());
            lexicon.phrases.push(phrase);
        }
        lexicon
    }

    pub fn is_empty(&self) -> bool {
        self.unigrams.is_empty() && self.bigrams.is_empty()
    }

    /// Distinct unigram plus distinct bigram hits.
    fn hits(&self, text: &TextPart) -> (usize, usize) {
        (
            text.unigrams.intersection(&self.unigrams).count(),
            text.bigrams.intersection(&self.bigrams).count(),
        )
    }

    fn part_score(&self, text: &TextPart) -> f64 {
        if text.token_count == 0 {
            return 0.0;
        }
        let (uni, bi) = self.hits(text);
        let raw = uni as f64 + 2.0 * bi as f64;
        raw / (text.token_count as f64).sqrt().max(1.0)
    }

    /// Phrases sharing a unigram or bigram with `text`, sorted.
    fn matched(&self, text: &TextPart) -> Vec<String> {
        self.phrases
            .iter()
            .filter(|p| {
                !p.unigrams.is_disjoint(&text.unigrams) || !p.bigrams.is_disjoint(&text.bigrams)
            })
            .map(|p| p.text.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Default)]
struct TextPart {
    token_count: usize,
    unigrams: HashSet<String>,
    bigrams: HashSet<String>,
}

impl TextPart {
    fn new(text: &str) -> Self {
        let tokens = tokenize(text);
        Self::from_tokens(&tokens)
    }

    fn from_tokens(tokens: &[String]) -> Self {
        Self {
            token_count: tokens.len(),
            bigrams: bigrams(tokens).into_iter().collect(),
            unigrams: tokens.iter().cloned().collect(),
        }
    }
}

/// Score and explanation for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub score: f64,
    pub matched: Vec<String>,
}

impl ScoreResult {
    fn zero() -> Self {
        Self {
            score: 0.0,
            matched: Vec::new(),
        }
    }
}

/// Deterministic relevance scorer.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    lexicon: Lexicon,
    negative: Lexicon,
    use_fulltext: bool,
}

impl RelevanceScorer {
    pub fn new(lexicon: Lexicon, negative: Lexicon, use_fulltext: bool) -> Self {
        Self {
            lexicon,
            negative,
            use_fulltext,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            Lexicon::new(&config.keywords),
            Lexicon::new(&config.negative_keywords),
            config.use_fulltext,
        )
    }

    pub fn uses_fulltext(&self) -> bool {
        self.use_fulltext
    }

    /// Score `doc`, given its extracted full text if any was loaded.
    pub fn score(&self, doc: &Document, fulltext: Option<&str>) -> ScoreResult {
        let title = doc.title.as_deref().map(str::trim).unwrap_or("");
        let abstract_text = doc.abstract_text.as_deref().map(str::trim).unwrap_or("");
        let fulltext = fulltext
            .filter(|_| self.use_fulltext)
            .filter(|t| is_usable_fulltext(t))
            .map(excerpt);
        let keywords = doc.keywords.join(" ");

        let sources: Vec<&str> = [title, abstract_text, fulltext.unwrap_or(""), keywords.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return ScoreResult::zero();
        }

        let title_part = TextPart::new(title);
        let abstract_part = TextPart::new(abstract_text);

        let mut all_tokens = Vec::new();
        let mut all = TextPart::default();
        for source in &sources {
            let tokens = tokenize(source);
            all.bigrams.extend(bigrams(&tokens));
            all_tokens.extend(tokens);
        }
        all.token_count = all_tokens.len();
        all.unigrams = all_tokens.into_iter().collect();

        let s_title = self.lexicon.part_score(&title_part);
        let s_abstract = self.lexicon.part_score(&abstract_part);

        let mut score = if fulltext.is_some() {
            let s_all = self.lexicon.part_score(&all);
            0.4 * s_title + 0.3 * s_abstract + 0.3 * s_all
        } else {
            0.6 * s_title + 0.4 * s_abstract
        }
        .clamp(0.0, 1.0);

        score = (score + quality_bonus(doc, abstract_text, fulltext.is_some())).min(1.0);

        if !self.negative.is_empty() {
            let (uni, bi) = self.negative.hits(&all);
            let neg_hits = uni + bi;
            if neg_hits > 0 {
                score *= (1.0 - 0.3 * neg_hits as f64).max(0.1);
            }
        }

        ScoreResult {
            score,
            matched: self.lexicon.matched(&all),
        }
    }
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(FULLTEXT_EXCERPT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn quality_bonus(doc: &Document, abstract_text: &str, has_fulltext: bool) -> f64 {
    let mut bonus = 0.0;
    if abstract_text.chars().count() > 200 {
        bonus += 0.10;
    }
    if !doc.authors.is_empty() {
        bonus += 0.05;
    }
    if doc.year.is_some() {
        bonus += 0.05;
    }
    if doc.doi.as_deref().is_some_and(|d| !d.trim().is_empty()) {
        bonus += 0.10;
    }
    if has_fulltext {
        bonus += 0.10;
    }
    if !doc.affiliations.is_empty() {
        bonus += 0.05;
    }
    bonus
}

/// Candidate locations of extracted text for a document.
///
/// `content_path` first, then a `.txt` sibling of the artifact.
pub fn fulltext_paths(doc: &Document) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = doc.content_path.as_deref().filter(|p| !p.is_empty()) {
        paths.push(PathBuf::from(p));
    }
    if let Some(p) = doc.local_path.as_deref().filter(|p| !p.is_empty()) {
        paths.push(Path::new(p).with_extension("txt"));
    }
    paths
}

/// Read the head of the first available extracted text, lossily decoded.
pub async fn load_fulltext(doc: &Document) -> Option<String> {
    for path in fulltext_paths(doc) {
        match read_prefix(&path, FULLTEXT_READ_BYTES).await {
            Ok(bytes) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => log::debug!("Skipping full text {:?}: {}", path, e),
        }
    }
    None
}

async fn read_prefix(path: &Path, limit: u64) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut bytes = Vec::new();
    file.take(limit).read_to_end(&mut bytes).await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, abstract_text: &str) -> Document {
        Document {
            id: 1,
            doi: None,
            title: Some(title.to_string()).filter(|t| !t.is_empty()),
            title_norm: None,
            url_hash: None,
            source_url: None,
            landing_url: None,
            pdf_url: None,
            abstract_text: Some(abstract_text.to_string()).filter(|a| !a.is_empty()),
            authors: Vec::new(),
            affiliations: Vec::new(),
            keywords: Vec::new(),
            venue: None,
            year: None,
            oa_status: None,
            relevance_score: None,
            keywords_found: Vec::new(),
            local_path: None,
            content_path: None,
            pdf_status: None,
            pdf_fetched_at: None,
            file_size: None,
            checksum_sha256: None,
            http_status: None,
            mime_type: None,
            source: None,
            fetched_at: None,
        }
    }

    fn scorer(neg: &[&str]) -> RelevanceScorer {
        RelevanceScorer::new(
            Lexicon::new(&["underwater acoustic", "sensor network"]),
            Lexicon::new(neg),
            true,
        )
    }

    #[test]
    fn test_tokenize_and_bigrams() {
        let tokens = tokenize("Under-Water  acoustic, 5G!");
        assert_eq!(tokens, vec!["under", "water", "acoustic", "5g"]);
        assert_eq!(bigrams(&tokens), vec!["under water", "water acoustic", "acoustic 5g"]);
        assert!(bigrams(&tokens[..1]).is_empty());
    }

    #[test]
    fn test_no_text_scores_zero() {
        let result = scorer(&[]).score(&doc("", ""), None);
        assert_eq!(result, ScoreResult::zero());
    }

    #[test]
    fn test_zero_overlap_without_bonus_is_zero() {
        let result = scorer(&[]).score(&doc("Medieval poetry", "Rhyme in verse"), None);
        assert_eq!(result.score, 0.0);
        assert!(result.matched.is_empty());
    }

    #[test]
    fn test_title_weighting_and_matches() {
        let result = scorer(&[]).score(&doc("Underwater acoustic modems", ""), None);
        // 2 unigrams + 1 bigram = 4 raw over sqrt(3) tokens, title weight 0.6
        let expected = 0.6 * (4.0 / 3f64.sqrt());
        assert!((result.score - expected.min(1.0)).abs() < 1e-9);
        assert_eq!(result.matched, vec!["underwater acoustic"]);
    }

    #[test]
    fn test_score_bounded_with_bonus() {
        let mut d = doc(
            "Underwater acoustic sensor network",
            &"underwater acoustic sensor network ".repeat(10),
        );
        d.doi = Some("10.1/x".into());
        d.authors = vec!["A".into()];
        d.year = Some(2020);
        d.affiliations = vec!["U".into()];
        let result = scorer(&[]).score(&d, Some(&"acoustic ".repeat(40)));
        assert!(result.score <= 1.0);
        assert!(result.score >= 0.0);
        assert_eq!(result.matched, vec!["sensor network", "underwater acoustic"]);
    }

    #[test]
    fn test_negative_keywords_never_raise_score() {
        let clean = doc("Underwater acoustic channel", "A study of sensor arrays");
        let tainted = doc(
            "Underwater acoustic channel",
            "A study of sensor arrays for military sonar",
        );
        let s = scorer(&["military sonar"]);
        let base = s.score(&clean, None).score;
        let penalised = s.score(&tainted, None).score;
        assert!(penalised <= base);
        assert!(penalised > 0.0);
    }

    #[test]
    fn test_short_fulltext_ignored() {
        let d = doc("Underwater acoustic modems", "");
        let without = scorer(&[]).score(&d, None);
        let short = scorer(&[]).score(&d, Some("tiny"));
        assert_eq!(without, short);
    }

    #[test]
    fn test_idempotent() {
        let d = doc("Sensor network routing", "Energy aware sensor network protocols");
        let s = scorer(&[]);
        assert_eq!(s.score(&d, None), s.score(&d, None));
    }

    #[test]
    fn test_excerpt_is_char_safe() {
        let text = "é".repeat(FULLTEXT_EXCERPT_CHARS + 10);
        assert_eq!(excerpt(&text).chars().count(), FULLTEXT_EXCERPT_CHARS);
    }

    #[tokio::test]
    async fn test_load_fulltext_prefers_content_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("paper.grobid.txt");
        std::fs::write(&content, "extracted body").unwrap();
        let mut d = doc("T", "");
        d.content_path = Some(content.to_string_lossy().to_string());
        d.local_path = Some(tmp.path().join("paper.pdf").to_string_lossy().to_string());
        assert_eq!(load_fulltext(&d).await.as_deref(), Some("extracted body"));

        d.content_path = None;
        assert!(load_fulltext(&d).await.is_none());
    }

    #[tokio::test]
    async fn test_load_fulltext_reads_a_bounded_prefix() {
        let tmp = tempfile::TempDir::new().unwrap();
        let content = tmp.path().join("long.txt");
        std::fs::write(&content, "word ".repeat(50_000)).unwrap();
        let mut d = doc("T", "");
        d.content_path = Some(content.to_string_lossy().to_string());

        let text = load_fulltext(&d).await.unwrap();
        assert_eq!(text.len() as u64, FULLTEXT_READ_BYTES);
        assert!(text.chars().count() >= FULLTEXT_EXCERPT_CHARS);
    }
}
