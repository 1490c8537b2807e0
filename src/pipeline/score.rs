// src/pipeline/score.rs

//! Relevance scoring pass over the store.

use crate::error::{AppError, Result};
use crate::models::ScoringConfig;
use crate::services::RelevanceScorer;
use crate::services::scorer::{is_usable_fulltext, load_fulltext};
use crate::storage::{Store, documents};
use crate::utils::log as console;

/// Counts for one scoring run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreReport {
    pub scored: usize,
    /// Documents at or above `min_score`
    pub above_min: usize,
    /// Documents whose score came partly from full text
    pub with_fulltext: usize,
}

/// Score every stored document and overwrite its relevance fields.
///
/// Running twice with the same lexicon and the same full text yields the same
/// scores.
pub async fn score_documents(
    store: &Store,
    scorer: &RelevanceScorer,
    min_score: f64,
) -> Result<ScoreReport> {
    let docs = store.with_conn(documents::all)?;
    let mut report = ScoreReport::default();

    for doc in &docs {
        let fulltext = if scorer.uses_fulltext() {
            load_fulltext(doc).await
        } else {
            None
        };
        if fulltext.as_deref().is_some_and(is_usable_fulltext) {
            report.with_fulltext += 1;
        }

        let result = scorer.score(doc, fulltext.as_deref());
        store.with_conn(|conn| {
            documents::update_relevance(conn, doc.id, result.score, &result.matched)
        })?;

        report.scored += 1;
        if result.score >= min_score {
            report.above_min += 1;
        }
        log::debug!(
            "Document {} scored {:.3} ({:?})",
            doc.id,
            result.score,
            result.matched
        );
    }

    Ok(report)
}

/// Score the store with the configured lexicon and print a summary.
pub async fn run_score(store: &Store, config: &ScoringConfig) -> Result<ScoreReport> {
    if config.keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(AppError::config(
            "scoring.keywords is empty; add keywords to config.toml or keywords.txt",
        ));
    }
    console::header("Scoring documents");

    let scorer = RelevanceScorer::from_config(config);
    let report = score_documents(store, &scorer, config.min_score).await?;

    console::summary(
        "Score",
        &[
            ("Scored", report.scored.to_string()),
            (
                "At or above min_score",
                format!("{} (min {:.2})", report.above_min, config.min_score),
            ),
            ("With full text", report.with_fulltext.to_string()),
        ],
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateRecord;
    use crate::services::IdentityResolver;
    use tempfile::TempDir;

    fn seed(store: &Store, title: &str, abstract_text: &str) -> i64 {
        let candidate = CandidateRecord {
            title: Some(title.into()),
            abstract_text: Some(abstract_text.into()),
            ..Default::default()
        };
        IdentityResolver::default()
            .resolve(store, &candidate.validate().unwrap())
            .unwrap()
            .document
            .id
    }

    fn config() -> ScoringConfig {
        ScoringConfig {
            keywords: vec!["sediment acoustics".into(), "sound speed".into()],
            min_score: 0.1,
            ..ScoringConfig::default()
        }
    }

    #[tokio::test]
    async fn test_scoring_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let id = seed(
            &store,
            "Sediment acoustics of sandy seabeds",
            "We measure sound speed in sediment.",
        );
        seed(&store, "Tomato cultivation", "Greenhouse yields.");

        let first = run_score(&store, &config()).await.unwrap();
        let scored = store.with_conn(|c| documents::get(c, id)).unwrap().unwrap();
        let second = run_score(&store, &config()).await.unwrap();
        let rescored = store.with_conn(|c| documents::get(c, id)).unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.scored, 2);
        assert_eq!(first.above_min, 1);
        assert_eq!(scored.relevance_score, rescored.relevance_score);
        assert_eq!(scored.keywords_found, rescored.keywords_found);
        assert!(scored.keywords_found.contains(&"sound speed".to_string()));
    }

    #[tokio::test]
    async fn test_fulltext_sidecar_is_picked_up() {
        let tmp = TempDir::new().unwrap();
        let store = Store::in_memory().unwrap();
        let id = seed(&store, "Untitled report", "");
        let text_path = tmp.path().join("report.txt");
        std::fs::write(
            &text_path,
            "sediment acoustics ".repeat(20) + "and a discussion of sound speed profiles.",
        )
        .unwrap();
        store
            .with_conn(|c| {
                c.execute(
                    "UPDATE documents SET content_path = ?2 WHERE id = ?1",
                    rusqlite::params![id, text_path.to_string_lossy()],
                )?;
                Ok(())
            })
            .unwrap();

        let report = run_score(&store, &config()).await.unwrap();
        assert_eq!(report.with_fulltext, 1);
        let doc = store.with_conn(|c| documents::get(c, id)).unwrap().unwrap();
        assert!(doc.relevance_score.unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_short_fulltext_is_not_counted() {
        let tmp = TempDir::new().unwrap();
        let store = Store::in_memory().unwrap();
        let id = seed(&store, "Sediment acoustics note", "");
        let text_path = tmp.path().join("note.txt");
        std::fs::write(&text_path, "sound speed").unwrap();
        store
            .with_conn(|c| {
                c.execute(
                    "UPDATE documents SET content_path = ?2 WHERE id = ?1",
                    rusqlite::params![id, text_path.to_string_lossy()],
                )?;
                Ok(())
            })
            .unwrap();

        let report = run_score(&store, &config()).await.unwrap();
        assert_eq!(report.scored, 1);
        assert_eq!(report.with_fulltext, 0);
    }

    #[tokio::test]
    async fn test_empty_lexicon_is_rejected() {
        let store = Store::in_memory().unwrap();
        let err = run_score(&store, &ScoringConfig::default()).await;
        assert!(matches!(err, Err(AppError::Config(_))));
    }
}
