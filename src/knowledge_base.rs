//! Semantic retrieval over the math knowledge base.

use crate::{
    database::{KbStats, ProblemStore},
    dataset::MathProblem,
    embeddings::{embed_query_with, EmbeddingProvider},
    error::ServerError,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

pub const ANSWER_TOP_K: i64 = 3;
pub const ANSWER_THRESHOLD: f32 = 0.75;
pub const SIMILAR_TOP_K: i64 = 5;
pub const SIMILAR_THRESHOLD: f32 = 0.6;

#[derive(Debug, Clone, Serialize)]
pub struct KbHit {
    pub problem: MathProblem,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KbUpdate {
    Updated,
    Added,
}

impl KbUpdate {
    pub fn message(self) -> &'static str {
        match self {
            KbUpdate::Updated => "Updated existing KB item",
            KbUpdate::Added => "Added new KB item from feedback",
        }
    }
}

/// Optional metadata carried with a feedback-driven KB update.
#[derive(Debug, Clone, Default)]
pub struct ItemMetadata {
    pub level: Option<String>,
    pub problem_type: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<i32>,
}

/// Anything that can answer nearest-neighbour queries over solved problems.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Top `limit` hits ordered by descending similarity.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<KbHit>, ServerError>;

    /// Best match if its score is strictly above `threshold`.
    async fn retrieve_answer(
        &self,
        query: &str,
        top_k: i64,
        threshold: f32,
    ) -> Result<Option<KbHit>, ServerError> {
        let hits = self.search(query, top_k).await?;
        Ok(hits.into_iter().next().filter(|hit| hit.score > threshold))
    }

    /// Every hit strictly above `threshold`.
    async fn retrieve_similar(
        &self,
        query: &str,
        top_k: i64,
        threshold: f32,
    ) -> Result<Vec<KbHit>, ServerError> {
        let hits = self.search(query, top_k).await?;
        Ok(hits.into_iter().filter(|hit| hit.score > threshold).collect())
    }
}

#[derive(Clone)]
pub struct KnowledgeBase {
    store: Arc<dyn ProblemStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn ProblemStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub async fn stats(&self) -> Result<KbStats, ServerError> {
        self.store.get_kb_stats().await
    }

    /// Fold a corrected answer back into the knowledge base.
    pub async fn update_item(
        &self,
        question: &str,
        answer: &str,
        metadata: &ItemMetadata,
    ) -> Result<KbUpdate, ServerError> {
        let embedding = embed_query_with(self.embedder.as_ref(), question).await?;
        // earlier corrections of the same question are stored under its feedback key
        let existing = match self.store.find_by_key(&feedback_key(question)).await? {
            Some(problem) => Some(problem),
            None => self
                .retrieve_answer(question, ANSWER_TOP_K, ANSWER_THRESHOLD)
                .await?
                .map(|hit| hit.problem),
        };

        let (problem, outcome) = match existing {
            Some(problem) => (
                merge_correction(problem, answer, metadata),
                KbUpdate::Updated,
            ),
            None => (
                new_feedback_item(question, answer, metadata),
                KbUpdate::Added,
            ),
        };

        self.store.upsert_problem(&problem, &embedding).await?;
        info!("{} ({})", outcome.message(), problem.key);
        Ok(outcome)
    }
}

#[async_trait]
impl KnowledgeSource for KnowledgeBase {
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<KbHit>, ServerError> {
        let embedding = embed_query_with(self.embedder.as_ref(), query).await?;
        let results = self
            .store
            .search_similar_problems(&embedding, limit)
            .await?;
        debug!("KB search returned {} hits", results.len());
        Ok(results
            .into_iter()
            .map(|(problem, score)| KbHit { problem, score })
            .collect())
    }
}

pub fn feedback_key(question: &str) -> String {
    let normalized = question
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    format!("feedback:{normalized}")
}

fn merge_correction(mut problem: MathProblem, answer: &str, metadata: &ItemMetadata) -> MathProblem {
    problem.answer = answer.to_string();
    if let Some(level) = &metadata.level {
        problem.level = level.clone();
    }
    if let Some(problem_type) = &metadata.problem_type {
        problem.problem_type = problem_type.clone();
    }
    if let Some(category) = &metadata.category {
        problem.category = category.clone();
    }
    if let Some(difficulty) = metadata.difficulty {
        problem.difficulty = difficulty;
    }
    problem
}

fn new_feedback_item(question: &str, answer: &str, metadata: &ItemMetadata) -> MathProblem {
    MathProblem {
        key: feedback_key(question),
        question: question.to_string(),
        answer: answer.to_string(),
        level: metadata.level.clone().unwrap_or_else(|| "unknown".to_string()),
        problem_type: metadata
            .problem_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        category: metadata
            .category
            .clone()
            .unwrap_or_else(|| "feedback".to_string()),
        difficulty: metadata.difficulty.unwrap_or(2),
        steps: None,
        source: "user_feedback".to_string(),
    }
}

/// In-memory source used by tests across the crate.
#[cfg(test)]
pub(crate) struct StaticKnowledge {
    pub hits: Vec<KbHit>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn search(&self, _query: &str, limit: i64) -> Result<Vec<KbHit>, ServerError> {
        if self.fail {
            return Err(ServerError::Database("connection refused".to_string()));
        }
        Ok(self.hits.iter().take(limit as usize).cloned().collect())
    }
}

#[cfg(test)]
pub(crate) fn test_hit(question: &str, answer: &str, score: f32) -> KbHit {
    KbHit {
        problem: MathProblem {
            key: question.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            category: "algebra".to_string(),
            ..MathProblem::default()
        },
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::test_hit as hit;
    use super::*;
    use crate::embeddings::tests::FakeEmbedder;
    use ndarray::Array1;
    use std::sync::Mutex;

    /// Rows keep the similarity they were seeded with; new rows score 0.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<(MathProblem, f32)>>,
    }

    impl MemoryStore {
        fn seeded(rows: Vec<(MathProblem, f32)>) -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(rows),
            })
        }

        fn row(&self, key: &str) -> Option<MathProblem> {
            let rows = self.rows.lock().unwrap();
            rows.iter().find(|(p, _)| p.key == key).map(|(p, _)| p.clone())
        }

        fn len(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ProblemStore for MemoryStore {
        async fn upsert_problem(
            &self,
            problem: &MathProblem,
            _embedding: &Array1<f32>,
        ) -> Result<(), ServerError> {
            let mut rows = self.rows.lock().unwrap();
            match rows.iter_mut().find(|(p, _)| p.key == problem.key) {
                Some(row) => row.0 = problem.clone(),
                None => rows.push((problem.clone(), 0.0)),
            }
            Ok(())
        }

        async fn search_similar_problems(
            &self,
            _query_embedding: &Array1<f32>,
            limit: i64,
        ) -> Result<Vec<(MathProblem, f32)>, ServerError> {
            let mut rows = self.rows.lock().unwrap().clone();
            rows.sort_by(|a, b| b.1.total_cmp(&a.1));
            rows.truncate(limit as usize);
            Ok(rows)
        }

        async fn find_by_key(&self, key: &str) -> Result<Option<MathProblem>, ServerError> {
            Ok(self.row(key))
        }

        async fn get_kb_stats(&self) -> Result<KbStats, ServerError> {
            Ok(KbStats {
                total_points: self.len() as i64,
                vector_size: Some(3),
                distance_metric: "cosine".to_string(),
                last_updated: None,
                by_source: vec![],
            })
        }
    }

    fn knowledge(store: Arc<MemoryStore>) -> KnowledgeBase {
        KnowledgeBase::new(store, Arc::new(FakeEmbedder::default()))
    }

    #[tokio::test]
    async fn correction_updates_a_strong_similarity_match() {
        let store = MemoryStore::seeded(vec![(hit("Solve x^2 = 4", "x = 2", 0.9).problem, 0.9)]);
        let kb = knowledge(store.clone());

        let outcome = kb
            .update_item("solve x^2 = 4", "x = ±2", &ItemMetadata::default())
            .await
            .unwrap();

        assert_eq!(outcome, KbUpdate::Updated);
        assert_eq!(store.len(), 1);
        assert_eq!(store.row("Solve x^2 = 4").unwrap().answer, "x = ±2");
    }

    #[tokio::test]
    async fn correction_without_a_match_adds_a_feedback_item() {
        let store = MemoryStore::seeded(vec![(hit("Integrate sin x", "-cos x + C", 0.7).problem, 0.7)]);
        let kb = knowledge(store.clone());

        let outcome = kb
            .update_item("Solve 3x = 9", "x = 3", &ItemMetadata::default())
            .await
            .unwrap();

        assert_eq!(outcome, KbUpdate::Added);
        assert_eq!(store.len(), 2);
        let added = store.row("feedback:solve 3x = 9").unwrap();
        assert_eq!(added.answer, "x = 3");
        assert_eq!(added.source, "user_feedback");
        assert_eq!(store.row("Integrate sin x").unwrap().answer, "-cos x + C");
    }

    #[tokio::test]
    async fn repeated_corrections_update_the_same_feedback_item() {
        let store = Arc::new(MemoryStore::default());
        let kb = knowledge(store.clone());

        let first = kb
            .update_item("Solve 3x = 9", "x = 4", &ItemMetadata::default())
            .await
            .unwrap();
        let second = kb
            .update_item("solve  3x = 9", "x = 3", &ItemMetadata::default())
            .await
            .unwrap();

        assert_eq!((first, second), (KbUpdate::Added, KbUpdate::Updated));
        assert_eq!(store.len(), 1);
        assert_eq!(store.row("feedback:solve 3x = 9").unwrap().answer, "x = 3");
    }

    #[tokio::test]
    async fn feedback_key_wins_over_similarity() {
        let mut earlier = new_feedback_item("Solve 3x = 9", "x = 4", &ItemMetadata::default());
        earlier.category = "linear".to_string();
        let store = MemoryStore::seeded(vec![
            (hit("Solve 3x = 9 for x", "3", 0.95).problem, 0.95),
            (earlier, 0.1),
        ]);
        let kb = knowledge(store.clone());

        let outcome = kb
            .update_item("Solve 3x = 9", "x = 3", &ItemMetadata::default())
            .await
            .unwrap();

        assert_eq!(outcome, KbUpdate::Updated);
        let updated = store.row("feedback:solve 3x = 9").unwrap();
        assert_eq!(updated.answer, "x = 3");
        assert_eq!(updated.category, "linear");
        assert_eq!(store.row("Solve 3x = 9 for x").unwrap().answer, "3");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn search_maps_store_rows_to_hits() {
        let store = MemoryStore::seeded(vec![
            (hit("a", "1", 0.4).problem, 0.4),
            (hit("b", "2", 0.8).problem, 0.8),
        ]);
        let kb = knowledge(store);
        let hits = kb.search("q", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].problem.question, "b");
        assert!((hits[0].score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn retrieve_answer_requires_strictly_greater_score() {
        let kb = StaticKnowledge {
            hits: vec![hit("Solve x + 1 = 2", "x = 1", 0.75)],
            fail: false,
        };
        assert!(kb
            .retrieve_answer("x+1=2", ANSWER_TOP_K, ANSWER_THRESHOLD)
            .await
            .unwrap()
            .is_none());

        let kb = StaticKnowledge {
            hits: vec![hit("Solve x + 1 = 2", "x = 1", 0.81)],
            fail: false,
        };
        let best = kb
            .retrieve_answer("x+1=2", ANSWER_TOP_K, ANSWER_THRESHOLD)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.problem.answer, "x = 1");
    }

    #[tokio::test]
    async fn retrieve_similar_filters_by_threshold() {
        let kb = StaticKnowledge {
            hits: vec![
                hit("a", "1", 0.9),
                hit("b", "2", 0.61),
                hit("c", "3", 0.6),
                hit("d", "4", 0.2),
            ],
            fail: false,
        };
        let similar = kb
            .retrieve_similar("q", SIMILAR_TOP_K, SIMILAR_THRESHOLD)
            .await
            .unwrap();
        let questions: Vec<_> = similar.iter().map(|h| h.problem.question.as_str()).collect();
        assert_eq!(questions, vec!["a", "b"]);
    }

    #[test]
    fn feedback_items_get_defaults() {
        let item = new_feedback_item("  Solve   2x = 4 ", "x = 2", &ItemMetadata::default());
        assert_eq!(item.key, "feedback:solve 2x = 4");
        assert_eq!(item.level, "unknown");
        assert_eq!(item.category, "feedback");
        assert_eq!(item.difficulty, 2);
        assert_eq!(item.source, "user_feedback");
    }

    #[test]
    fn corrections_keep_identity_and_merge_metadata() {
        let original = hit("Solve x^2 = 4", "x = 2", 0.9).problem;
        let metadata = ItemMetadata {
            difficulty: Some(3),
            ..ItemMetadata::default()
        };
        let merged = merge_correction(original, "x = ±2", &metadata);
        assert_eq!(merged.key, "Solve x^2 = 4");
        assert_eq!(merged.answer, "x = ±2");
        assert_eq!(merged.difficulty, 3);
        assert_eq!(merged.category, "algebra");
    }
}
