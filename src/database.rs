use crate::{dataset::MathProblem, error::ServerError};
use async_trait::async_trait;
use ndarray::Array1;
use pgvector::Vector;
use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::time::Duration;
use tracing::debug;

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS vector",
    r#"
    CREATE TABLE IF NOT EXISTS math_problems (
        id SERIAL PRIMARY KEY,
        problem_key TEXT NOT NULL UNIQUE,
        question TEXT NOT NULL,
        answer TEXT NOT NULL,
        level TEXT NOT NULL DEFAULT '',
        problem_type TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        difficulty INTEGER NOT NULL DEFAULT 1,
        steps TEXT,
        source TEXT NOT NULL DEFAULT 'dataset',
        embedding vector NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    "CREATE INDEX IF NOT EXISTS math_problems_source_idx ON math_problems (source)",
];

const UPSERT_PROBLEM: &str = r#"
    INSERT INTO math_problems
        (problem_key, question, answer, level, problem_type, category, difficulty, steps, source, embedding)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (problem_key)
    DO UPDATE SET
        question = $2,
        answer = $3,
        level = $4,
        problem_type = $5,
        category = $6,
        difficulty = $7,
        steps = $8,
        source = $9,
        embedding = $10,
        updated_at = CURRENT_TIMESTAMP
"#;

/// Keyed storage of solved problems with vector search.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// Insert or update by `problem.key`.
    async fn upsert_problem(
        &self,
        problem: &MathProblem,
        embedding: &Array1<f32>,
    ) -> Result<(), ServerError>;

    /// Nearest problems by cosine similarity, best first.
    async fn search_similar_problems(
        &self,
        query_embedding: &Array1<f32>,
        limit: i64,
    ) -> Result<Vec<(MathProblem, f32)>, ServerError>;

    async fn find_by_key(&self, key: &str) -> Result<Option<MathProblem>, ServerError>;

    async fn get_kb_stats(&self) -> Result<KbStats, ServerError>;
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, ServerError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .idle_timeout(Duration::from_secs(300)) // Close idle after 5min
            .max_lifetime(Duration::from_secs(1800)) // Refresh after 30min
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| ServerError::Database(format!("Failed to connect to database: {e}")))?;

        Ok(Self { pool })
    }

    /// Create the extension, table and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<(), ServerError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| ServerError::Database(format!("Failed to create schema: {e}")))?;
        }
        Ok(())
    }

    /// Drop every stored problem, keeping the table.
    pub async fn recreate_collection(&self) -> Result<(), ServerError> {
        sqlx::query("TRUNCATE TABLE math_problems RESTART IDENTITY")
            .execute(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("Failed to recreate collection: {e}")))?;
        Ok(())
    }

    /// Batch upsert inside one transaction
    pub async fn upsert_problems_batch(
        &self,
        batch: &[(MathProblem, Array1<f32>)],
    ) -> Result<(), ServerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ServerError::Database(format!("Failed to begin transaction: {e}")))?;

        for (problem, embedding) in batch {
            bind_problem(sqlx::query(UPSERT_PROBLEM), problem, embedding)
                .execute(&mut *tx)
                .await
                .map_err(|e| ServerError::Database(format!("Failed to upsert problem: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| ServerError::Database(format!("Failed to commit transaction: {e}")))?;

        debug!("Upserted batch of {} problems", batch.len());
        Ok(())
    }

    pub async fn count_problems(&self) -> Result<i64, ServerError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM math_problems")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("Failed to count problems: {e}")))?;
        Ok(row.get("count"))
    }
}

#[async_trait]
impl ProblemStore for Database {
    /// Insert or update a single problem
    async fn upsert_problem(
        &self,
        problem: &MathProblem,
        embedding: &Array1<f32>,
    ) -> Result<(), ServerError> {
        bind_problem(sqlx::query(UPSERT_PROBLEM), problem, embedding)
            .execute(&self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("Failed to upsert problem: {e}")))?;
        Ok(())
    }

    /// Search for similar problems using cosine similarity
    async fn search_similar_problems(
        &self,
        query_embedding: &Array1<f32>,
        limit: i64,
    ) -> Result<Vec<(MathProblem, f32)>, ServerError> {
        let embedding_vec = Vector::from(query_embedding.to_vec());

        let rows = sqlx::query(
            r#"
            SELECT
                problem_key, question, answer, level, problem_type, category,
                difficulty, steps, source,
                1 - (embedding <=> $1) AS similarity
            FROM math_problems
            ORDER BY embedding <=> $1
            LIMIT $2
            "#,
        )
        .bind(embedding_vec)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("Failed to search problems: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| {
                let similarity: f64 = row.get("similarity");
                (problem_from_row(row), similarity as f32)
            })
            .collect())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<MathProblem>, ServerError> {
        let row = sqlx::query(
            r#"
            SELECT problem_key, question, answer, level, problem_type, category,
                   difficulty, steps, source
            FROM math_problems
            WHERE problem_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("Failed to look up problem: {e}")))?;

        Ok(row.as_ref().map(problem_from_row))
    }

    /// Knowledge-base statistics
    async fn get_kb_stats(&self) -> Result<KbStats, ServerError> {
        let summary = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                MAX(vector_dims(embedding)) AS dims,
                MAX(updated_at) AS last_updated
            FROM math_problems
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("Failed to get KB stats: {e}")))?;

        let by_source = sqlx::query(
            r#"
            SELECT source, COUNT(*) AS count
            FROM math_problems
            GROUP BY source
            ORDER BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("Failed to get KB stats: {e}")))?;

        Ok(KbStats {
            total_points: summary.get("total"),
            vector_size: summary.get("dims"),
            distance_metric: "cosine".to_string(),
            last_updated: summary.get("last_updated"),
            by_source: by_source
                .iter()
                .map(|row| (row.get("source"), row.get("count")))
                .collect(),
        })
    }
}

fn bind_problem<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    problem: &'q MathProblem,
    embedding: &Array1<f32>,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&problem.key)
        .bind(&problem.question)
        .bind(&problem.answer)
        .bind(&problem.level)
        .bind(&problem.problem_type)
        .bind(&problem.category)
        .bind(problem.difficulty)
        .bind(&problem.steps)
        .bind(&problem.source)
        .bind(Vector::from(embedding.to_vec()))
}

fn problem_from_row(row: &PgRow) -> MathProblem {
    MathProblem {
        key: row.get("problem_key"),
        question: row.get("question"),
        answer: row.get("answer"),
        level: row.get("level"),
        problem_type: row.get("problem_type"),
        category: row.get("category"),
        difficulty: row.get("difficulty"),
        steps: row.get("steps"),
        source: row.get("source"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KbStats {
    pub total_points: i64,
    pub vector_size: Option<i32>,
    pub distance_metric: String,
    pub last_updated: Option<chrono::NaiveDateTime>,
    pub by_source: Vec<(String, i64)>,
}
