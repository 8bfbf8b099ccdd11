use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_DATASET_PATH: &str = "data/math_dataset.json";
pub const SAMPLE_DATASET_PATH: &str = "data/sample_math_dataset.json";

/// One knowledge-base entry: a solved math problem plus its metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MathProblem {
    /// Stable identity used for upserts.
    pub key: String,
    pub question: String,
    pub answer: String,
    pub level: String,
    #[serde(rename = "type")]
    pub problem_type: String,
    pub category: String,
    pub difficulty: i32,
    pub steps: Option<String>,
    /// `dataset` or `user_feedback`.
    pub source: String,
}

/// Raw record as found in the dataset files.
#[derive(Debug, Deserialize)]
struct RawProblem {
    id: Option<Value>,
    question: Option<String>,
    answer: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default, rename = "type")]
    problem_type: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    difficulty: Option<i32>,
    #[serde(default)]
    steps: Option<Value>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub problems: Vec<MathProblem>,
    pub skipped: usize,
}

/// Pick the dataset to load: explicit path, then the full dataset, then the sample.
pub fn resolve_dataset_path(explicit: Option<&Path>) -> Result<PathBuf, ServerError> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ServerError::Dataset(format!(
            "Dataset not found: {}",
            path.display()
        )));
    }

    for candidate in [DEFAULT_DATASET_PATH, SAMPLE_DATASET_PATH] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }

    Err(ServerError::Dataset(format!(
        "Neither {DEFAULT_DATASET_PATH} nor {SAMPLE_DATASET_PATH} found"
    )))
}

pub fn load_dataset(path: &Path) -> Result<LoadResult, ServerError> {
    info!("Loading math dataset from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    parse_dataset(&content)
}

pub fn parse_dataset(content: &str) -> Result<LoadResult, ServerError> {
    let raw: Vec<Value> = serde_json::from_str(content)
        .map_err(|e| ServerError::Dataset(format!("Dataset must be a JSON array: {e}")))?;

    let mut problems = Vec::with_capacity(raw.len());
    let mut skipped = 0;

    for (i, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<RawProblem>(value) {
            Ok(record) => match into_problem(i, record) {
                Some(problem) => problems.push(problem),
                None => {
                    warn!("Skipping record {i}: missing question or answer");
                    skipped += 1;
                }
            },
            Err(e) => {
                warn!("Skipping record {i}: {e}");
                skipped += 1;
            }
        }
    }

    info!("Loaded {} problems ({} skipped)", problems.len(), skipped);
    Ok(LoadResult { problems, skipped })
}

fn into_problem(index: usize, record: RawProblem) -> Option<MathProblem> {
    let question = record.question.filter(|q| !q.trim().is_empty())?;
    let answer = record.answer.filter(|a| !a.trim().is_empty())?;

    let key = match record.id {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => format!("idx-{index}"),
    };

    let steps = match record.steps {
        Some(Value::String(s)) => Some(s),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    };

    Some(MathProblem {
        key,
        question,
        answer,
        level: record.level.unwrap_or_default(),
        problem_type: record.problem_type.unwrap_or_default(),
        category: record.category.unwrap_or_default(),
        difficulty: record.difficulty.unwrap_or(1),
        steps,
        source: "dataset".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_with_defaults() {
        let json = r#"[
            {"id": "alg-1", "question": "Solve x + 2 = 5", "answer": "x = 3",
             "level": "Level 1", "type": "Algebra", "category": "linear", "difficulty": 2,
             "steps": ["Subtract 2", "x = 3"]},
            {"id": 7, "question": "What is 2 + 2?", "answer": "4"},
            {"question": "Factor x^2 - 9", "answer": "(x - 3)(x + 3)"}
        ]"#;

        let result = parse_dataset(json).unwrap();
        assert_eq!(result.skipped, 0);
        assert_eq!(result.problems.len(), 3);

        let first = &result.problems[0];
        assert_eq!(first.key, "alg-1");
        assert_eq!(first.problem_type, "Algebra");
        assert_eq!(first.difficulty, 2);
        assert_eq!(first.steps.as_deref(), Some("Subtract 2\nx = 3"));

        assert_eq!(result.problems[1].key, "idx-1");
        assert_eq!(result.problems[1].difficulty, 1);
        assert_eq!(result.problems[2].key, "idx-2");
        assert_eq!(result.problems[2].source, "dataset");
    }

    #[test]
    fn skips_incomplete_records() {
        let json = r#"[
            {"id": "a", "question": "", "answer": "1"},
            {"id": "b", "answer": "1"},
            {"id": "c", "question": "Compute 3*3", "answer": "9"},
            {"id": "d", "question": 12, "answer": "x"}
        ]"#;

        let result = parse_dataset(json).unwrap();
        assert_eq!(result.problems.len(), 1);
        assert_eq!(result.skipped, 3);
        assert_eq!(result.problems[0].key, "c");
    }

    #[test]
    fn rejects_non_array() {
        assert!(matches!(
            parse_dataset(r#"{"question": "x"}"#),
            Err(ServerError::Dataset(_))
        ));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = resolve_dataset_path(Some(Path::new("/definitely/not/here.json"))).unwrap_err();
        assert!(err.to_string().contains("Dataset not found"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.json");
        std::fs::write(&path, r#"[{"id":"g1","question":"Area of a circle r=5","answer":"25π"}]"#)
            .unwrap();

        let resolved = resolve_dataset_path(Some(&path)).unwrap();
        let result = load_dataset(&resolved).unwrap();
        assert_eq!(result.problems[0].answer, "25π");
    }
}
