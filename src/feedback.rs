//! Human-in-the-loop feedback, persisted as a pretty-printed JSON file.

use crate::error::ServerError;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

pub const FEEDBACK_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Feedback as submitted by a student.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewFeedback {
    /// The question that was asked
    pub question: String,
    /// The answer the tutor gave
    pub original_response: String,
    /// Rating from 1 (poor) to 5 (excellent)
    pub feedback_rating: u8,
    /// Optional free-text comment
    #[serde(default)]
    pub feedback_text: Option<String>,
    /// Optional corrected answer
    #[serde(default)]
    pub suggested_correction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: String,
    pub question: String,
    pub original_response: String,
    pub feedback_rating: u8,
    pub feedback_text: Option<String>,
    pub suggested_correction: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Feedback {
    pub fn new(input: NewFeedback) -> Result<Self, ServerError> {
        if !(1..=5).contains(&input.feedback_rating) {
            return Err(ServerError::Feedback(format!(
                "Rating must be between 1 and 5, got {}",
                input.feedback_rating
            )));
        }
        Ok(Self {
            feedback_id: Uuid::new_v4().to_string(),
            question: input.question,
            original_response: input.original_response,
            feedback_rating: input.feedback_rating,
            feedback_text: input.feedback_text.filter(|t| !t.trim().is_empty()),
            suggested_correction: input.suggested_correction.filter(|c| !c.trim().is_empty()),
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub total_feedback: usize,
    pub average_rating: f64,
    pub positive_feedback: usize,
    pub negative_feedback: usize,
}

/// Word-set Jaccard similarity over lowercase whitespace tokens.
pub fn question_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let set_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let set_b: HashSet<&str> = b_lower.split_whitespace().collect();

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// In-memory feedback list mirrored to a JSON file. Reads never touch the
/// disk; writes are serialized by `save_lock`.
pub struct FeedbackHandler {
    path: PathBuf,
    items: RwLock<Vec<Feedback>>,
    save_lock: Mutex<()>,
}

impl FeedbackHandler {
    /// Load existing feedback from `path`. A missing file starts empty; an
    /// unreadable one is logged and also starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match load_feedback(&path) {
            Ok(items) => {
                if !items.is_empty() {
                    info!("Loaded {} feedback items from {}", items.len(), path.display());
                }
                items
            }
            Err(e) => {
                warn!("Error loading feedback data from {}: {e}", path.display());
                Vec::new()
            }
        };
        Self {
            path,
            items: RwLock::new(items),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn add_feedback(&self, input: NewFeedback) -> Result<Feedback, ServerError> {
        let feedback = Feedback::new(input)?;
        let _saving = self.save_lock.lock().await;
        let snapshot = {
            let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            items.push(feedback.clone());
            items.clone()
        };
        if let Err(e) = save_feedback(&self.path, &snapshot).await {
            self.items
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|fb| fb.feedback_id != feedback.feedback_id);
            return Err(e);
        }
        info!(
            "📝 Stored feedback {} (rating {}/5)",
            feedback.feedback_id, feedback.feedback_rating
        );
        Ok(feedback)
    }

    pub fn get_feedback_for_question(&self, question: &str, threshold: f64) -> Vec<Feedback> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|fb| question_similarity(&fb.question, question) >= threshold)
            .cloned()
            .collect()
    }

    pub fn get_all_feedback(&self) -> Vec<Feedback> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_average_rating(&self) -> f64 {
        average_rating(&self.items.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn get_feedback_stats(&self) -> FeedbackStats {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        FeedbackStats {
            total_feedback: items.len(),
            average_rating: average_rating(&items),
            positive_feedback: items.iter().filter(|fb| fb.feedback_rating >= 4).count(),
            negative_feedback: items.iter().filter(|fb| fb.feedback_rating <= 2).count(),
        }
    }

    /// Feedback items that carry a corrected answer.
    pub fn corrections(&self) -> Vec<Feedback> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|fb| fb.suggested_correction.is_some())
            .cloned()
            .collect()
    }
}

fn average_rating(items: &[Feedback]) -> f64 {
    if items.is_empty() {
        return 0.0;
    }
    let sum: u32 = items.iter().map(|fb| u32::from(fb.feedback_rating)).sum();
    f64::from(sum) / items.len() as f64
}

fn load_feedback(path: &Path) -> Result<Vec<Feedback>, ServerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&content)?)
}

async fn save_feedback(path: &Path, items: &[Feedback]) -> Result<(), ServerError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
