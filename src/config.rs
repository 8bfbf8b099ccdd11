//! Environment-driven configuration.
//!
//! Every binary calls `dotenvy::dotenv().ok()` first, then builds an
//! [`AppConfig`]. API keys are optional here: components that need a key
//! report [`ServerError::MissingEnvVar`] when they are constructed.

use crate::{embeddings::EmbeddingConfig, error::ServerError};
use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use std::{env, path::PathBuf};

pub const DEFAULT_LLM_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai/";
pub const DEFAULT_LLM_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/math_kb_vectors";
pub const FEEDBACK_FILE_NAME: &str = "feedback_data.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini_api_key: Option<String>,
    pub llm_api_base: String,
    pub llm_model: String,
    pub database_url: String,
    pub embedding_provider: String,
    pub embedding_model: Option<String>,
    pub openai_api_base: Option<String>,
    pub voyage_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub feedback_db_path: Option<PathBuf>,
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            llm_api_base: non_empty_var("LLM_API_BASE")
                .unwrap_or_else(|| DEFAULT_LLM_API_BASE.to_string()),
            llm_model: non_empty_var("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            database_url: non_empty_var("MATH_KB_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            embedding_provider: non_empty_var("EMBEDDING_PROVIDER")
                .unwrap_or_else(|| "openai".to_string())
                .to_lowercase(),
            embedding_model: non_empty_var("EMBEDDING_MODEL"),
            openai_api_base: non_empty_var("OPENAI_API_BASE"),
            voyage_api_key: non_empty_var("VOYAGE_API_KEY"),
            tavily_api_key: non_empty_var("TAVILY_API_KEY"),
            serper_api_key: non_empty_var("SERPER_API_KEY"),
            feedback_db_path: non_empty_var("FEEDBACK_DB_PATH").map(PathBuf::from),
        }
    }

    /// Override the embedding provider/model chosen on the command line.
    pub fn with_embedding(mut self, provider: Option<String>, model: Option<String>) -> Self {
        if let Some(provider) = provider {
            self.embedding_provider = provider.to_lowercase();
        }
        if model.is_some() {
            self.embedding_model = model;
        }
        self
    }

    pub fn embedding_config(&self) -> Result<EmbeddingConfig, ServerError> {
        match self.embedding_provider.as_str() {
            "openai" => {
                let model = self
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| "text-embedding-3-small".to_string());
                let openai_client = if let Some(api_base) = &self.openai_api_base {
                    let config = OpenAIConfig::new().with_api_base(api_base);
                    OpenAIClient::with_config(config)
                } else {
                    OpenAIClient::new()
                };
                Ok(EmbeddingConfig::OpenAI {
                    client: openai_client,
                    model,
                })
            }
            "voyage" => {
                let api_key = self
                    .voyage_api_key
                    .clone()
                    .ok_or_else(|| ServerError::MissingEnvVar("VOYAGE_API_KEY".to_string()))?;
                let model = self
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| "voyage-3.5".to_string());
                Ok(EmbeddingConfig::VoyageAI { api_key, model })
            }
            other => Err(ServerError::Config(format!(
                "Unsupported embedding provider: {other}. Use 'openai' or 'voyage'"
            ))),
        }
    }

    /// Where feedback is persisted: `FEEDBACK_DB_PATH`, else the platform data dir.
    pub fn feedback_path(&self) -> PathBuf {
        if let Some(path) = &self.feedback_db_path {
            return path.clone();
        }
        default_data_file(FEEDBACK_FILE_NAME).unwrap_or_else(|| PathBuf::from(FEEDBACK_FILE_NAME))
    }
}

#[cfg(not(target_os = "windows"))]
fn default_data_file(name: &str) -> Option<PathBuf> {
    xdg::BaseDirectories::with_prefix("math_routing_agent")
        .place_data_file(name)
        .ok()
}

#[cfg(target_os = "windows")]
fn default_data_file(name: &str) -> Option<PathBuf> {
    let dir = dirs::data_dir()?.join("math_routing_agent");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir.join(name))
}
