use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("Web search error ({provider}): {message}")]
    Search { provider: String, message: String },
    #[error("Dataset error: {0}")]
    Dataset(String),
    #[error("Feedback error: {0}")]
    Feedback(String),
    #[error("Tiktoken error: {0}")]
    Tiktoken(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),
    #[error("MCP runtime error: {0}")]
    McpRuntime(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn search(provider: &str, message: impl Into<String>) -> Self {
        ServerError::Search {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(e: reqwest::Error) -> Self {
        ServerError::Internal(format!("HTTP client error: {e}"))
    }
}
