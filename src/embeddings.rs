use crate::{dataset::MathProblem, error::ServerError};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAIClient};
use async_trait::async_trait;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Process-wide embedding provider, set once by each binary at startup.
pub static EMBEDDING_CLIENT: OnceLock<Arc<dyn EmbeddingProvider>> = OnceLock::new();

/// Inputs longer than this many cl100k tokens are truncated before embedding.
pub const MAX_EMBEDDING_TOKENS: usize = 8000;
/// Maximum number of inputs sent in a single embeddings request.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

const VOYAGE_EMBEDDINGS_URL: &str = "https://api.voyageai.com/v1/embeddings";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text, returning vectors in input order plus the tokens billed.
    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, usize), ServerError>;

    fn name(&self) -> &str;
}

pub enum EmbeddingConfig {
    OpenAI {
        client: OpenAIClient<OpenAIConfig>,
        model: String,
    },
    VoyageAI {
        api_key: String,
        model: String,
    },
}

pub fn initialize_embedding_provider(config: EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config {
        EmbeddingConfig::OpenAI { client, model } => {
            Arc::new(OpenAIEmbeddingProvider { client, model })
        }
        EmbeddingConfig::VoyageAI { api_key, model } => {
            Arc::new(VoyageAIEmbeddingProvider::new(api_key, model))
        }
    }
}

/// Install the global provider. Fails if one was already installed.
pub fn install_embedding_provider(config: EmbeddingConfig) -> Result<(), ServerError> {
    let provider = initialize_embedding_provider(config);
    let name = provider.name().to_string();
    if EMBEDDING_CLIENT.set(provider).is_err() {
        return Err(ServerError::Internal(
            "Failed to set embedding provider".to_string(),
        ));
    }
    info!("✅ {name} embedding provider initialized");
    Ok(())
}

pub fn embedding_client() -> Result<Arc<dyn EmbeddingProvider>, ServerError> {
    EMBEDDING_CLIENT
        .get()
        .cloned()
        .ok_or_else(|| ServerError::Embedding("Embedding client not initialized".to_string()))
}

pub struct OpenAIEmbeddingProvider {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, usize), ServerError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(texts.to_vec())
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        let vectors = data.into_iter().map(|e| e.embedding).collect::<Vec<_>>();
        ensure_embedding_count(texts.len(), vectors.len())?;

        Ok((vectors, response.usage.total_tokens as usize))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

pub struct VoyageAIEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl VoyageAIEmbeddingProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: VOYAGE_EMBEDDINGS_URL.to_string(),
            api_key,
            model,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[derive(Serialize)]
struct VoyageRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct VoyageResponse {
    data: Vec<VoyageEmbedding>,
    usage: VoyageUsage,
}

#[derive(Deserialize)]
struct VoyageEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct VoyageUsage {
    total_tokens: usize,
}

#[async_trait]
impl EmbeddingProvider for VoyageAIEmbeddingProvider {
    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> Result<(Vec<Vec<f32>>, usize), ServerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&VoyageRequest {
                input: texts,
                model: &self.model,
            })
            .send()
            .await
            .map_err(|e| ServerError::Embedding(format!("Voyage request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServerError::Embedding(format!(
                "Voyage API returned {status}: {body}"
            )));
        }

        let mut parsed: VoyageResponse = response
            .json()
            .await
            .map_err(|e| ServerError::Embedding(format!("Invalid Voyage response: {e}")))?;
        parsed.data.sort_by_key(|e| e.index);
        ensure_embedding_count(texts.len(), parsed.data.len())?;

        Ok((
            parsed.data.into_iter().map(|e| e.embedding).collect(),
            parsed.usage.total_tokens,
        ))
    }

    fn name(&self) -> &str {
        "voyage"
    }
}

fn ensure_embedding_count(expected: usize, received: usize) -> Result<(), ServerError> {
    if expected != received {
        return Err(ServerError::Embedding(format!(
            "Expected {expected} embeddings, received {received}"
        )));
    }
    Ok(())
}

/// Truncate `text` to at most `MAX_EMBEDDING_TOKENS` cl100k tokens.
pub fn truncate_for_embedding(
    bpe: &tiktoken_rs::CoreBPE,
    text: &str,
) -> Result<String, ServerError> {
    let tokens = bpe.encode_with_special_tokens(text);
    if tokens.len() <= MAX_EMBEDDING_TOKENS {
        return Ok(text.to_string());
    }
    bpe.decode(tokens[..MAX_EMBEDDING_TOKENS].to_vec())
        .map_err(|e| ServerError::Tiktoken(e.to_string()))
}

/// Embed the question text of every problem using the global provider.
pub async fn generate_embeddings(
    problems: &[MathProblem],
) -> Result<(Vec<(MathProblem, Array1<f32>)>, usize), ServerError> {
    let client = embedding_client()?;
    generate_embeddings_with(client.as_ref(), problems).await
}

pub async fn generate_embeddings_with(
    client: &dyn EmbeddingProvider,
    problems: &[MathProblem],
) -> Result<(Vec<(MathProblem, Array1<f32>)>, usize), ServerError> {
    let bpe = tiktoken_rs::cl100k_base().map_err(|e| ServerError::Tiktoken(e.to_string()))?;

    let mut embedded = Vec::with_capacity(problems.len());
    let mut total_tokens = 0;

    for (batch_index, batch) in problems.chunks(EMBEDDING_BATCH_SIZE).enumerate() {
        let inputs = batch
            .iter()
            .map(|p| truncate_for_embedding(&bpe, &p.question))
            .collect::<Result<Vec<_>, _>>()?;

        let (vectors, tokens) = client.generate_embeddings(&inputs).await?;
        ensure_embedding_count(inputs.len(), vectors.len())?;
        total_tokens += tokens;

        for (problem, vector) in batch.iter().zip(vectors) {
            embedded.push((problem.clone(), Array1::from_vec(vector)));
        }

        debug!(
            "Embedded batch {} ({} problems, {} tokens so far)",
            batch_index + 1,
            embedded.len(),
            total_tokens
        );
    }

    Ok((embedded, total_tokens))
}

/// Embed a single query string with the global provider.
pub async fn embed_query(text: &str) -> Result<Array1<f32>, ServerError> {
    let client = embedding_client()?;
    embed_query_with(client.as_ref(), text).await
}

pub async fn embed_query_with(
    client: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Array1<f32>, ServerError> {
    let (vectors, _) = client.generate_embeddings(&[text.to_string()]).await?;
    vectors
        .into_iter()
        .next()
        .map(Array1::from_vec)
        .ok_or_else(|| ServerError::Embedding("No embedding generated".to_string()))
}
