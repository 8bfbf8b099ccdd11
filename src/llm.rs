use crate::{config::AppConfig, error::ServerError};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client as OpenAIClient,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const TUTOR_SYSTEM_PROMPT: &str =
    "You are a patient mathematics tutor. Answer only mathematics questions and show your work step by step.";

/// A text-in, text-out language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ServerError>;
}

/// Chat completions against any OpenAI-compatible endpoint (Gemini by default).
pub struct OpenAiCompatibleChat {
    client: OpenAIClient<OpenAIConfig>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
}

impl OpenAiCompatibleChat {
    pub fn new(api_key: &str, api_base: &str, model: &str) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base.trim_end_matches('/'));
        Self {
            client: OpenAIClient::with_config(config),
            model: model.to_string(),
            system_prompt: None,
            temperature: 0.2,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Arc<dyn ChatModel>, ServerError> {
        let api_key = config
            .gemini_api_key
            .as_deref()
            .ok_or_else(|| ServerError::MissingEnvVar("GEMINI_API_KEY".to_string()))?;
        Ok(Arc::new(
            Self::new(api_key, &config.llm_api_base, &config.llm_model)
                .with_system_prompt(TUTOR_SYSTEM_PROMPT),
        ))
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleChat {
    async fn complete(&self, prompt: &str) -> Result<String, ServerError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.as_str())
                    .build()?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(self.temperature)
            .messages(messages)
            .build()?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ServerError::Llm(format!("Chat completion failed: {e}")))?;

        if let Some(usage) = &response.usage {
            debug!(
                "LLM usage: {} prompt + {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ServerError::Llm("No content in completion".to_string()))
    }
}
