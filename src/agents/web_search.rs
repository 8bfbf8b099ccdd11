use crate::{
    agents::{Solution, SolutionSource},
    config::AppConfig,
    error::ServerError,
    guardrails::{is_valid_math_input, simplify_output},
    llm::ChatModel,
};
use reqwest::StatusCode;
use schemars::JsonSchema;
use scraper::Html;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub const TAVILY_URL: &str = "https://api.tavily.com/search";
pub const SERPER_URL: &str = "https://google.serper.dev/search";

pub const WEB_SEARCH_DOMAINS: &[&str] = &[
    "khanacademy.org",
    "mathway.com",
    "symbolab.com",
    "wolframalpha.com",
    "brilliant.org",
    "mathsisfun.com",
    "stackoverflow.com",
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 2;
const MAX_EXTRACTED_BLOCKS: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TavilyResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TavilyResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub results: Vec<TavilyResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SerperOrganic {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SerperAnswerBox {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SerperKnowledgeGraph {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SerperResponse {
    #[serde(default)]
    pub organic: Vec<SerperOrganic>,
    #[serde(default, rename = "knowledgeGraph")]
    pub knowledge_graph: Option<SerperKnowledgeGraph>,
    #[serde(default, rename = "answerBox")]
    pub answer_box: Option<SerperAnswerBox>,
}

/// Provider-tagged search results, as passed between toolbox tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SearchResults {
    Tavily(TavilyResponse),
    Serper(SerperResponse),
}

impl SearchResults {
    pub fn provider(&self) -> &'static str {
        match self {
            SearchResults::Tavily(_) => "Tavily",
            SearchResults::Serper(_) => "Serper",
        }
    }

    pub fn result_count(&self) -> usize {
        match self {
            SearchResults::Tavily(r) => r.results.len(),
            SearchResults::Serper(r) => r.organic.len(),
        }
    }
}

/// How much of each hit to keep when turning results into LLM context.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionProfile {
    pub snippet_chars: usize,
    pub keywords: &'static [&'static str],
    pub include_urls: bool,
    pub include_knowledge_graph: bool,
}

pub const WEB_EXTRACTION: ExtractionProfile = ExtractionProfile {
    snippet_chars: 300,
    keywords: &["step", "solve", "solution", "equation", "formula"],
    include_urls: true,
    include_knowledge_graph: true,
};

/// Raw Tavily and Serper calls with retry on rate limiting.
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    tavily_key: Option<String>,
    serper_key: Option<String>,
    tavily_url: String,
    serper_url: String,
    retry_delay: Duration,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    include_answer: bool,
    include_domains: &'a [&'a str],
    max_results: usize,
}

#[derive(Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
    gl: &'a str,
    hl: &'a str,
}

impl SearchClient {
    pub fn new(tavily_key: Option<String>, serper_key: Option<String>) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServerError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            tavily_key,
            serper_key,
            tavily_url: TAVILY_URL.to_string(),
            serper_url: SERPER_URL.to_string(),
            retry_delay: Duration::from_millis(1000),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ServerError> {
        Self::new(config.tavily_api_key.clone(), config.serper_api_key.clone())
    }

    /// Point the client at different endpoints (proxies, local mocks).
    pub fn with_endpoints(mut self, tavily_url: &str, serper_url: &str) -> Self {
        self.tavily_url = tavily_url.to_string();
        self.serper_url = serper_url.to_string();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn has_tavily(&self) -> bool {
        self.tavily_key.is_some()
    }

    pub fn has_serper(&self) -> bool {
        self.serper_key.is_some()
    }

    pub async fn tavily(
        &self,
        search_text: &str,
        max_results: usize,
        domains: &[&str],
    ) -> Result<TavilyResponse, ServerError> {
        let api_key = self
            .tavily_key
            .as_deref()
            .ok_or_else(|| ServerError::MissingEnvVar("TAVILY_API_KEY".to_string()))?;

        let request = self.http.post(&self.tavily_url).json(&TavilyRequest {
            api_key,
            query: search_text,
            search_depth: "advanced",
            include_answer: true,
            include_domains: domains,
            max_results,
        });

        let response: TavilyResponse = self.send_with_retry("tavily", request).await?;
        info!("✅ Tavily search completed - found {} results", response.results.len());
        Ok(response)
    }

    pub async fn serper(&self, search_text: &str, num: usize) -> Result<SerperResponse, ServerError> {
        let api_key = self
            .serper_key
            .as_deref()
            .ok_or_else(|| ServerError::MissingEnvVar("SERPER_API_KEY".to_string()))?;

        let request = self
            .http
            .post(&self.serper_url)
            .header("X-API-KEY", api_key)
            .json(&SerperRequest {
                q: search_text,
                num,
                gl: "us",
                hl: "en",
            });

        let response: SerperResponse = self.send_with_retry("serper", request).await?;
        info!("✅ Serper search completed - found {} results", response.organic.len());
        Ok(response)
    }

    async fn send_with_retry<T: DeserializeOwned>(
        &self,
        provider: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ServerError> {
        let mut attempts = 0;
        let mut delay = self.retry_delay;

        loop {
            let attempt = request
                .try_clone()
                .ok_or_else(|| ServerError::search(provider, "request cannot be retried"))?;

            match attempt.send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| ServerError::search(provider, format!("invalid response: {e}")));
                }
                Ok(response)
                    if response.status() == StatusCode::TOO_MANY_REQUESTS
                        || response.status().is_server_error() =>
                {
                    let status = response.status();
                    if attempts >= MAX_RETRIES {
                        return Err(ServerError::search(
                            provider,
                            format!("HTTP {status} after {} attempts", attempts + 1),
                        ));
                    }
                    warn!(
                        "{provider} returned {status}, waiting {delay:?} before retry {}/{}",
                        attempts + 1,
                        MAX_RETRIES
                    );
                }
                Ok(response) => {
                    return Err(ServerError::search(
                        provider,
                        format!("HTTP {}", response.status()),
                    ));
                }
                Err(e) => {
                    if attempts >= MAX_RETRIES || !(e.is_timeout() || e.is_connect()) {
                        return Err(ServerError::search(provider, e.to_string()));
                    }
                    warn!("{provider} request failed ({e}), retrying in {delay:?}");
                }
            }

            attempts += 1;
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}

fn strip_html(text: &str) -> String {
    let text = if text.contains('<') {
        Html::parse_fragment(text)
            .root_element()
            .text()
            .collect::<String>()
    } else {
        text.to_string()
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Condense search results into at most three context blocks for the LLM.
pub fn extract_math_content(results: &SearchResults, profile: &ExtractionProfile) -> String {
    let mut blocks = Vec::new();

    match results {
        SearchResults::Tavily(response) => {
            if let Some(answer) = response.answer.as_deref().filter(|a| !a.trim().is_empty()) {
                blocks.push(format!("Direct Answer: {}", strip_html(answer)));
            }
            for result in &response.results {
                let content = strip_html(&result.content);
                if !mentions_any(&content, profile.keywords) {
                    continue;
                }
                let mut block = format!(
                    "Source: {}\nContent: {}...",
                    result.title,
                    truncate_chars(&content, profile.snippet_chars)
                );
                if profile.include_urls {
                    block.push_str(&format!("\nURL: {}", result.url));
                }
                blocks.push(block);
            }
        }
        SearchResults::Serper(response) => {
            let answer_box = response
                .answer_box
                .as_ref()
                .and_then(|b| b.answer.as_deref().or(b.snippet.as_deref()))
                .filter(|a| !a.trim().is_empty());
            if let Some(answer) = answer_box {
                blocks.push(format!("Answer Box: {}", strip_html(answer)));
            }
            if profile.include_knowledge_graph {
                let description = response
                    .knowledge_graph
                    .as_ref()
                    .and_then(|kg| kg.description.as_deref())
                    .filter(|d| !d.trim().is_empty());
                if let Some(description) = description {
                    blocks.push(format!("Knowledge Graph: {}", strip_html(description)));
                }
            }
            for result in &response.organic {
                let snippet = strip_html(&result.snippet);
                if !mentions_any(&snippet, profile.keywords) {
                    continue;
                }
                let mut block = format!("Source: {}\nSnippet: {}", result.title, snippet);
                if profile.include_urls {
                    block.push_str(&format!("\nURL: {}", result.link));
                }
                blocks.push(block);
            }
        }
    }

    blocks.truncate(MAX_EXTRACTED_BLOCKS);
    blocks.join("\n\n")
}

pub fn format_web_search_response(query: &str, solution: &str, provider: &str) -> String {
    format!(
        r#"🌐 **MATH SOLUTION FROM WEB SEARCH**
═══════════════════════════════════

🎯 **Question:** {query}

📡 **Search Source:** {provider} (Web Search)

📝 **Step-by-Step Solution:**
{solution}

ℹ️ **Note:** This solution was generated from web search results. Please verify the steps and calculations.

═══════════════════════════════════
🎓 Hope this helps with your math studies!"#
    )
}

/// Direct web fallback: Tavily first, then Serper, then give up.
pub struct WebSearchAgent {
    search: SearchClient,
    chat: Arc<dyn ChatModel>,
}

impl WebSearchAgent {
    pub fn new(search: SearchClient, chat: Arc<dyn ChatModel>) -> Self {
        Self { search, chat }
    }

    pub async fn search_with_tavily(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<SearchResults, ServerError> {
        let text = format!("mathematics {query} step by step solution");
        self.search
            .tavily(&text, max_results, WEB_SEARCH_DOMAINS)
            .await
            .map(SearchResults::Tavily)
    }

    pub async fn search_with_serper(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<SearchResults, ServerError> {
        let text = format!("mathematics {query} step by step solution tutorial");
        self.search
            .serper(&text, num_results)
            .await
            .map(SearchResults::Serper)
    }

    pub async fn generate_solution_from_search(
        &self,
        query: &str,
        search_content: &str,
    ) -> Result<String, ServerError> {
        let prompt = format!(
            r#"You are a helpful math tutor. Based on the web search results below, provide a clear, step-by-step solution to the following math question.

Question: {query}

Web Search Results:
{search_content}

Please provide:
1. A clear step-by-step solution
2. Explanations for each step
3. The final answer
4. Use simple language suitable for students

Format your response with clear steps, mathematical notation, and educational explanations.
If the search results don't contain enough information to solve the problem completely, clearly state what information is missing."#
        );
        self.chat.complete(&prompt).await
    }

    pub async fn search_and_solve(&self, query: &str) -> Result<Option<Solution>, ServerError> {
        info!("🔍 Starting web search for: {query}");

        if !is_valid_math_input(query, Some(self.chat.as_ref())).await {
            return Ok(Some(Solution::invalid_input()));
        }

        if self.search.has_tavily() {
            match self.search_with_tavily(query, 5).await {
                Ok(results) if results.result_count() > 0 => {
                    if let Some(solution) = self.solve_from(query, &results).await {
                        return Ok(Some(solution));
                    }
                }
                Ok(_) => debug!("Tavily returned no results"),
                Err(e) => warn!("❌ Tavily search failed: {e}"),
            }
        }

        if self.search.has_serper() {
            info!("🔄 Falling back to Serper search...");
            match self.search_with_serper(query, 10).await {
                Ok(results) if results.result_count() > 0 => {
                    if let Some(solution) = self.solve_from(query, &results).await {
                        return Ok(Some(solution));
                    }
                }
                Ok(_) => debug!("Serper returned no results"),
                Err(e) => warn!("❌ Serper search failed: {e}"),
            }
        }

        Ok(None)
    }

    async fn solve_from(&self, query: &str, results: &SearchResults) -> Option<Solution> {
        let content = extract_math_content(results, &WEB_EXTRACTION);
        if content.trim().is_empty() {
            debug!("{} results had no usable math content", results.provider());
            return None;
        }

        match self.generate_solution_from_search(query, &content).await {
            Ok(solution) => {
                info!("✅ Using {} search results", results.provider());
                let formatted = format_web_search_response(query, &solution, results.provider());
                Some(Solution {
                    content: simplify_output(&formatted),
                    source: SolutionSource::WebSearch,
                    confidence: 0.7,
                    provider: Some(results.provider().to_string()),
                })
            }
            Err(e) => {
                warn!("❌ Error generating solution from {}: {e}", results.provider());
                None
            }
        }
    }
}
