//! In-process tool registry speaking the MCP `tools/list` / `tools/call` shape.
//!
//! The routing agent drives the same tools an external MCP client would, so
//! the fallback search pipeline and the protocol surface share one code path.

use crate::{
    agents::{
        web_search::{extract_math_content, ExtractionProfile, SearchClient, SearchResults},
        Solution, SolutionSource,
    },
    error::ServerError,
    llm::ChatModel,
};
use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

pub const TOOLBOX_DOMAINS: &[&str] = &[
    "khanacademy.org",
    "mathway.com",
    "symbolab.com",
    "wolframalpha.com",
    "brilliant.org",
    "mathsisfun.com",
];

pub const MCP_EXTRACTION: ExtractionProfile = ExtractionProfile {
    snippet_chars: 400,
    keywords: &["step", "solve", "solution", "equation"],
    include_urls: false,
    include_knowledge_graph: false,
};

const DEFAULT_QUALITY: u8 = 7;

static OUT_OF_TEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})(?:\.\d+)?\s*/\s*10\b").unwrap());
static LABELLED_SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:rating|score|quality)\b[^0-9\n]{0,20}(\d{1,2})\b").unwrap()
});
static SCALE_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(?\b\d{1,2}[ \t]*[-–][ \t]*\d{1,2}\b\)?").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

impl McpRequest {
    pub fn call(name: &str, arguments: Value) -> Self {
        Self {
            method: "tools/call".to_string(),
            params: json!({ "name": name, "arguments": arguments }),
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpErrorBody {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpErrorBody>,
    pub id: Option<Value>,
}

impl McpResponse {
    fn ok(result: Value, id: Option<Value>) -> Self {
        Self {
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(code: i32, message: String, id: Option<Value>) -> Self {
        Self {
            result: None,
            error: Some(McpErrorBody { code, message }),
            id,
        }
    }
}

fn default_tavily_results() -> usize {
    5
}

fn default_serper_results() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TavilySearchArgs {
    /// Mathematical question to search
    pub query: String,
    #[serde(default = "default_tavily_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SerperSearchArgs {
    /// Mathematical question to search
    pub query: String,
    #[serde(default = "default_serper_results")]
    pub num_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractSolutionArgs {
    /// Original math question
    pub query: String,
    /// Search results to process
    pub search_results: SearchResults,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VerifyContentArgs {
    /// Mathematical content to verify
    pub content: String,
    /// Original question
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSolution {
    pub success: bool,
    pub solution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub verification: String,
    pub quality_score: u8,
    pub is_accurate: bool,
}

/// Why a `tools/call` did not produce a result.
#[derive(Debug)]
enum ToolCallError {
    UnknownTool(String),
    InvalidParams(String),
    Failed(ServerError),
}

impl From<ServerError> for ToolCallError {
    fn from(e: ServerError) -> Self {
        ToolCallError::Failed(e)
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolCallError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| ToolCallError::InvalidParams(e.to_string()))
}

/// Read a 1-10 rating out of free-form verification text.
pub fn parse_quality_score(verification: &str) -> u8 {
    // "quality (1-10): 9" names the scale before the score
    let without_scales = SCALE_RANGE_RE.replace_all(verification, "");
    let explicit = OUT_OF_TEN_RE
        .captures(verification)
        .or_else(|| LABELLED_SCORE_RE.captures(&without_scales))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
        .filter(|score| (1..=10).contains(score));
    if let Some(score) = explicit {
        return score;
    }

    let lower = verification.to_lowercase();
    if lower.contains("excellent") {
        10
    } else if lower.contains("very good") {
        9
    } else if lower.contains("good") {
        8
    } else if lower.contains("error") || lower.contains("incorrect") {
        4
    } else {
        DEFAULT_QUALITY
    }
}

pub struct MathToolbox {
    search: SearchClient,
    chat: Arc<dyn ChatModel>,
}

impl MathToolbox {
    pub fn new(search: SearchClient, chat: Arc<dyn ChatModel>) -> Self {
        Self { search, chat }
    }

    pub fn tool_definitions() -> Vec<Value> {
        fn tool<T: JsonSchema>(name: &str, description: &str) -> Value {
            let schema = serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({}));
            json!({ "name": name, "description": description, "inputSchema": schema })
        }

        vec![
            tool::<TavilySearchArgs>(
                "search_math_tavily",
                "Search for mathematical content using Tavily API",
            ),
            tool::<SerperSearchArgs>(
                "search_math_serper",
                "Search for mathematical content using Serper API",
            ),
            tool::<ExtractSolutionArgs>(
                "extract_math_solution",
                "Extract and format mathematical solution from search results",
            ),
            tool::<VerifyContentArgs>(
                "verify_math_content",
                "Verify mathematical accuracy of content",
            ),
        ]
    }

    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let McpRequest { method, params, id } = request;
        match method.as_str() {
            "tools/list" => McpResponse::ok(json!({ "tools": Self::tool_definitions() }), id),
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

                match self.call_tool(&name, arguments).await {
                    Ok(result) => McpResponse::ok(result, id),
                    Err(ToolCallError::UnknownTool(name)) => {
                        McpResponse::err(METHOD_NOT_FOUND, format!("Unknown tool: {name}"), id)
                    }
                    Err(ToolCallError::InvalidParams(msg)) => {
                        McpResponse::err(INVALID_PARAMS, format!("Invalid arguments: {msg}"), id)
                    }
                    Err(ToolCallError::Failed(e)) => {
                        McpResponse::err(INTERNAL_ERROR, format!("Internal error: {e}"), id)
                    }
                }
            }
            other => McpResponse::err(METHOD_NOT_FOUND, format!("Unknown method: {other}"), id),
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolCallError> {
        debug!("Toolbox call: {name}");
        let result = match name {
            "search_math_tavily" => {
                let args: TavilySearchArgs = parse_args(arguments)?;
                serde_json::to_value(self.search_math_tavily(&args.query, args.max_results).await?)
            }
            "search_math_serper" => {
                let args: SerperSearchArgs = parse_args(arguments)?;
                serde_json::to_value(self.search_math_serper(&args.query, args.num_results).await?)
            }
            "extract_math_solution" => {
                let args: ExtractSolutionArgs = parse_args(arguments)?;
                serde_json::to_value(
                    self.extract_math_solution(&args.query, &args.search_results)
                        .await?,
                )
            }
            "verify_math_content" => {
                let args: VerifyContentArgs = parse_args(arguments)?;
                serde_json::to_value(self.verify_math_content(&args.content, &args.question).await?)
            }
            other => return Err(ToolCallError::UnknownTool(other.to_string())),
        };
        result.map_err(|e| ToolCallError::Failed(e.into()))
    }

    pub async fn search_math_tavily(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<SearchResults, ServerError> {
        let text = format!("mathematics {query} step by step solution tutorial");
        self.search
            .tavily(&text, max_results, TOOLBOX_DOMAINS)
            .await
            .map(SearchResults::Tavily)
    }

    pub async fn search_math_serper(
        &self,
        query: &str,
        num_results: usize,
    ) -> Result<SearchResults, ServerError> {
        let text = format!("mathematics {query} step by step solution");
        self.search
            .serper(&text, num_results)
            .await
            .map(SearchResults::Serper)
    }

    pub async fn extract_math_solution(
        &self,
        query: &str,
        search_results: &SearchResults,
    ) -> Result<ExtractedSolution, ServerError> {
        let content = extract_math_content(search_results, &MCP_EXTRACTION);
        if content.trim().is_empty() {
            return Ok(ExtractedSolution {
                success: false,
                solution: String::new(),
                source: None,
                extracted_content: None,
                error: Some("No relevant mathematical content found in search results".to_string()),
            });
        }

        let prompt = format!(
            r#"You are a mathematics tutor. Based on the web search results below, provide a clear, step-by-step solution.

Question: {query}

Search Results:
{content}

Provide:
1. Clear step-by-step solution
2. Explanations for each step
3. Final answer
4. Use simple, educational language

If the search results don't provide complete information, clearly state what's missing."#
        );
        let solution = self.chat.complete(&prompt).await?;

        Ok(ExtractedSolution {
            success: true,
            solution,
            source: Some(search_results.provider().to_lowercase()),
            extracted_content: Some(content),
            error: None,
        })
    }

    pub async fn verify_math_content(
        &self,
        content: &str,
        question: &str,
    ) -> Result<Verification, ServerError> {
        let prompt = format!(
            r#"You are a mathematics expert. Please verify the accuracy of the following solution.

Original Question: {question}

Solution to Verify:
{content}

Please analyze:
1. Are the mathematical steps correct?
2. Is the final answer accurate?
3. Are there any errors or missing steps?
4. Rate the solution quality (1-10)

Provide your verification in a structured format."#
        );
        let verification = self.chat.complete(&prompt).await?;
        let quality_score = parse_quality_score(&verification);

        Ok(Verification {
            verification,
            quality_score,
            is_accurate: quality_score >= DEFAULT_QUALITY,
        })
    }
}

pub fn format_mcp_response(query: &str, solution: &str, source: &str, quality_score: u8) -> String {
    let stars = "⭐".repeat(usize::from((quality_score / 2).min(5)));
    format!(
        r#"🔧 **MATH SOLUTION VIA MCP SERVER**
═══════════════════════════════════

🎯 **Question:** {query}

🤖 **MCP Source:** {source}
📊 **Quality Score:** {quality_score}/10 {stars}

📝 **Step-by-Step Solution:**
{solution}

ℹ️ **Note:** This solution was generated using MCP (Model Context Protocol) with web search verification.

═══════════════════════════════════
🎓 Hope this helps with your math studies!"#
    )
}

/// Drives the toolbox: Tavily, extract, verify; else Serper, extract.
#[derive(Clone)]
pub struct McpSearchClient {
    toolbox: Arc<MathToolbox>,
}

impl McpSearchClient {
    pub fn new(toolbox: Arc<MathToolbox>) -> Self {
        Self { toolbox }
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, name: &str, arguments: Value) -> Option<T> {
        let response = self
            .toolbox
            .handle_request(McpRequest::call(name, arguments))
            .await;
        if let Some(error) = response.error {
            warn!("MCP tool {name} failed ({}): {}", error.code, error.message);
            return None;
        }
        response
            .result
            .and_then(|value| serde_json::from_value(value).ok())
    }

    async fn extract(&self, query: &str, results: &SearchResults) -> Option<String> {
        let extracted: ExtractedSolution = self
            .call(
                "extract_math_solution",
                json!({ "query": query, "search_results": results }),
            )
            .await?;
        if !extracted.success {
            debug!(
                "Extraction from {} produced nothing: {}",
                results.provider(),
                extracted.error.unwrap_or_default()
            );
            return None;
        }
        Some(extracted.solution)
    }

    pub async fn search_and_solve(&self, query: &str) -> Result<Option<Solution>, ServerError> {
        if let Some(results) = self
            .call::<SearchResults>("search_math_tavily", json!({ "query": query }))
            .await
        {
            if let Some(solution) = self.extract(query, &results).await {
                let verification: Option<Verification> = self
                    .call(
                        "verify_math_content",
                        json!({ "content": solution, "question": query }),
                    )
                    .await;
                match verification {
                    Some(v) if v.is_accurate => {
                        info!("✅ MCP Tavily solution verified ({}/10)", v.quality_score);
                        return Ok(Some(mcp_solution(
                            query,
                            &solution,
                            "Tavily (MCP)",
                            v.quality_score,
                        )));
                    }
                    Some(v) => info!(
                        "MCP Tavily solution rejected by verification ({}/10)",
                        v.quality_score
                    ),
                    None => {}
                }
            }
        }

        if let Some(results) = self
            .call::<SearchResults>("search_math_serper", json!({ "query": query }))
            .await
        {
            if let Some(solution) = self.extract(query, &results).await {
                info!("✅ MCP Serper solution extracted");
                return Ok(Some(mcp_solution(
                    query,
                    &solution,
                    "Serper (MCP)",
                    DEFAULT_QUALITY,
                )));
            }
        }

        info!("❌ Could not find relevant mathematical content through web search.");
        Ok(None)
    }
}

fn mcp_solution(query: &str, solution: &str, source: &str, quality_score: u8) -> Solution {
    Solution {
        content: format_mcp_response(query, solution, source, quality_score),
        source: SolutionSource::Mcp,
        confidence: f32::from(quality_score) / 10.0,
        provider: Some(source.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agents::web_search::tests::{mock_search_client, tavily_fixture, MockState},
        llm::tests::ScriptedChat,
    };
    use std::sync::Mutex;

    fn offline_toolbox(chat: ScriptedChat) -> MathToolbox {
        MathToolbox::new(SearchClient::new(None, None).unwrap(), Arc::new(chat))
    }

    #[test]
    fn quality_scores() {
        assert_eq!(parse_quality_score("Rating: 9/10. Solid work."), 9);
        assert_eq!(parse_quality_score("Quality score: 6"), 6);
        assert_eq!(parse_quality_score("An excellent solution"), 10);
        assert_eq!(parse_quality_score("Very good overall"), 9);
        assert_eq!(parse_quality_score("Looks good"), 8);
        assert_eq!(parse_quality_score("There is an error in step 2"), 4);
        assert_eq!(parse_quality_score("Fine."), 7);
        // Step numbers alone are not ratings.
        assert_eq!(parse_quality_score("Step 10 is incorrect"), 4);
    }

    #[test]
    fn quality_score_skips_the_scale_range() {
        assert_eq!(
            parse_quality_score("Solution quality (1-10): 9\nThe algebra checks out."),
            9
        );
        assert_eq!(parse_quality_score("Rating on a 1 - 10 scale: 3"), 3);
    }

    #[tokio::test]
    async fn lists_tools_with_schemas() {
        let toolbox = offline_toolbox(ScriptedChat::always("unused"));
        let response = toolbox
            .handle_request(McpRequest {
                method: "tools/list".into(),
                params: Value::Null,
                id: Some(json!(1)),
            })
            .await;

        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "search_math_tavily",
                "search_math_serper",
                "extract_math_solution",
                "verify_math_content"
            ]
        );
        let required = tools[3]["inputSchema"]["required"].as_array().unwrap();
        assert!(required.contains(&json!("content")));
        assert!(required.contains(&json!("question")));
        assert_eq!(response.id, Some(json!(1)));
    }

    #[tokio::test]
    async fn protocol_errors() {
        let toolbox = offline_toolbox(ScriptedChat::always("unused"));

        let unknown_tool = toolbox
            .handle_request(McpRequest::call("divide_by_zero", json!({})))
            .await;
        let error = unknown_tool.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "Unknown tool: divide_by_zero");

        let unknown_method = toolbox
            .handle_request(McpRequest {
                method: "resources/list".into(),
                params: Value::Null,
                id: None,
            })
            .await;
        assert_eq!(unknown_method.error.unwrap().code, METHOD_NOT_FOUND);

        let bad_args = toolbox
            .handle_request(McpRequest::call("verify_math_content", json!({"content": 3})))
            .await;
        assert_eq!(bad_args.error.unwrap().code, INVALID_PARAMS);

        let no_key = toolbox
            .handle_request(McpRequest::call("search_math_tavily", json!({"query": "x+1=2"})))
            .await;
        let error = no_key.error.unwrap();
        assert_eq!(error.code, INTERNAL_ERROR);
        assert!(error.message.contains("TAVILY_API_KEY"));
    }

    #[tokio::test]
    async fn verify_tool_reports_accuracy() {
        let toolbox = offline_toolbox(ScriptedChat::new(vec![
            Ok("Overall rating: 8/10".into()),
            Ok("The final answer is incorrect.".into()),
        ]));
        let good = toolbox.verify_math_content("x = 2", "2x = 4").await.unwrap();
        assert_eq!(good.quality_score, 8);
        assert!(good.is_accurate);

        let bad = toolbox.verify_math_content("x = 3", "2x = 4").await.unwrap();
        assert_eq!(bad.quality_score, 4);
        assert!(!bad.is_accurate);
    }

    #[tokio::test]
    async fn verified_tavily_solution_is_accepted() {
        let state = MockState {
            tavily_response: Arc::new(Mutex::new(tavily_fixture())),
            ..MockState::default()
        };
        let chat = Arc::new(ScriptedChat::new(vec![
            Ok("Subtract 3, divide by 2: x = 2".into()),
            Ok("Rating: 8/10".into()),
        ]));
        let toolbox = MathToolbox::new(mock_search_client(state.clone()).await, chat.clone());
        let client = McpSearchClient::new(Arc::new(toolbox));

        let solution = client.search_and_solve("2x + 3 = 7").await.unwrap().unwrap();
        assert_eq!(solution.source, SolutionSource::Mcp);
        assert_eq!(solution.provider.as_deref(), Some("Tavily (MCP)"));
        assert!(solution.content.contains("📊 **Quality Score:** 8/10 ⭐⭐⭐⭐"));
        assert!((solution.confidence - 0.8).abs() < 1e-6);

        let body = state.tavily_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["query"], "mathematics 2x + 3 = 7 step by step solution tutorial");
        assert_eq!(body["include_domains"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn rejected_tavily_solution_falls_back_to_serper() {
        let state = MockState {
            tavily_response: Arc::new(Mutex::new(tavily_fixture())),
            ..MockState::default()
        };
        let chat = Arc::new(ScriptedChat::new(vec![
            Ok("x = 5".into()),
            Ok("Quality: 3/10, the answer is wrong".into()),
            Ok("Step 1: subtract 3. Step 2: x = 2".into()),
        ]));
        let toolbox = MathToolbox::new(mock_search_client(state.clone()).await, chat.clone());
        let client = McpSearchClient::new(Arc::new(toolbox));

        let solution = client.search_and_solve("2x + 3 = 7").await.unwrap().unwrap();
        assert_eq!(solution.provider.as_deref(), Some("Serper (MCP)"));
        assert!(solution.content.contains("7/10 ⭐⭐⭐\n"));
        assert_eq!(chat.prompt_count(), 3);
        assert!(!chat.prompts.lock().unwrap()[2].contains("Knowledge Graph"));
    }

    #[tokio::test]
    async fn nothing_found_without_providers() {
        let client = McpSearchClient::new(Arc::new(offline_toolbox(ScriptedChat::always("x"))));
        assert!(client.search_and_solve("Solve x + 1 = 2").await.unwrap().is_none());
    }
}
