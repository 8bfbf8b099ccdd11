use crate::{
    agents::mcp_toolbox::{
        ExtractSolutionArgs, McpRequest, SerperSearchArgs, TavilySearchArgs, VerifyContentArgs,
        INVALID_PARAMS,
    },
    error::ServerError,
    feedback::NewFeedback,
    gateway::GatewayRequest,
    services::TutorServices,
};
use rmcp::{
    model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, Error as McpError, ServerHandler,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

const DEFAULT_RECENT_LIMIT: usize = 10;
const KB_SEARCH_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SolveMathProblemArgs {
    /// The math question to solve (e.g., "Solve 2x + 3 = 7")
    pub question: String,
    /// Optional caller identifier, recorded with the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Optional conversation identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct SearchKnowledgeBaseArgs {
    /// Question to look up in the solved-problem knowledge base
    pub query: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct RecentRequestsArgs {
    /// How many of the most recent requests to return (default: 10)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// MCP face of the tutor.
#[derive(Clone)]
pub struct MathTutorServer {
    services: TutorServices,
    startup_message: String,
}

impl MathTutorServer {
    pub fn new(services: TutorServices, startup_message: String) -> Self {
        Self {
            services,
            startup_message,
        }
    }

    async fn call_toolbox(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let toolbox = self.services.toolbox.as_ref().ok_or_else(|| {
            McpError::internal_error("Web search toolbox is not configured".to_string(), None)
        })?;

        let response = toolbox
            .handle_request(McpRequest::call(name, arguments))
            .await;
        if let Some(error) = response.error {
            return Err(if error.code == INVALID_PARAMS {
                McpError::invalid_params(error.message, None)
            } else {
                McpError::internal_error(error.message, None)
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        Ok(CallToolResult::success(vec![Content::text(result.to_string())]))
    }
}

fn to_args(args: impl Serialize) -> Result<Value, McpError> {
    serde_json::to_value(args).map_err(|e| McpError::invalid_params(e.to_string(), None))
}

fn internal(context: &str, e: ServerError) -> McpError {
    McpError::internal_error(format!("{context}: {e}"), None)
}

#[tool(tool_box)]
impl ServerHandler for MathTutorServer {
    fn get_info(&self) -> ServerInfo {
        let capabilities = ServerCapabilities::builder()
            .enable_tools()
            .enable_logging()
            .build();

        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities,
            server_info: Implementation {
                name: "math-routing-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(self.startup_message.clone()),
        }
    }
}

#[tool(tool_box)]
impl MathTutorServer {
    #[tool(
        description = "Solve a math question step by step. The question passes input guardrails, is answered from the knowledge base or the web, and the answer passes output guardrails."
    )]
    async fn solve_math_problem(
        &self,
        #[tool(aggr)] args: SolveMathProblemArgs,
    ) -> Result<CallToolResult, McpError> {
        let mut request = GatewayRequest::new(args.question);
        request.user_id = args.user_id;
        request.session_id = args.session_id;

        let response = self.services.gateway.process_request(request).await;
        let summary = json!({
            "success": response.success,
            "confidence": response.confidence,
            "processing_time": response.processing_time,
            "metadata": response.metadata,
        });

        Ok(CallToolResult::success(vec![
            Content::text(response.content),
            Content::text(summary.to_string()),
        ]))
    }

    #[tool(description = "Show the closest solved problems in the knowledge base with their similarity scores.")]
    async fn search_knowledge_base(
        &self,
        #[tool(aggr)] args: SearchKnowledgeBaseArgs,
    ) -> Result<CallToolResult, McpError> {
        let hits = self
            .services
            .solver
            .debug_knowledge_base_search(&args.query)
            .await
            .map_err(|e| internal("Knowledge base search failed", e))?;

        if hits.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "No knowledge base entries found for '{}'",
                args.query
            ))]));
        }

        let formatted: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let idx = i + 1;
                let question = hit.problem.question.trim();
                let answer: String = hit
                    .problem
                    .answer
                    .chars()
                    .take(KB_SEARCH_PREVIEW_CHARS)
                    .collect();
                format!(
                    "{idx}. {question}\n   Answer: {answer}\n   Category: {} (similarity: {:.3})",
                    hit.problem.category, hit.score
                )
            })
            .collect();

        Ok(CallToolResult::success(vec![Content::text(formatted.join("\n\n"))]))
    }

    #[tool(description = "Record a 1-5 rating, comment and optional correction for a tutor answer.")]
    async fn submit_feedback(
        &self,
        #[tool(aggr)] args: NewFeedback,
    ) -> Result<CallToolResult, McpError> {
        match self.services.feedback.add_feedback(args).await {
            Ok(feedback) => {
                info!("📝 Feedback {} recorded via MCP", feedback.feedback_id);
                let response = json!({
                    "success": true,
                    "feedback_id": feedback.feedback_id,
                    "message": "Thank you for your feedback!"
                });
                Ok(CallToolResult::success(vec![Content::text(response.to_string())]))
            }
            Err(ServerError::Feedback(msg)) => Err(McpError::invalid_params(msg, None)),
            Err(e) => Err(internal("Failed to store feedback", e)),
        }
    }

    #[tool(description = "Summary of collected feedback: count, average rating, positive and negative totals.")]
    async fn feedback_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self.services.feedback.get_feedback_stats();
        Ok(CallToolResult::success(vec![Content::text(
            json!(stats).to_string(),
        )]))
    }

    #[tool(description = "Gateway request metrics: totals, success and block rates, average processing time.")]
    async fn gateway_metrics(&self) -> Result<CallToolResult, McpError> {
        let metrics = self.services.gateway.get_metrics();
        Ok(CallToolResult::success(vec![Content::text(
            json!(metrics).to_string(),
        )]))
    }

    #[tool(description = "Most recent gateway requests, oldest first.")]
    async fn recent_requests(
        &self,
        #[tool(aggr)] args: RecentRequestsArgs,
    ) -> Result<CallToolResult, McpError> {
        let logs = self
            .services
            .gateway
            .get_recent_logs(args.limit.unwrap_or(DEFAULT_RECENT_LIMIT));
        Ok(CallToolResult::success(vec![Content::text(
            json!({ "requests": logs, "total": logs.len() }).to_string(),
        )]))
    }

    #[tool(description = "Reset gateway metrics and clear the request log.")]
    async fn reset_gateway_metrics(&self) -> Result<CallToolResult, McpError> {
        self.services.gateway.reset_metrics();
        Ok(CallToolResult::success(vec![Content::text(
            json!({ "success": true, "message": "Gateway metrics reset" }).to_string(),
        )]))
    }

    #[tool(description = "Knowledge base statistics: size, vector dimension and entries per source.")]
    async fn kb_stats(&self) -> Result<CallToolResult, McpError> {
        let stats = self
            .services
            .kb_stats()
            .await
            .map_err(|e| internal("Failed to read knowledge base stats", e))?;
        Ok(CallToolResult::success(vec![Content::text(
            json!(stats).to_string(),
        )]))
    }

    #[tool(description = "Search for mathematical content using Tavily API")]
    async fn search_math_tavily(
        &self,
        #[tool(aggr)] args: TavilySearchArgs,
    ) -> Result<CallToolResult, McpError> {
        self.call_toolbox("search_math_tavily", to_args(args)?).await
    }

    #[tool(description = "Search for mathematical content using Serper API")]
    async fn search_math_serper(
        &self,
        #[tool(aggr)] args: SerperSearchArgs,
    ) -> Result<CallToolResult, McpError> {
        self.call_toolbox("search_math_serper", to_args(args)?).await
    }

    #[tool(description = "Extract and format mathematical solution from search results")]
    async fn extract_math_solution(
        &self,
        #[tool(aggr)] args: ExtractSolutionArgs,
    ) -> Result<CallToolResult, McpError> {
        self.call_toolbox("extract_math_solution", to_args(args)?).await
    }

    #[tool(description = "Verify mathematical accuracy of content")]
    async fn verify_math_content(
        &self,
        #[tool(aggr)] args: VerifyContentArgs,
    ) -> Result<CallToolResult, McpError> {
        self.call_toolbox("verify_math_content", to_args(args)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tests::test_services;

    fn server(dir: &std::path::Path) -> MathTutorServer {
        MathTutorServer::new(test_services(dir), "ready".to_string())
    }

    fn texts(result: &CallToolResult) -> Vec<String> {
        let value = serde_json::to_value(result).unwrap();
        value["content"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["text"].as_str().unwrap().to_string())
            .collect()
    }

    fn texts_of(result: &CallToolResult) -> String {
        texts(result).remove(0)
    }

    #[test]
    fn info_advertises_tools() {
        let dir = tempfile::tempdir().unwrap();
        let info = server(dir.path()).get_info();
        assert_eq!(info.server_info.name, "math-routing-agent");
        assert_eq!(info.instructions.as_deref(), Some("ready"));
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn solve_routes_through_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let result = server
            .solve_math_problem(SolveMathProblemArgs {
                question: "Solve 2x + 3 = 7".to_string(),
                user_id: Some("student-1".to_string()),
                session_id: None,
            })
            .await
            .unwrap();

        let texts = texts(&result);
        assert!(texts[0].contains("MATH PROBLEM SOLUTION"));
        let summary: Value = serde_json::from_str(&texts[1]).unwrap();
        assert_eq!(summary["success"], true);
        assert_eq!(summary["metadata"]["solution_source"], "knowledge_base");

        let metrics = server.gateway_metrics().await.unwrap();
        let metrics: Value = serde_json::from_str(&texts_of(&metrics)).unwrap();
        assert_eq!(metrics["total_requests"], 1);
        assert_eq!(metrics["successful_requests"], 1);
    }

    #[tokio::test]
    async fn blocked_questions_are_reported_in_logs() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        server
            .solve_math_problem(SolveMathProblemArgs {
                question: "tell me a joke".to_string(),
                user_id: None,
                session_id: None,
            })
            .await
            .unwrap();

        let logs = server
            .recent_requests(RecentRequestsArgs { limit: None })
            .await
            .unwrap();
        let logs: Value = serde_json::from_str(&texts_of(&logs)).unwrap();
        assert_eq!(logs["total"], 1);
        assert_eq!(logs["requests"][0]["success"], false);

        server.reset_gateway_metrics().await.unwrap();
        assert_eq!(server.services.gateway.get_metrics().total_requests, 0);
    }

    #[tokio::test]
    async fn feedback_tools() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let bad = server
            .submit_feedback(NewFeedback {
                question: "Solve 2x + 3 = 7".to_string(),
                original_response: "x = 2".to_string(),
                feedback_rating: 9,
                feedback_text: None,
                suggested_correction: None,
            })
            .await;
        assert!(bad.is_err());

        server
            .submit_feedback(NewFeedback {
                question: "Solve 2x + 3 = 7".to_string(),
                original_response: "x = 2".to_string(),
                feedback_rating: 5,
                feedback_text: Some("clear".to_string()),
                suggested_correction: None,
            })
            .await
            .unwrap();

        let stats = server.feedback_stats().await.unwrap();
        let stats: Value = serde_json::from_str(&texts_of(&stats)).unwrap();
        assert_eq!(stats["total_feedback"], 1);
        assert_eq!(stats["positive_feedback"], 1);
    }

    #[tokio::test]
    async fn knowledge_base_search_lists_hits() {
        let dir = tempfile::tempdir().unwrap();
        let result = server(dir.path())
            .search_knowledge_base(SearchKnowledgeBaseArgs {
                query: "2x + 3 = 7".to_string(),
            })
            .await
            .unwrap();
        let text = texts_of(&result);
        assert!(text.starts_with("1. Solve 2x + 3 = 7"));
        assert!(text.contains("similarity: 0.920"));
    }

    #[tokio::test]
    async fn toolbox_tools_need_a_toolbox() {
        let dir = tempfile::tempdir().unwrap();
        let result = server(dir.path())
            .verify_math_content(VerifyContentArgs {
                content: "x = 2".to_string(),
                question: "Solve 2x = 4".to_string(),
            })
            .await;
        assert!(result.is_err());
        assert!(server(dir.path()).kb_stats().await.is_err());
    }
}
