//! AI gateway: input guardrails, the solving agent, output guardrails,
//! plus request metrics and a bounded request log.

use crate::{
    agents::{Solution, INVALID_INPUT_MESSAGE},
    error::ServerError,
    guardrails::{
        comprehensive_input_validation, is_valid_math_input, simplify_output,
        validate_mathematical_accuracy, validate_output_safety,
    },
    llm::ChatModel,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};
use tracing::{error, info, warn};

pub const REQUEST_LOG_CAPACITY: usize = 100;
pub const OUTPUT_BLOCKED_MESSAGE: &str =
    "❌ Response blocked by safety guardrails. Please try rephrasing your question.";
const BASE_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailAction {
    Allow,
    Block,
    Modify,
    Warn,
    Log,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardrailResult {
    pub guardrail: String,
    pub passed: bool,
    pub action: GuardrailAction,
    pub confidence: f32,
    pub message: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub user_query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl GatewayRequest {
    pub fn new(user_query: impl Into<String>) -> Self {
        Self {
            user_query: user_query.into(),
            user_id: None,
            session_id: None,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub content: String,
    pub success: bool,
    pub confidence: f32,
    /// Seconds.
    pub processing_time: f64,
    pub guardrail_results: Vec<GuardrailResult>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub response_length: usize,
    pub processing_time: f64,
    pub guardrails_passed: usize,
    pub guardrails_failed: usize,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayMetrics {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub successful_requests: u64,
    pub average_processing_time: f64,
    pub success_rate: f64,
    pub block_rate: f64,
    pub recent_requests: usize,
}

/// Anything the gateway can route a validated question to.
#[async_trait]
pub trait MathAgent: Send + Sync {
    fn name(&self) -> &str;
    async fn solve(&self, query: &str) -> Result<Solution, ServerError>;
}

#[async_trait]
pub trait InputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    /// Lower runs first.
    fn priority(&self) -> u8;
    async fn check(&self, query: &str) -> Result<GuardrailResult, ServerError>;
}

pub trait OutputGuardrail: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> u8;
    fn check(&self, response: &str) -> Result<GuardrailResult, ServerError>;
}

pub struct MathContentValidator {
    classifier: Option<Arc<dyn ChatModel>>,
}

#[async_trait]
impl InputGuardrail for MathContentValidator {
    fn name(&self) -> &str {
        "math_content_validator"
    }

    fn priority(&self) -> u8 {
        1
    }

    async fn check(&self, query: &str) -> Result<GuardrailResult, ServerError> {
        let passed = is_valid_math_input(query, self.classifier.as_deref()).await;
        Ok(GuardrailResult {
            guardrail: self.name().to_string(),
            passed,
            action: if passed {
                GuardrailAction::Allow
            } else {
                GuardrailAction::Block
            },
            confidence: if passed { 0.9 } else { 0.1 },
            message: if passed {
                "Input validation passed".to_string()
            } else {
                INVALID_INPUT_MESSAGE.to_string()
            },
            metadata: json!({ "guardrail": self.name() }),
        })
    }
}

pub struct ComprehensiveValidator {
    classifier: Option<Arc<dyn ChatModel>>,
}

#[async_trait]
impl InputGuardrail for ComprehensiveValidator {
    fn name(&self) -> &str {
        "comprehensive_validator"
    }

    fn priority(&self) -> u8 {
        2
    }

    async fn check(&self, query: &str) -> Result<GuardrailResult, ServerError> {
        let validation = comprehensive_input_validation(query, self.classifier.as_deref()).await;
        Ok(GuardrailResult {
            guardrail: self.name().to_string(),
            passed: validation.is_valid,
            action: if validation.is_valid {
                GuardrailAction::Allow
            } else {
                GuardrailAction::Block
            },
            confidence: validation.confidence_score,
            message: if validation.is_valid {
                "Input validation passed".to_string()
            } else {
                validation.reason.clone()
            },
            metadata: serde_json::to_value(&validation)?,
        })
    }
}

pub struct SafetyValidator;

impl OutputGuardrail for SafetyValidator {
    fn name(&self) -> &str {
        "safety_validator"
    }

    fn priority(&self) -> u8 {
        1
    }

    fn check(&self, response: &str) -> Result<GuardrailResult, ServerError> {
        let passed = validate_output_safety(response);
        Ok(GuardrailResult {
            guardrail: self.name().to_string(),
            passed,
            action: if passed {
                GuardrailAction::Allow
            } else {
                GuardrailAction::Block
            },
            confidence: if passed { 0.9 } else { 0.1 },
            message: if passed {
                "Output safety check: PASSED".to_string()
            } else {
                "❌ Output failed safety validation".to_string()
            },
            metadata: json!({ "guardrail": self.name() }),
        })
    }
}

pub struct AccuracyValidator;

impl OutputGuardrail for AccuracyValidator {
    fn name(&self) -> &str {
        "accuracy_validator"
    }

    fn priority(&self) -> u8 {
        2
    }

    fn check(&self, response: &str) -> Result<GuardrailResult, ServerError> {
        let report = validate_mathematical_accuracy(response);
        let clean = report.is_mathematically_sound && report.warnings.is_empty();
        Ok(GuardrailResult {
            guardrail: self.name().to_string(),
            passed: report.is_mathematically_sound,
            action: if clean {
                GuardrailAction::Allow
            } else {
                GuardrailAction::Warn
            },
            confidence: report.confidence,
            message: format!(
                "Mathematical accuracy check: {}",
                if clean { "PASSED" } else { "WARNINGS" }
            ),
            metadata: serde_json::to_value(&report)?,
        })
    }
}

#[derive(Default)]
struct GatewayState {
    total_requests: u64,
    blocked_requests: u64,
    successful_requests: u64,
    average_processing_time: f64,
    request_log: VecDeque<RequestLogEntry>,
}

impl GatewayState {
    fn record(&mut self, entry: RequestLogEntry) {
        self.request_log.push_back(entry);
        while self.request_log.len() > REQUEST_LOG_CAPACITY {
            self.request_log.pop_front();
        }
    }
}

pub struct MathAgentGateway {
    agent: Arc<dyn MathAgent>,
    input_guardrails: Vec<Box<dyn InputGuardrail>>,
    output_guardrails: Vec<Box<dyn OutputGuardrail>>,
    state: Mutex<GatewayState>,
}

impl MathAgentGateway {
    /// Gateway with the standard guardrail set. `classifier` settles
    /// ambiguous inputs; without it they are rejected.
    pub fn new(agent: Arc<dyn MathAgent>, classifier: Option<Arc<dyn ChatModel>>) -> Self {
        Self {
            agent,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            state: Mutex::new(GatewayState::default()),
        }
        .with_input_guardrail(MathContentValidator {
            classifier: classifier.clone(),
        })
        .with_input_guardrail(ComprehensiveValidator { classifier })
        .with_output_guardrail(SafetyValidator)
        .with_output_guardrail(AccuracyValidator)
    }

    pub fn with_input_guardrail(mut self, guardrail: impl InputGuardrail + 'static) -> Self {
        self.input_guardrails.push(Box::new(guardrail));
        self.input_guardrails.sort_by_key(|g| g.priority());
        self
    }

    pub fn with_output_guardrail(mut self, guardrail: impl OutputGuardrail + 'static) -> Self {
        self.output_guardrails.push(Box::new(guardrail));
        self.output_guardrails.sort_by_key(|g| g.priority());
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn process_request(&self, request: GatewayRequest) -> GatewayResponse {
        let start = Instant::now();
        let preview: String = request.user_query.chars().take(50).collect();
        info!("Processing request: {preview}...");

        let input_results = self.run_input_guardrails(&request.user_query).await;
        if let Some(blocked) = input_results
            .iter()
            .find(|r| r.action == GuardrailAction::Block)
        {
            let content = blocked.message.clone();
            let processing_time = start.elapsed().as_secs_f64();
            let mut metadata = Map::new();
            metadata.insert("blocked_by".to_string(), json!(blocked.message));
            metadata.insert("blocked_guardrail".to_string(), json!(blocked.guardrail));

            let mut state = self.state();
            state.total_requests += 1;
            state.blocked_requests += 1;
            state.record(log_entry(&request, &content, processing_time, &input_results, false));
            drop(state);

            info!("🛡 Request blocked by {}", blocked.guardrail);
            return GatewayResponse {
                content,
                success: false,
                confidence: 0.0,
                processing_time,
                guardrail_results: input_results,
                metadata,
            };
        }

        info!("Input guardrails passed, processing with {}...", self.agent.name());
        let solution = match self.agent.solve(&request.user_query).await {
            Ok(solution) => solution,
            Err(e) => {
                error!("Error processing request: {e}");
                let content = format!("❌ An error occurred while processing your math question: {e}");
                let processing_time = start.elapsed().as_secs_f64();
                let mut metadata = Map::new();
                metadata.insert("error".to_string(), json!(e.to_string()));

                let mut state = self.state();
                state.total_requests += 1;
                state.record(log_entry(&request, &content, processing_time, &input_results, false));
                drop(state);

                return GatewayResponse {
                    content,
                    success: false,
                    confidence: 0.0,
                    processing_time,
                    guardrail_results: input_results,
                    metadata,
                };
            }
        };

        let output_results = self.run_output_guardrails(&solution.content);
        let mut content = solution.content.clone();
        let mut confidence = BASE_CONFIDENCE;
        let mut output_blocked = false;

        for result in &output_results {
            match result.action {
                GuardrailAction::Block => {
                    content = OUTPUT_BLOCKED_MESSAGE.to_string();
                    confidence = 0.0;
                    output_blocked = true;
                    break;
                }
                GuardrailAction::Modify => content = simplify_output(&content),
                GuardrailAction::Warn => confidence = confidence.min(result.confidence),
                GuardrailAction::Allow | GuardrailAction::Log => {}
            }
        }

        if !output_blocked {
            content = simplify_output(&content);
        }

        let processing_time = start.elapsed().as_secs_f64();
        let input_passed = input_results.iter().filter(|r| r.passed).count();
        let output_passed = output_results.iter().filter(|r| r.passed).count();
        let mut guardrail_results = input_results;
        guardrail_results.extend(output_results);

        let mut metadata = Map::new();
        metadata.insert("agent_used".to_string(), json!(self.agent.name()));
        metadata.insert("solution_source".to_string(), json!(solution.source));
        metadata.insert("input_guardrails_passed".to_string(), json!(input_passed));
        metadata.insert("output_guardrails_passed".to_string(), json!(output_passed));
        metadata.insert(
            "total_guardrails_run".to_string(),
            json!(guardrail_results.len()),
        );
        if let Some(provider) = &solution.provider {
            metadata.insert("provider".to_string(), json!(provider));
        }

        let answered = solution.source.is_solved() && !output_blocked;
        let mut state = self.state();
        state.total_requests += 1;
        state.successful_requests += 1;
        let n = state.successful_requests as f64;
        state.average_processing_time =
            (state.average_processing_time * (n - 1.0) + processing_time) / n;
        state.record(log_entry(
            &request,
            &content,
            processing_time,
            &guardrail_results,
            answered,
        ));
        drop(state);

        info!("Request processed successfully in {processing_time:.3}s");
        GatewayResponse {
            content,
            success: true,
            confidence,
            processing_time,
            guardrail_results,
            metadata,
        }
    }

    async fn run_input_guardrails(&self, query: &str) -> Vec<GuardrailResult> {
        let mut results = Vec::with_capacity(self.input_guardrails.len());
        for guardrail in &self.input_guardrails {
            let result = match guardrail.check(query).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error in input guardrail {}: {e}", guardrail.name());
                    GuardrailResult {
                        guardrail: guardrail.name().to_string(),
                        passed: false,
                        action: GuardrailAction::Block,
                        confidence: 0.0,
                        message: format!("Guardrail error: {e}"),
                        metadata: json!({ "error": e.to_string(), "guardrail": guardrail.name() }),
                    }
                }
            };
            info!(
                "Guardrail {}: {}",
                guardrail.name(),
                if result.passed { "PASSED" } else { "FAILED" }
            );
            let blocked = result.action == GuardrailAction::Block;
            results.push(result);
            if blocked {
                break;
            }
        }
        results
    }

    fn run_output_guardrails(&self, response: &str) -> Vec<GuardrailResult> {
        self.output_guardrails
            .iter()
            .map(|guardrail| match guardrail.check(response) {
                Ok(result) => result,
                Err(e) => {
                    warn!("Error in output guardrail {}: {e}", guardrail.name());
                    GuardrailResult {
                        guardrail: guardrail.name().to_string(),
                        passed: false,
                        action: GuardrailAction::Warn,
                        confidence: 0.5,
                        message: format!("Output guardrail error: {e}"),
                        metadata: json!({ "error": e.to_string(), "guardrail": guardrail.name() }),
                    }
                }
            })
            .collect()
    }

    pub fn get_metrics(&self) -> GatewayMetrics {
        let state = self.state();
        let denominator = state.total_requests.max(1) as f64;
        GatewayMetrics {
            total_requests: state.total_requests,
            blocked_requests: state.blocked_requests,
            successful_requests: state.successful_requests,
            average_processing_time: state.average_processing_time,
            success_rate: state.successful_requests as f64 / denominator * 100.0,
            block_rate: state.blocked_requests as f64 / denominator * 100.0,
            recent_requests: state.request_log.len(),
        }
    }

    /// The last `limit` log entries, oldest first.
    pub fn get_recent_logs(&self, limit: usize) -> Vec<RequestLogEntry> {
        let state = self.state();
        let skip = state.request_log.len().saturating_sub(limit);
        state.request_log.iter().skip(skip).cloned().collect()
    }

    pub fn reset_metrics(&self) {
        *self.state() = GatewayState::default();
        info!("Gateway metrics and logs reset");
    }
}

fn log_entry(
    request: &GatewayRequest,
    content: &str,
    processing_time: f64,
    results: &[GuardrailResult],
    success: bool,
) -> RequestLogEntry {
    let passed = results.iter().filter(|r| r.passed).count();
    RequestLogEntry {
        timestamp: request.timestamp,
        user_query: request.user_query.clone(),
        response_length: content.chars().count(),
        processing_time,
        guardrails_passed: passed,
        guardrails_failed: results.len() - passed,
        success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SolutionSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAgent {
        content: String,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeAgent {
        fn answering(content: &str) -> Arc<Self> {
            Arc::new(Self {
                content: content.to_string(),
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MathAgent for FakeAgent {
        fn name(&self) -> &str {
            "math_solver"
        }

        async fn solve(&self, _query: &str) -> Result<Solution, ServerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ServerError::Database("pool timed out".to_string()));
            }
            Ok(Solution {
                content: self.content.clone(),
                source: SolutionSource::KnowledgeBase,
                confidence: 0.8,
                provider: None,
            })
        }
    }

    struct BrokenInput;

    #[async_trait]
    impl InputGuardrail for BrokenInput {
        fn name(&self) -> &str {
            "broken_input"
        }
        fn priority(&self) -> u8 {
            0
        }
        async fn check(&self, _query: &str) -> Result<GuardrailResult, ServerError> {
            Err(ServerError::Internal("classifier offline".to_string()))
        }
    }

    struct BrokenOutput;

    impl OutputGuardrail for BrokenOutput {
        fn name(&self) -> &str {
            "broken_output"
        }
        fn priority(&self) -> u8 {
            3
        }
        fn check(&self, _response: &str) -> Result<GuardrailResult, ServerError> {
            Err(ServerError::Internal("checker crashed".to_string()))
        }
    }

    const GOOD_ANSWER: &str = "Step 1: factor (x - 2)(x - 3) = 0\nStep 2: so x = 2 or x = 3";

    #[tokio::test]
    async fn greetings_are_blocked_before_the_agent() {
        let agent = FakeAgent::answering(GOOD_ANSWER);
        let gateway = MathAgentGateway::new(agent.clone(), None);

        let response = gateway.process_request(GatewayRequest::new("How are you?")).await;
        assert!(!response.success);
        assert_eq!(response.content, INVALID_INPUT_MESSAGE);
        assert_eq!(response.confidence, 0.0);
        assert_eq!(response.guardrail_results.len(), 1);
        assert_eq!(response.metadata["blocked_by"], INVALID_INPUT_MESSAGE);
        assert_eq!(response.metadata["blocked_guardrail"], "math_content_validator");
        assert_eq!(agent.calls.load(Ordering::SeqCst), 0);

        let metrics = gateway.get_metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.blocked_requests, 1);
        assert_eq!(metrics.block_rate, 100.0);
        assert_eq!(metrics.success_rate, 0.0);
    }

    #[tokio::test]
    async fn unsafe_questions_are_blocked_by_the_comprehensive_check() {
        let gateway = MathAgentGateway::new(FakeAgent::answering(GOOD_ANSWER), None);
        let response = gateway
            .process_request(GatewayRequest::new("how to hack x + 1 = 2"))
            .await;
        assert!(!response.success);
        assert_eq!(response.content, "Content failed safety validation");
        assert_eq!(response.guardrail_results.len(), 2);
        assert_eq!(response.metadata["blocked_by"], "Content failed safety validation");
        assert_eq!(
            response.metadata["blocked_guardrail"],
            response.guardrail_results[1].guardrail
        );
    }

    #[tokio::test]
    async fn clean_answers_pass_with_base_confidence() {
        let gateway = MathAgentGateway::new(FakeAgent::answering(GOOD_ANSWER), None);
        let response = gateway
            .process_request(GatewayRequest::new("Solve x^2 - 5x + 6 = 0"))
            .await;

        assert!(response.success);
        assert_eq!(response.confidence, 0.9);
        assert_eq!(response.guardrail_results.len(), 4);
        assert_eq!(response.metadata["agent_used"], "math_solver");
        assert_eq!(response.metadata["solution_source"], "knowledge_base");
        assert_eq!(response.metadata["total_guardrails_run"], 4);
        assert!(response.content.contains("📝 Step 1"));

        let logs = gateway.get_recent_logs(10);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
        assert_eq!(logs[0].guardrails_passed, 4);
        assert_eq!(logs[0].guardrails_failed, 0);
    }

    #[tokio::test]
    async fn accuracy_warnings_lower_confidence() {
        let gateway = MathAgentGateway::new(FakeAgent::answering("It is four"), None);
        let response = gateway
            .process_request(GatewayRequest::new("Calculate 2 + 2"))
            .await;
        assert!(response.success);
        assert!((response.confidence - 0.6).abs() < 1e-6);
        let accuracy = &response.guardrail_results[3];
        assert_eq!(accuracy.action, GuardrailAction::Warn);
        assert_eq!(accuracy.message, "Mathematical accuracy check: WARNINGS");
    }

    #[tokio::test]
    async fn unsafe_output_is_replaced() {
        let gateway =
            MathAgentGateway::new(FakeAgent::answering("Just cheat off a friend: x = 2"), None);
        let response = gateway
            .process_request(GatewayRequest::new("Solve 2x = 4"))
            .await;
        assert!(response.success);
        assert_eq!(response.content, OUTPUT_BLOCKED_MESSAGE);
        assert_eq!(response.confidence, 0.0);
        assert!(!gateway.get_recent_logs(1)[0].success);
    }

    #[tokio::test]
    async fn agent_errors_become_failed_responses() {
        let agent = Arc::new(FakeAgent {
            content: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let gateway = MathAgentGateway::new(agent, None);
        let response = gateway
            .process_request(GatewayRequest::new("Solve 2x = 4"))
            .await;
        assert!(!response.success);
        assert!(response
            .content
            .starts_with("❌ An error occurred while processing your math question: "));
        assert!(response.metadata["error"]
            .as_str()
            .unwrap()
            .contains("pool timed out"));
        assert_eq!(gateway.get_metrics().total_requests, 1);
        assert_eq!(gateway.get_metrics().successful_requests, 0);
    }

    #[tokio::test]
    async fn guardrail_errors() {
        let gateway = MathAgentGateway::new(FakeAgent::answering(GOOD_ANSWER), None)
            .with_input_guardrail(BrokenInput);
        let response = gateway
            .process_request(GatewayRequest::new("Solve 2x = 4"))
            .await;
        assert!(!response.success);
        assert_eq!(response.content, "Guardrail error: Internal error: classifier offline");

        let gateway = MathAgentGateway::new(FakeAgent::answering(GOOD_ANSWER), None)
            .with_output_guardrail(BrokenOutput);
        let response = gateway
            .process_request(GatewayRequest::new("Solve 2x = 4"))
            .await;
        assert!(response.success);
        assert_eq!(response.confidence, 0.5);
        let last = response.guardrail_results.last().unwrap();
        assert_eq!(last.action, GuardrailAction::Warn);
        assert!(last.message.starts_with("Output guardrail error: "));
    }

    #[tokio::test]
    async fn request_log_is_bounded_and_resettable() {
        let gateway = MathAgentGateway::new(FakeAgent::answering(GOOD_ANSWER), None);
        for i in 0..(REQUEST_LOG_CAPACITY + 5) {
            gateway
                .process_request(GatewayRequest::new(format!("hello {i}")))
                .await;
        }

        let metrics = gateway.get_metrics();
        assert_eq!(metrics.total_requests, 105);
        assert_eq!(metrics.recent_requests, REQUEST_LOG_CAPACITY);

        let recent = gateway.get_recent_logs(3);
        let queries: Vec<_> = recent.iter().map(|l| l.user_query.as_str()).collect();
        assert_eq!(queries, vec!["hello 102", "hello 103", "hello 104"]);

        gateway.reset_metrics();
        let metrics = gateway.get_metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.recent_requests, 0);
        assert_eq!(metrics.success_rate, 0.0);
    }

    #[tokio::test]
    async fn average_time_tracks_successful_requests() {
        let gateway = MathAgentGateway::new(FakeAgent::answering(GOOD_ANSWER), None);
        gateway.process_request(GatewayRequest::new("hi")).await;
        gateway
            .process_request(GatewayRequest::new("Solve 2x = 4"))
            .await;
        let metrics = gateway.get_metrics();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.success_rate, 50.0);
        assert!(metrics.average_processing_time >= 0.0);
        let logged = gateway.get_recent_logs(1)[0].processing_time;
        assert!((metrics.average_processing_time - logged).abs() < 1e-12);
    }
}
