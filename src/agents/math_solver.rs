use crate::{
    agents::{McpSearchClient, Solution, SolutionSource, WebSearchAgent},
    error::ServerError,
    feedback::{Feedback, FeedbackHandler, FEEDBACK_SIMILARITY_THRESHOLD},
    gateway::MathAgent,
    guardrails::{is_valid_math_input, simplify_output},
    knowledge_base::{KbHit, KnowledgeSource},
    llm::ChatModel,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Minimum similarity for a knowledge-base hit to be explained directly.
pub const KB_MATCH_THRESHOLD: f32 = 0.6;
const FEEDBACK_CONTEXT_LIMIT: usize = 3;
const DEBUG_SEARCH_LIMIT: i64 = 3;

/// Routing agent: knowledge base first, then the MCP toolbox, then plain web search.
pub struct MathSolver {
    knowledge: Arc<dyn KnowledgeSource>,
    chat: Arc<dyn ChatModel>,
    feedback: Option<Arc<FeedbackHandler>>,
    mcp: Option<McpSearchClient>,
    web: Option<Arc<WebSearchAgent>>,
}

impl MathSolver {
    pub fn new(knowledge: Arc<dyn KnowledgeSource>, chat: Arc<dyn ChatModel>) -> Self {
        Self {
            knowledge,
            chat,
            feedback: None,
            mcp: None,
            web: None,
        }
    }

    pub fn with_feedback(mut self, feedback: Arc<FeedbackHandler>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_mcp(mut self, mcp: McpSearchClient) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn with_web_search(mut self, web: Arc<WebSearchAgent>) -> Self {
        self.web = Some(web);
        self
    }

    pub async fn explain_math_solution(&self, user_query: &str) -> Result<Solution, ServerError> {
        if !is_valid_math_input(user_query, Some(self.chat.as_ref())).await {
            return Ok(Solution::invalid_input());
        }
        info!("✅ Input guardrail passed - valid math question");

        let feedback_context = self.feedback_context(user_query);

        let hits = self.knowledge.search(user_query, 1).await?;
        if let Some(hit) = hits.into_iter().next().filter(|h| h.score >= KB_MATCH_THRESHOLD) {
            info!("📚 Found in knowledge base (score {:.3})", hit.score);
            match self
                .explain_hit(user_query, &hit, feedback_context.as_deref())
                .await
            {
                Ok(solution) => return Ok(solution),
                Err(e) => warn!("❌ Error generating explanation: {e}"),
            }
        }

        if let Some(mcp) = &self.mcp {
            info!("🔍 Not answered from KB, trying MCP toolbox...");
            match mcp.search_and_solve(user_query).await {
                Ok(Some(solution)) if solution.source.is_solved() => return Ok(solution),
                Ok(_) => debug!("MCP toolbox found nothing"),
                Err(e) => warn!("MCP toolbox failed: {e}"),
            }
        }

        if let Some(web) = &self.web {
            info!("🔍 Falling back to web search...");
            match web.search_and_solve(user_query).await {
                Ok(Some(solution)) if solution.source.is_solved() => return Ok(solution),
                Ok(_) => debug!("Web search found nothing"),
                Err(e) => warn!("Web search failed: {e}"),
            }
        }

        Ok(Solution::unsolved())
    }

    fn feedback_context(&self, user_query: &str) -> Option<String> {
        let handler = self.feedback.as_ref()?;
        let similar = handler.get_feedback_for_question(user_query, FEEDBACK_SIMILARITY_THRESHOLD);
        if similar.is_empty() {
            return None;
        }
        info!("ℹ️ Found {} similar feedback items", similar.len());
        Some(format_feedback_context(&similar))
    }

    async fn explain_hit(
        &self,
        user_query: &str,
        hit: &KbHit,
        feedback_context: Option<&str>,
    ) -> Result<Solution, ServerError> {
        let problem = &hit.problem;
        let prompt = format!(
            r#"You are a helpful math tutor explaining to a student.

Please provide a clear, step-by-step explanation for this math problem:

Question: {question}
User's Query: {user_query}
Known Answer: {answer}
Additional Steps: {steps}

{feedback}

Please format your response as follows:
1. Start with "Let me solve this step by step:"
2. Break down the solution into numbered steps
3. Use simple language appropriate for students
4. Show all calculations clearly
5. End with a clear final answer
6. If there was previous feedback, incorporate those suggestions

Make sure each step is easy to understand and follow."#,
            question = problem.question,
            answer = problem.answer,
            steps = problem.steps.as_deref().unwrap_or_default(),
            feedback = feedback_context.unwrap_or_default(),
        );

        let explanation = self.chat.complete(&prompt).await?;
        let response = format_student_response(
            &problem.question,
            &problem.answer,
            &explanation,
            hit.score,
            SolutionSource::KnowledgeBase.label(),
        );

        Ok(Solution {
            content: simplify_output(&response),
            source: SolutionSource::KnowledgeBase,
            confidence: hit.score,
            provider: None,
        })
    }

    /// Top three raw KB hits, for inspecting retrieval quality.
    pub async fn debug_knowledge_base_search(
        &self,
        user_query: &str,
    ) -> Result<Vec<KbHit>, ServerError> {
        let hits = self.knowledge.search(user_query, DEBUG_SEARCH_LIMIT).await?;
        for (i, hit) in hits.iter().enumerate() {
            debug!(
                "KB result {}: score {:.4}, question {:?}",
                i + 1,
                hit.score,
                hit.problem.question
            );
        }
        Ok(hits)
    }
}

#[async_trait]
impl MathAgent for MathSolver {
    fn name(&self) -> &str {
        "math_solver"
    }

    async fn solve(&self, query: &str) -> Result<Solution, ServerError> {
        self.explain_math_solution(query).await
    }
}

pub fn format_feedback_context(items: &[Feedback]) -> String {
    items
        .iter()
        .take(FEEDBACK_CONTEXT_LIMIT)
        .map(|fb| {
            format!(
                "Previous feedback on similar question '{}':\nRating: {}/5\nFeedback: {}\nSuggested correction: {}\n",
                fb.question,
                fb.feedback_rating,
                fb.feedback_text.as_deref().unwrap_or("No additional comments"),
                fb.suggested_correction.as_deref().unwrap_or("None"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_student_response(
    question: &str,
    answer: &str,
    explanation: &str,
    match_score: f32,
    source: &str,
) -> String {
    format!(
        r#"📚 *MATH PROBLEM SOLUTION* | Source: {source}
═══════════════════════════

🎯 *Question:* {question}

✅ *Final Answer:* {answer}

📝 *Step-by-Step Explanation:*
{explanation}

💡 *Confidence Score:* {match_score:.2} (Higher is better)

═══════════════════════════
🎓 Hope this helps with your math studies!"#
    )
}
