//! Solving agents: the knowledge-base router and its web fallbacks.

pub mod math_solver;
pub mod mcp_toolbox;
pub mod web_search;

use serde::Serialize;

pub use math_solver::MathSolver;
pub use mcp_toolbox::{McpSearchClient, MathToolbox};
pub use web_search::WebSearchAgent;

pub const INVALID_INPUT_MESSAGE: &str =
    "❌ Invalid input: Please ask a mathematics-related question only.";
pub const UNSOLVED_MESSAGE: &str = "❌ Could not find a solution to this math problem. Please try rephrasing or ask a different question.";

/// Which stage of the routing pipeline produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionSource {
    KnowledgeBase,
    Mcp,
    WebSearch,
    InvalidInput,
    Unsolved,
}

impl SolutionSource {
    pub fn label(self) -> &'static str {
        match self {
            SolutionSource::KnowledgeBase => "Knowledge Base",
            SolutionSource::Mcp => "MCP",
            SolutionSource::WebSearch => "Web Search",
            SolutionSource::InvalidInput => "Invalid Input",
            SolutionSource::Unsolved => "Unsolved",
        }
    }

    pub fn is_solved(self) -> bool {
        matches!(
            self,
            SolutionSource::KnowledgeBase | SolutionSource::Mcp | SolutionSource::WebSearch
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    pub content: String,
    pub source: SolutionSource,
    /// Match score for KB answers, verification quality / 10 for MCP answers.
    pub confidence: f32,
    /// Search provider behind a web or MCP answer.
    pub provider: Option<String>,
}

impl Solution {
    pub fn invalid_input() -> Self {
        Self {
            content: INVALID_INPUT_MESSAGE.to_string(),
            source: SolutionSource::InvalidInput,
            confidence: 0.0,
            provider: None,
        }
    }

    pub fn unsolved() -> Self {
        Self {
            content: UNSOLVED_MESSAGE.to_string(),
            source: SolutionSource::Unsolved,
            confidence: 0.0,
            provider: None,
        }
    }
}
