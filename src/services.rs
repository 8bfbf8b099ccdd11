//! Wiring shared by the stdio server, the SSE server and the HTTP API.

use crate::{
    agents::{
        web_search::SearchClient, MathSolver, MathToolbox, McpSearchClient, WebSearchAgent,
    },
    config::AppConfig,
    database::{Database, KbStats},
    embeddings::{embedding_client, install_embedding_provider},
    error::ServerError,
    feedback::{FeedbackHandler, FeedbackStats},
    gateway::MathAgentGateway,
    knowledge_base::KnowledgeBase,
    llm::{ChatModel, OpenAiCompatibleChat},
};
use std::{fmt::Write, sync::Arc};
use tracing::info;

#[derive(Clone)]
pub struct TutorServices {
    pub gateway: Arc<MathAgentGateway>,
    pub solver: Arc<MathSolver>,
    pub feedback: Arc<FeedbackHandler>,
    pub toolbox: Option<Arc<MathToolbox>>,
    pub knowledge: Option<KnowledgeBase>,
}

impl TutorServices {
    /// Assemble from already-built parts. The gateway routes to `solver`.
    pub fn new(
        solver: Arc<MathSolver>,
        classifier: Option<Arc<dyn ChatModel>>,
        feedback: Arc<FeedbackHandler>,
    ) -> Self {
        let gateway = Arc::new(MathAgentGateway::new(solver.clone(), classifier));
        Self {
            gateway,
            solver,
            feedback,
            toolbox: None,
            knowledge: None,
        }
    }

    pub fn with_toolbox(mut self, toolbox: Arc<MathToolbox>) -> Self {
        self.toolbox = Some(toolbox);
        self
    }

    pub fn with_knowledge_base(mut self, knowledge: KnowledgeBase) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, ServerError> {
        let chat = OpenAiCompatibleChat::from_config(config)?;

        info!("🔌 Connecting to database...");
        let database = Database::new(&config.database_url).await?;
        database.ensure_schema().await?;
        info!("✅ Database connected successfully");

        install_embedding_provider(config.embedding_config()?)?;
        let embedder = embedding_client()?;
        info!("🤖 Using {} embeddings", embedder.name());
        let knowledge = KnowledgeBase::new(Arc::new(database), embedder);

        let feedback = Arc::new(FeedbackHandler::open(config.feedback_path()));
        info!("📝 Feedback store at {}", feedback.path().display());

        let search = SearchClient::from_config(config)?;
        if !search.has_tavily() && !search.has_serper() {
            info!("⚠️ No TAVILY_API_KEY or SERPER_API_KEY set, web fallback disabled");
        }
        let toolbox = Arc::new(MathToolbox::new(search.clone(), chat.clone()));
        let web = Arc::new(WebSearchAgent::new(search, chat.clone()));

        let solver = MathSolver::new(Arc::new(knowledge.clone()), chat.clone())
            .with_feedback(feedback.clone())
            .with_mcp(McpSearchClient::new(toolbox.clone()))
            .with_web_search(web);

        Ok(Self::new(Arc::new(solver), Some(chat), feedback)
            .with_toolbox(toolbox)
            .with_knowledge_base(knowledge))
    }

    pub async fn kb_stats(&self) -> Result<KbStats, ServerError> {
        match &self.knowledge {
            Some(knowledge) => knowledge.stats().await,
            None => Err(ServerError::Config(
                "Knowledge base is not configured".to_string(),
            )),
        }
    }

    /// One-line summary used as the MCP `instructions` text.
    pub async fn startup_message(&self) -> String {
        let feedback = self.feedback.get_feedback_stats();
        match self.kb_stats().await {
            Ok(stats) => format!(
                "Math tutor initialized. {} solved problems in the knowledge base, {} feedback items collected.",
                stats.total_points, feedback.total_feedback
            ),
            Err(_) => format!(
                "Math tutor initialized without a knowledge base. {} feedback items collected.",
                feedback.total_feedback
            ),
        }
    }
}

/// Plain-text table printed by `--stats`.
pub fn format_stats_report(kb: &KbStats, feedback: &FeedbackStats) -> String {
    let mut out = String::new();
    let vector_size = kb
        .vector_size
        .map_or_else(|| "N/A".to_string(), |v| v.to_string());
    // writing to a String cannot fail
    let _ = writeln!(out, "{:<24} {}", "Knowledge base items", kb.total_points);
    let _ = writeln!(out, "{:<24} {}", "Vector size", vector_size);
    let _ = writeln!(out, "{:<24} {}", "Distance metric", kb.distance_metric);
    if let Some(updated) = kb.last_updated {
        let _ = writeln!(out, "{:<24} {}", "Last updated", updated.format("%Y-%m-%d %H:%M"));
    }
    for (source, count) in &kb.by_source {
        let _ = writeln!(out, "  {source:<22} {count}");
    }
    let _ = writeln!(out, "{:-<40}", "");
    let _ = writeln!(out, "{:<24} {}", "Feedback items", feedback.total_feedback);
    let _ = writeln!(out, "{:<24} {:.2}", "Average rating", feedback.average_rating);
    let _ = writeln!(
        out,
        "{:<24} {} / {}",
        "Positive / negative", feedback.positive_feedback, feedback.negative_feedback
    );
    out
}
