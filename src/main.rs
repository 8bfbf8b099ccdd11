use clap::Parser;
use math_routing_agent::{
    config::AppConfig,
    database::{Database, ProblemStore},
    error::ServerError,
    feedback::FeedbackHandler,
    gateway::GatewayRequest,
    server::MathTutorServer,
    services::{format_stats_report, TutorServices},
};
use rmcp::{transport::io::stdio, ServiceExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Math tutoring MCP server with guardrails, knowledge base and web fallback", long_about = None)]
struct Cli {
    /// Answer a single question through the gateway and exit
    #[arg(long)]
    ask: Option<String>,

    /// Print knowledge base and feedback statistics and exit
    #[arg(short, long)]
    stats: bool,

    /// Embedding provider to use (openai or voyage)
    #[arg(long, env = "EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// Embedding model to use
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    dotenvy::dotenv().ok();

    // stdout carries the MCP protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "math_routing_agent=info,rmcp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().with_embedding(cli.embedding_provider, cli.embedding_model);

    if cli.stats {
        // only the database is needed here, not the LLM or search keys
        let database = Database::new(&config.database_url).await?;
        database.ensure_schema().await?;
        let kb = database.get_kb_stats().await?;
        let feedback = FeedbackHandler::open(config.feedback_path()).get_feedback_stats();
        print!("{}", format_stats_report(&kb, &feedback));
        return Ok(());
    }

    let services = TutorServices::from_config(&config).await?;

    if let Some(question) = cli.ask {
        let response = services
            .gateway
            .process_request(GatewayRequest::new(question))
            .await;
        println!("{}", response.content);
        eprintln!(
            "success: {}, confidence: {:.2}, time: {:.2}s",
            response.success, response.confidence, response.processing_time
        );
        return Ok(());
    }

    let startup_message = services.startup_message().await;
    eprintln!("✅ {startup_message}");

    let service = MathTutorServer::new(services, startup_message);

    eprintln!("Math tutor MCP server starting via stdio...");

    let server_handle = service.serve(stdio()).await.map_err(|e| {
        eprintln!("Failed to start server: {e:?}");
        ServerError::McpRuntime(e.to_string())
    })?;

    server_handle.waiting().await.map_err(|e| {
        eprintln!("Server encountered an error while running: {e:?}");
        ServerError::McpRuntime(e.to_string())
    })?;

    eprintln!("Math tutor MCP server stopped.");
    Ok(())
}
