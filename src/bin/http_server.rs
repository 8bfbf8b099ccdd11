use clap::Parser;
use math_routing_agent::{
    api, config::AppConfig, error::ServerError, server::MathTutorServer, services::TutorServices,
};
use rmcp::{
    service::ServiceExt,
    transport::sse_server::{SseServer, SseServerConfig},
};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Math tutor over MCP SSE transport plus a JSON HTTP API", long_about = None)]
struct Cli {
    /// Port for the MCP SSE transport
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Port for the JSON API and health check
    #[arg(long, default_value = "8080", env = "API_PORT")]
    api_port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Embedding provider to use (openai or voyage)
    #[arg(long, env = "EMBEDDING_PROVIDER")]
    embedding_provider: Option<String>,

    /// Embedding model to use
    #[arg(long, env = "EMBEDDING_MODEL")]
    embedding_model: Option<String>,
}

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| ServerError::Config(format!("Invalid bind address: {e}")))
}

async fn serve_api(services: TutorServices, addr: SocketAddr) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🏥 Health endpoint: http://{addr}/health");
    info!("🧮 API endpoint: http://{addr}/api/ask");
    axum::serve(listener, api::router(services)).await?;
    Ok(())
}

async fn serve_mcp(server: MathTutorServer, addr: SocketAddr) -> Result<(), ServerError> {
    let config = SseServerConfig {
        bind: addr,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: CancellationToken::new(),
    };

    info!("🌐 Starting MCP server on {addr}");
    info!("📡 SSE endpoint: http://{addr}/sse");
    info!("📤 POST endpoint: http://{addr}/message");

    let mut sse_server = SseServer::serve_with_config(config)
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to start SSE server: {e}")))?;

    info!("🎯 MCP server waiting for connections...");

    while let Some(transport) = sse_server.next_transport().await {
        info!("🔗 New MCP connection established");
        let handler = server.clone();

        tokio::spawn(async move {
            match handler.serve(transport).await {
                Ok(service) => {
                    if let Err(e) = service.waiting().await {
                        error!("MCP service error: {e}");
                    }
                }
                Err(e) => error!("Failed to start MCP service: {e}"),
            }
        });
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "math_routing_agent=info,rmcp=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().with_embedding(cli.embedding_provider, cli.embedding_model);

    let services = TutorServices::from_config(&config).await?;
    let startup_message = services.startup_message().await;
    info!("✅ {startup_message}");

    let mcp_addr = parse_addr(&cli.host, cli.port)?;
    let api_addr = parse_addr(&cli.host, cli.api_port)?;

    let server = MathTutorServer::new(services.clone(), startup_message);
    futures::future::try_join(serve_api(services, api_addr), serve_mcp(server, mcp_addr)).await?;

    Ok(())
}
