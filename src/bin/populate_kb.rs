use clap::Parser;
use math_routing_agent::{
    config::AppConfig,
    database::Database,
    dataset::{load_dataset, resolve_dataset_path},
    embeddings::{generate_embeddings, install_embedding_provider, EMBEDDING_BATCH_SIZE},
    error::ServerError,
};
use std::{path::PathBuf, time::Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Load a math dataset into the vector knowledge base", long_about = None)]
struct Cli {
    /// Dataset JSON file (defaults to data/math_dataset.json, then the sample dataset)
    #[arg(short, long, env = "MATH_DATASET_PATH")]
    dataset: Option<PathBuf>,

    /// Remove every stored problem before loading
    #[arg(long)]
    recreate: bool,

    /// Problems embedded and stored per batch
    #[arg(long, default_value_t = EMBEDDING_BATCH_SIZE)]
    batch_size: usize,

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
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "math_routing_agent=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if cli.batch_size == 0 {
        return Err(ServerError::Config("--batch-size must be at least 1".to_string()));
    }
    let config = AppConfig::from_env().with_embedding(cli.embedding_provider, cli.embedding_model);

    let path = resolve_dataset_path(cli.dataset.as_deref())?;
    println!("📂 Loading dataset from {}", path.display());
    let loaded = load_dataset(&path)?;
    println!(
        "✅ {} problems ready ({} skipped)",
        loaded.problems.len(),
        loaded.skipped
    );
    if loaded.problems.is_empty() {
        return Err(ServerError::Dataset(format!(
            "No usable problems in {}",
            path.display()
        )));
    }

    println!("🔌 Connecting to database...");
    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;
    if cli.recreate {
        println!("🗑️  Clearing existing knowledge base...");
        db.recreate_collection().await?;
    }

    install_embedding_provider(config.embedding_config()?)?;

    let start = Instant::now();
    let total = loaded.problems.len();
    let batches = total.div_ceil(cli.batch_size);
    let mut stored = 0;
    let mut total_tokens = 0;

    for (i, batch) in loaded.problems.chunks(cli.batch_size).enumerate() {
        let (embedded, tokens) = generate_embeddings(batch).await?;
        db.upsert_problems_batch(&embedded).await?;
        stored += embedded.len();
        total_tokens += tokens;
        println!(
            "  📦 [{}/{}] stored {stored}/{total} problems ({total_tokens} tokens)",
            i + 1,
            batches
        );
    }

    let count = db.count_problems().await?;
    println!(
        "\n🎉 Loaded {stored} problems in {:.2}s. Knowledge base now holds {count} items.",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
