use clap::Parser;
use math_routing_agent::{
    config::AppConfig,
    database::Database,
    embeddings::{embedding_client, install_embedding_provider},
    error::ServerError,
    feedback::FeedbackHandler,
    knowledge_base::{ItemMetadata, KbUpdate, KnowledgeBase},
};
use std::{path::PathBuf, sync::Arc};
use tracing::warn;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fold suggested corrections from user feedback into the knowledge base", long_about = None)]
struct Cli {
    /// Feedback JSON file (defaults to FEEDBACK_DB_PATH or the platform data dir)
    #[arg(short, long)]
    feedback: Option<PathBuf>,

    /// Only apply corrections from feedback rated at most this value
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=5))]
    max_rating: u8,

    /// List the corrections without writing anything
    #[arg(long)]
    dry_run: bool,
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
    let config = AppConfig::from_env();

    let path = cli.feedback.unwrap_or_else(|| config.feedback_path());
    let handler = FeedbackHandler::open(&path);
    let corrections: Vec<_> = handler
        .corrections()
        .into_iter()
        .filter(|fb| fb.feedback_rating <= cli.max_rating)
        .collect();

    if corrections.is_empty() {
        println!("✅ No corrections to apply from {}", path.display());
        return Ok(());
    }

    println!("📝 Found {} corrections:", corrections.len());
    for fb in &corrections {
        println!("  - [{}/5] {}", fb.feedback_rating, fb.question);
    }
    if cli.dry_run {
        return Ok(());
    }

    let db = Database::new(&config.database_url).await?;
    db.ensure_schema().await?;
    install_embedding_provider(config.embedding_config()?)?;
    let knowledge = KnowledgeBase::new(Arc::new(db), embedding_client()?);

    let (mut updated, mut added, mut failed) = (0, 0, 0);
    for fb in &corrections {
        let Some(answer) = fb.suggested_correction.as_deref() else {
            continue;
        };
        match knowledge
            .update_item(&fb.question, answer, &ItemMetadata::default())
            .await
        {
            Ok(KbUpdate::Updated) => updated += 1,
            Ok(KbUpdate::Added) => added += 1,
            Err(e) => {
                warn!("Failed to apply feedback {}: {e}", fb.feedback_id);
                failed += 1;
            }
        }
    }

    println!("\n🎉 Corrections applied: {updated} updated, {added} added, {failed} failed");
    if failed > 0 {
        return Err(ServerError::Internal(format!(
            "{failed} corrections could not be applied"
        )));
    }
    Ok(())
}
