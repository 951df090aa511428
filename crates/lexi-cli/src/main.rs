use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lexi_core::CollectionId;
use lexi_feeds::ImporterKind;
use lexi_import::{BackgroundDispatcher, ImportConfig, ImportPipeline, SessionContext};
use lexi_storage::{HttpFetcher, MediaStore, PgCatalog};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lexi-cli")]
#[command(about = "Lexicon feed importer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Preview a feed file, then confirm or cancel it.
    Import {
        #[arg(value_enum)]
        kind: FeedKind,
        #[arg(long)]
        file: PathBuf,
        /// Target collection; required for share exports and gloss lists.
        #[arg(long)]
        collection: Option<CollectionId>,
        /// Write the staged batch. Without this the preview is printed and discarded.
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FeedKind {
    Share,
    GlossList,
    Survey,
    ManualReview,
}

impl From<FeedKind> for ImporterKind {
    fn from(kind: FeedKind) -> Self {
        match kind {
            FeedKind::Share => ImporterKind::Share,
            FeedKind::GlossList => ImporterKind::GlossList,
            FeedKind::Survey => ImporterKind::Survey,
            FeedKind::ManualReview => ImporterKind::ManualReview,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = ImportConfig::from_env();

    match cli.command {
        Commands::Migrate => {
            let catalog = PgCatalog::connect(&config.database_url, config.database_max_connections)
                .await
                .context("connecting to the catalog database")?;
            catalog.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Import {
            kind,
            file,
            collection,
            confirm,
        } => run_import(config, kind, file, collection, confirm).await?,
    }

    Ok(())
}

async fn run_import(
    config: ImportConfig,
    kind: FeedKind,
    file: PathBuf,
    collection: Option<CollectionId>,
    confirm: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;

    let catalog = Arc::new(
        PgCatalog::connect(&config.database_url, config.database_max_connections)
            .await
            .context("connecting to the catalog database")?,
    );
    let fetcher = HttpFetcher::new(config.http_client_config())?;
    let dispatcher = BackgroundDispatcher::new(
        Arc::new(fetcher),
        MediaStore::new(&config.media_dir),
        catalog.clone(),
    )
    .with_base_url(config.media_base_url.clone());
    let pipeline = ImportPipeline::new(config, catalog, Arc::new(dispatcher));

    let context = SessionContext::new(format!("cli:{}", std::process::id()));
    let preview = match kind {
        FeedKind::Share | FeedKind::GlossList => {
            let Some(collection) = collection else {
                bail!("--collection is required for {} imports", ImporterKind::from(kind));
            };
            if matches!(kind, FeedKind::Share) {
                pipeline.preview_share(context.clone(), collection, &bytes).await?
            } else {
                pipeline.preview_gloss_list(context.clone(), collection, &bytes).await?
            }
        }
        FeedKind::Survey => pipeline.preview_survey(context.clone(), &bytes).await?,
        FeedKind::ManualReview => pipeline.preview_manual_review(context.clone(), &bytes).await?,
    };
    println!("{}", serde_json::to_string_pretty(&preview)?);

    let token = preview.token();
    if !confirm {
        pipeline.cancel(&context, token).await?;
        info!(%token, "preview only; rerun with --confirm to import");
        return Ok(());
    }

    let outcome = pipeline.confirm(&context, token).await?;
    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);

    let report = outcome
        .dispatch
        .wait()
        .await
        .context("media dispatch task panicked")?;
    if report.attempted > 0 {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
