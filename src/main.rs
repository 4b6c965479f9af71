use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use trove::config::Config;
use trove::filters::BasicFilterService;
use trove::logging;
use trove::search::SearchOrchestrator;
use trove::server::DiscoveryService;
use trove::store::postgres::PgDiscoveryStore;
use trove::store::{CatalogStore, TelemetryStore};
use rmcp::ServiceExt;

#[derive(Parser)]
#[command(name = "trove", version, about = "Discovery search server for archival catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Skip automatic database migration on startup
    #[arg(long)]
    skip_migrate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Behavioral learning batch jobs
    Learn {
        #[command(subcommand)]
        action: LearnAction,
    },
    /// Print a search analytics summary as JSON
    Analytics {
        /// Trailing window in days
        #[arg(long, default_value_t = 30)]
        days: i64,
        /// Scope to one institution
        #[arg(long)]
        institution: Option<i64>,
    },
}

#[derive(Subcommand)]
enum LearnAction {
    /// Promote frequently successful queries to autocomplete suggestions
    UpdateSuggestions {
        /// Scope to one institution
        #[arg(long)]
        institution: Option<i64>,
    },
    /// Mine synonym pairs from queries whose clicks land on the same records
    Synonyms {
        /// Scope to one institution
        #[arg(long)]
        institution: Option<i64>,
    },
    /// Delete search and click logs past the retention window
    Cleanup {
        /// Override the configured retention, in days
        #[arg(long)]
        keep_days: Option<i64>,
    },
}

/// Build the orchestrator: stores, filter translation, and a ranking-config
/// snapshot. Ranking changes take effect on the next process start.
async fn build_orchestrator(
    store: Arc<PgDiscoveryStore>,
    config: &Config,
) -> Result<SearchOrchestrator> {
    let catalog: Arc<dyn CatalogStore> = store.clone();
    let telemetry: Arc<dyn TelemetryStore> = store.clone();

    let ranking = telemetry
        .ranking_config(None)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ranking config load failed, using defaults");
            None
        })
        .unwrap_or_default();

    Ok(SearchOrchestrator::new(
        catalog,
        telemetry,
        Arc::new(BasicFilterService),
        ranking,
        config.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args
    let cli = Cli::parse();

    // 2. Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Config error (using defaults): {}", e);
        Config::default()
    });

    // 3. Initialize logging FIRST (before any other output)
    // CRITICAL: logging goes to stderr only — stdout is reserved for JSON-RPC
    logging::init_logging(&config);

    // 4. Handle subcommands
    match cli.command {
        Some(Commands::Migrate) => {
            tracing::info!("Running database migrations...");
            let _store = PgDiscoveryStore::new(&config.database_url, true)
                .await
                .expect("Failed to connect and run migrations");
            println!("Migrations completed successfully.");
            return Ok(());
        }

        Some(Commands::Learn { action }) => {
            let store = Arc::new(
                PgDiscoveryStore::new(&config.database_url, true)
                    .await
                    .expect("Failed to connect to database"),
            );
            let orchestrator = build_orchestrator(store, &config).await?;
            let learning = orchestrator.learning();

            match action {
                LearnAction::UpdateSuggestions { institution } => {
                    let count = learning.update_suggestions(institution).await?;
                    println!("Updated {} suggestions.", count);
                }
                LearnAction::Synonyms { institution } => {
                    let count = learning.learn_synonyms(institution).await?;
                    println!("Learned {} synonym pairs.", count);
                }
                LearnAction::Cleanup { keep_days } => {
                    let counts = learning.cleanup(keep_days).await?;
                    println!(
                        "Deleted {} click logs and {} search logs.",
                        counts.clicks_deleted, counts.logs_deleted
                    );
                }
            }
            return Ok(());
        }

        Some(Commands::Analytics { days, institution }) => {
            let store = Arc::new(
                PgDiscoveryStore::new(&config.database_url, true)
                    .await
                    .expect("Failed to connect to database"),
            );
            let orchestrator = build_orchestrator(store, &config).await?;
            let summary = orchestrator.learning().analytics(institution, days).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }

        None => {
            // Default: start the MCP server
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "trove server starting"
            );

            // 5. Initialize PostgreSQL store
            let run_migrations = !cli.skip_migrate;
            let store = Arc::new(
                PgDiscoveryStore::new(&config.database_url, run_migrations)
                    .await
                    .expect("Failed to initialize database"),
            );

            tracing::info!(database_url = %config.database_url, "PostgreSQL store initialized");

            // 6. Build the search orchestrator and service
            let orchestrator = Arc::new(build_orchestrator(store.clone(), &config).await?);
            let service = DiscoveryService::new(orchestrator, store);

            // 7. Serve via stdio transport
            let (stdin, stdout) = rmcp::transport::io::stdio();
            let server = service.serve((stdin, stdout)).await?;

            tracing::info!("trove server running — awaiting tool calls via stdio");

            // 8. Wait for shutdown (client disconnects or signal)
            server.waiting().await?;

            tracing::info!("trove server stopped");
        }
    }

    Ok(())
}
