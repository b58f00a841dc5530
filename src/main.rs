use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedroll::config::Config;
use feedroll::db::Database;
use feedroll::freshness::{FreshnessCache, FreshnessTracker};
use feedroll::ingest::{start_background_refresh, Ingestor};
use feedroll::routes::{self, AppState};

#[derive(Parser)]
#[command(name = "feedroll", version, about = "Personal RSS/Atom aggregator")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "feedroll.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web server (default)
    Serve,
    /// Fetch every feed once and exit
    Collect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedroll=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load_or_default(&cli.config)?;
    if let Ok(url) = std::env::var("DATABASE_URL") {
        config.database_url = url;
    }

    // Initialize database
    let db = Database::new(&config.database_url).await?;
    db.initialize().await?;
    info!("Database initialized");
    let db = Arc::new(db);

    let ingestor = Arc::new(Ingestor::from_config(db.clone(), &config)?);

    // Ctrl-C stops new fetches; in-flight ones finish or time out
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Collect => collect(&ingestor, shutdown_rx).await,
        Command::Serve => serve(config, db, ingestor, shutdown_rx).await,
    }
}

async fn collect(ingestor: &Ingestor, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let outcomes = ingestor.ingest_all(shutdown).await?;
    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            warn!(feed_id = outcome.feed_id, kind = e.kind(), error = %e, "Feed failed");
        }
    }
    Ok(())
}

async fn serve(
    config: Config,
    db: Arc<Database>,
    ingestor: Arc<Ingestor>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    // Start background refresh task
    if config.refresh_interval > 0 {
        let bg_ingestor = ingestor.clone();
        let bg_shutdown = shutdown.clone();
        let refresh_interval = config.refresh_interval;
        tokio::spawn(async move {
            start_background_refresh(bg_ingestor, refresh_interval, bg_shutdown).await;
        });
    }

    let freshness = Arc::new(FreshnessTracker::new(
        db.clone(),
        FreshnessCache::new(config.freshness.cache_ttl()),
    ));

    // Create app state
    let state = Arc::new(AppState {
        db,
        ingestor,
        freshness,
        per_page: config.per_page,
        shutdown: shutdown.clone(),
    });

    let app = routes::create_router(state)
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server starting on http://{}", config.bind);

    let mut shutdown = shutdown;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    Ok(())
}
