use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use tunestats::clients::{MusicApi, errors::Result};
use tunestats::config::{self, Config, ConfigBuilder};
use tunestats::refresher::Refresher;
use tunestats::stats::StatsService;

#[derive(Parser)]
#[command(name = "tunestats")]
#[command(version, about = "Track your Spotify top tracks, artists and genres over time", long_about = None)]
struct Cli {
    /// Path to the DuckDB database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard and the JSON API
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Minutes between refreshes of every user, 0 to disable
        #[arg(long)]
        refresh_interval: Option<u64>,
    },
    /// Take a new stats snapshot for one user
    Refresh { username: String },
    /// Take a new stats snapshot for every known user
    RefreshAll {
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Create the database tables and exit
    InitDb,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = ConfigBuilder::new();
    if let Some(db) = cli.db.clone() {
        builder = builder.db_path(db);
    }

    match cli.command {
        Commands::Serve {
            bind,
            refresh_interval,
        } => {
            if let Some(addr) = bind {
                builder = builder.bind_addr(addr);
            }
            if let Some(mins) = refresh_interval {
                builder =
                    builder.refresh_interval((mins > 0).then(|| Duration::from_secs(mins * 60)));
            }
            let config = load(builder).await?;
            tunestats::http::serve(config).await
        }
        Commands::Refresh { username } => {
            let config = load(builder).await?;
            config.spotify.authorize_app().await?;
            stats_service(&config).refresh_user(&username).await
        }
        Commands::RefreshAll { concurrency } => {
            if let Some(n) = concurrency {
                builder = builder.refresh_concurrency(n);
            }
            let config = load(builder).await?;
            config.spotify.authorize_app().await?;
            let refresher = Refresher::new(stats_service(&config), config.refresh_concurrency);
            let summary = refresher.refresh_all().await?;
            if !summary.failed.is_empty() {
                info!("Failed users: {}", summary.failed.join(", "));
            }
            Ok(())
        }
        Commands::InitDb => {
            let storage = config::open_storage(cli.db).await?;
            storage.init_db().await?;
            info!("Database ready");
            Ok(())
        }
    }
}

async fn load(builder: ConfigBuilder) -> Result<Config> {
    info!("Building config ...");
    let config = builder.build().await?;
    config.storage.init_db().await?;
    Ok(config)
}

fn stats_service(config: &Config) -> StatsService<dyn MusicApi> {
    let api: Arc<dyn MusicApi> = config.spotify.clone();
    StatsService::new(config.storage.clone(), api)
}
