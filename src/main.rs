//! # Revision Announcer CLI (`announcer`)
//!
//! ## Usage
//!
//! ```bash
//! announcer --config ./config/announcer.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `announcer epochs` | Print the epoch catalog |
//! | `announcer revisions` | Clone and print epochal revisions once |
//! | `announcer serve` | Clone, keep fetching, and serve the HTTP API |
//! | `announcer github prs` | Pick epochal merged PRs straight from GitHub |
//! | `announcer github commits <hash>...` | Look up commits through the GitHub API |
//!
//! ## Examples
//!
//! ```bash
//! # Latest daily and weekly revisions as of a fixed time
//! announcer revisions --epoch daily --epoch weekly --now 2018-04-10T00:00:00Z
//!
//! # Three revisions per epoch
//! announcer revisions --num 3
//!
//! # Start the API server
//! announcer serve --config ./config/announcer.toml
//! ```

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use announcer_core::epoch::Catalog;
use announcer_core::error::SelectError;
use announcer_core::models::ObjectId;

use revision_announcer::announcer::Announcer;
use revision_announcer::api::{self, RevisionsQuery, RevisionsResponse};
use revision_announcer::config::{self, LoggingConfig};
use revision_announcer::github::{self, GithubClient};
use revision_announcer::{server, telemetry};

/// Revision announcer: the latest merged-PR revision for every calendar
/// epoch of a git repository.
///
/// Commands that touch the repository read a TOML configuration file. See
/// `config/announcer.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "announcer", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/announcer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the epoch catalog as JSON.
    Epochs,

    /// Clone the repository and print epochal revisions as JSON.
    ///
    /// Exits with an error if some epoch has fewer revisions than
    /// requested; the partial result is still printed.
    Revisions {
        /// Epoch id to select (repeatable). Defaults to every epoch.
        #[arg(long = "epoch")]
        epochs: Vec<String>,

        /// Revisions per epoch.
        #[arg(long)]
        num: Option<usize>,

        /// End of the window (RFC 3339). Defaults to the current time.
        #[arg(long)]
        now: Option<String>,

        /// Start of the window (RFC 3339). Defaults to twice the longest
        /// epoch before `now`.
        #[arg(long)]
        start: Option<String>,
    },

    /// Start the HTTP server.
    ///
    /// Clones in the background, fetches every `[refresh].interval_secs`
    /// and serves `/api/revisions/*` on `[server].bind`.
    Serve,

    /// Query GitHub directly.
    Github {
        #[command(subcommand)]
        action: GithubAction,
    },
}

#[derive(Subcommand)]
enum GithubAction {
    /// Fetch recently merged PRs and pick one per epoch.
    Prs {
        /// Merged PRs to fetch.
        #[arg(long, default_value_t = 500)]
        num: usize,
    },

    /// Look up commit objects by hash, in batches of `[github].batch_size`.
    Commits {
        /// Full 40-character commit hashes.
        #[arg(required = true)]
        hashes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Epochs = cli.command {
        telemetry::init(&LoggingConfig::default());
        let catalog = Catalog::standard();
        println!("{}", serde_json::to_string_pretty(&api::epochs(&catalog))?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    telemetry::init(&cfg.logging);

    match cli.command {
        Commands::Epochs => unreachable!(),
        Commands::Revisions {
            epochs,
            num,
            now,
            start,
        } => {
            let mut pairs: Vec<(String, String)> =
                epochs.into_iter().map(|e| ("epochs".to_string(), e)).collect();
            if let Some(n) = num {
                pairs.push(("num_revisions".to_string(), n.to_string()));
            }
            if let Some(t) = now {
                pairs.push(("now".to_string(), t));
            }
            if let Some(t) = start {
                pairs.push(("start".to_string(), t));
            }

            let announcer = Announcer::from_config(&cfg);
            let query = RevisionsQuery::from_pairs(&pairs)?;
            let request = query.request(announcer.catalog())?;
            let basis = query.basis(announcer.catalog(), Utc::now())?;

            announcer.initialize().await?;
            match announcer.select(request, basis).await {
                Ok(selection) => {
                    let response = RevisionsResponse::new(&selection, announcer.catalog());
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                Err(err) => {
                    let Some(partial) = err.downcast_ref::<SelectError>().and_then(SelectError::partial)
                    else {
                        return Err(err);
                    };
                    let response =
                        RevisionsResponse::new(partial, announcer.catalog()).with_error(&err);
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    bail!("{}", err);
                }
            }
        }
        Commands::Serve => {
            let announcer = Announcer::from_config(&cfg);

            let initial = announcer.clone();
            tokio::spawn(async move {
                if let Err(e) = initial.initialize().await {
                    tracing::error!(error = %format!("{:#}", e), "initial clone failed");
                    eprintln!("Error: {:#}", e);
                    std::process::exit(1);
                }
            });
            announcer.spawn_refresh_loop(Duration::from_secs(cfg.refresh.interval_secs));

            server::run_server(&cfg, announcer).await?;
        }
        Commands::Github { action } => match action {
            GithubAction::Prs { num } => {
                let github_cfg = cfg
                    .github
                    .as_ref()
                    .context("[github] section is required for github commands")?;
                let client = GithubClient::new(github_cfg, &cfg.repository.branch)?;
                let prs = client.merged_prs(num).await?;
                tracing::info!(count = prs.len(), "fetched merged PRs");

                let chosen = github::select_epochal_prs(&prs, &Catalog::standard(), Utc::now())?;
                println!("{}", serde_json::to_string_pretty(&chosen)?);
            }
            GithubAction::Commits { hashes } => {
                for hash in &hashes {
                    hash.parse::<ObjectId>()
                        .with_context(|| format!("Invalid commit hash: {}", hash))?;
                }
                let github_cfg = cfg
                    .github
                    .as_ref()
                    .context("[github] section is required for github commands")?;
                let client = GithubClient::new(github_cfg, &cfg.repository.branch)?;
                let commits = client.commits(&hashes).await?;
                println!("{}", serde_json::to_string_pretty(&commits)?);
            }
        },
    }

    Ok(())
}
