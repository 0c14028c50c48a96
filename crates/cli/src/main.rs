//! `revcache` command line.
//!
//! Builds proxy tokens and pokes at the cache using the same configuration
//! the server loads.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use revcache_client::{FetchConfig, HttpFetcher};
use revcache_core::cache::EntryStat;
use revcache_core::{AppConfig, CacheController, Refresh, token};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "revcache", version, about = "Reverse-fetching cache tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encode a URL into a proxy token.
    Encode {
        url: String,
        /// Print a full proxy link using this base, e.g. `http://127.0.0.1:8080/`.
        #[arg(long)]
        base: Option<String>,
    },
    /// Decode a proxy token back into its URL.
    Decode { token: String },
    /// Make sure a fresh entry exists for a URL.
    Warm {
        url: String,
        /// Refetch even if the stored entry is fresh.
        #[arg(long)]
        force: bool,
    },
    /// Show the stored headers and body size for a URL.
    Show {
        url: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct EntryReport {
    key: String,
    headers: Vec<String>,
    body_len: u64,
    last_written: Option<DateTime<Utc>>,
}

impl From<EntryStat> for EntryReport {
    fn from(stat: EntryStat) -> Self {
        Self {
            key: stat.key.to_string(),
            headers: stat.headers,
            body_len: stat.body_len,
            last_written: stat.last_written.map(DateTime::<Utc>::from),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Encode { url, base } => {
            let token = token::encode(&url)?;
            match base {
                Some(base) => {
                    let config = AppConfig::load()?;
                    println!("{}", proxy_link(&base, &config.url_param, &token));
                }
                None => println!("{token}"),
            }
        }
        Command::Decode { token } => println!("{}", token::decode(&token)?),
        Command::Warm { url, force } => {
            let controller = controller()?;
            let outcome = controller.ensure_fresh(&url, force).await?;
            let word = match outcome {
                Refresh::Fetched => "fetched",
                Refresh::Reused => "reused",
            };
            println!("{word} {url}");
        }
        Command::Show { url, json } => {
            let controller = controller()?;
            let stat = controller.inspect(&url).await?.with_context(|| format!("{url} is not cached"))?;
            print_report(&EntryReport::from(stat), json)?;
        }
    }

    Ok(())
}

fn controller() -> Result<CacheController> {
    let config = AppConfig::load()?;
    tracing::debug!("cache root: {}", config.cache_root.display());
    let fetcher = HttpFetcher::new(FetchConfig::from(&config))?;
    Ok(CacheController::new(config.cache_config(), Arc::new(fetcher)))
}

fn proxy_link(base: &str, url_param: &str, token: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{url_param}={token}")
}

fn print_report(report: &EntryReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("key:          {}", report.key);
    println!("body:         {} bytes", report.body_len);
    match report.last_written {
        Some(at) => {
            let age = SystemTime::now().duration_since(at.into()).unwrap_or_default();
            println!("last written: {} ({}s ago)", at.to_rfc3339(), age.as_secs());
        }
        None => println!("last written: unknown"),
    }
    println!("headers:");
    for header in &report.headers {
        println!("  {header}");
    }
    Ok(())
}
