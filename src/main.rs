mod cache;
mod config;
mod event;
mod net;
mod router;
mod script;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cache::{CacheStorage, CacheStoreManager, MemoryStorage, Served, SqliteStorage};
use config::Config;
use net::{HttpNetwork, Request};
use router::RequestRouter;
use script::{Outcome, COMMANDS};
use worker::WorkerHost;

#[derive(Parser, Debug)]
#[command(name = "onhouse-cache")]
#[command(about = "Offline caching worker for the OnHouse front-end")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./onhouse-cache.yaml or $XDG_CONFIG_HOME/onhouse-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database path (overrides the config file)
  #[arg(long, global = true)]
  cache_db: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current bucket from the asset manifest
  Install,
  /// Delete every bucket except the current one
  Activate,
  /// Route one request through the worker
  Fetch {
    /// URL, absolute or relative to the configured origin
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
    /// Request body (non-GET only)
    #[arg(short, long)]
    data: Option<String>,
    /// Print the response body
    #[arg(long)]
    body: bool,
  },
  /// List cache buckets
  Buckets,
  /// Replay an event script through the worker host
  Run {
    /// Script file (default: stdin)
    script: Option<PathBuf>,
    /// List the script commands and exit
    #[arg(long)]
    list: bool,
  },
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG to control the level (e.g., RUST_LOG=onhouse_cache=debug).
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);

      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(filter)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
      Ok(None)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override database path if specified on command line
  let config = if let Some(cache_db) = args.cache_db {
    Config {
      cache_db: Some(cache_db),
      ..config
    }
  } else {
    config
  };

  info!(version = %config.version, origin = %config.origin, "onhouse-cache starting");

  if args.ephemeral {
    execute(config, MemoryStorage::new(), args.command).await
  } else {
    let path = match &config.cache_db {
      Some(path) => path.clone(),
      None => SqliteStorage::default_path()?,
    };
    let storage = SqliteStorage::open(&path)?;
    execute(config, storage, args.command).await
  }
}

async fn execute<S: CacheStorage>(config: Config, storage: S, command: Command) -> Result<()> {
  let cache =
    CacheStoreManager::new(storage, config.version.clone()).with_shell(&config.shell_url()?);
  let network = Arc::new(HttpNetwork::new(config.timeout())?);

  match command {
    Command::Install => {
      let assets = config.asset_urls()?;
      let report = cache
        .initialize(network.as_ref(), &assets, config.install_policy)
        .await?;

      println!(
        "Installed {} asset(s) into {}",
        report.stored.len(),
        cache.version()
      );
      for (key, reason) in &report.skipped {
        println!("  skipped {}: {}", key.url(), reason);
      }
      if config.skip_waiting {
        for name in cache.reclaim()? {
          println!("Deleted {}", name);
        }
      }
    }

    Command::Activate => {
      let deleted = cache.reclaim()?;
      if deleted.is_empty() {
        println!("No stale buckets; {} is current", cache.version());
      }
      for name in deleted {
        println!("Deleted {}", name);
      }
    }

    Command::Fetch {
      url,
      method,
      navigate,
      data,
      body,
    } => {
      let request = build_request(&config, &url, &method, navigate, data)?;

      let router = RequestRouter::new(network, cache).with_api_marker(config.api_marker.clone());
      let result = router.route(&request).await;
      router.settle().await;

      let served = result?;
      print_served(&request, &served);
      if body {
        println!();
        println!("{}", served.response.text());
      }
    }

    Command::Buckets => {
      let summaries = cache.bucket_summaries()?;
      if summaries.is_empty() {
        println!("No cache buckets");
      }
      for bucket in summaries {
        let marker = if bucket.current { "*" } else { " " };
        println!("{} {:<32} {:>6} entries", marker, bucket.name, bucket.entries);
      }
    }

    Command::Run { list: true, .. } => {
      for cmd in COMMANDS {
        let aliases = if cmd.aliases.is_empty() {
          String::new()
        } else {
          format!(" ({})", cmd.aliases.join(", "))
        };
        println!("{:<10}{:<16}{}", cmd.name, aliases, cmd.description);
      }
    }

    Command::Run { script, list: false } => {
      let text = match script {
        Some(path) => std::fs::read_to_string(&path)
          .map_err(|e| eyre!("Failed to read script {}: {}", path.display(), e))?,
        None => {
          let mut text = String::new();
          io::stdin().read_to_string(&mut text)?;
          text
        }
      };
      let steps = script::parse_script(&text, &config.origin_url()?)?;

      let host = WorkerHost::new(network, cache, config.asset_urls()?)
        .with_policy(config.install_policy)
        .with_api_marker(config.api_marker.clone())
        .with_skip_waiting(config.skip_waiting);
      let (handle, events) = event::channel();
      let host_task = tokio::spawn(host.run(events));

      let outcomes = script::replay(&handle, steps).await;
      drop(handle);
      host_task
        .await
        .map_err(|e| eyre!("Worker host panicked: {}", e))?;

      let mut failures = 0;
      for (line, outcome) in &outcomes {
        match outcome {
          Outcome::Installed(report) => println!(
            "{:>4}  installed {} asset(s), skipped {}",
            line,
            report.stored.len(),
            report.skipped.len()
          ),
          Outcome::Activated(deleted) => {
            println!("{:>4}  activated, deleted {:?}", line, deleted)
          }
          Outcome::Served { request, served } => {
            print!("{:>4}  ", line);
            print_served(request, served);
          }
          Outcome::Failed(error) => {
            failures += 1;
            println!("{:>4}  failed: {}", line, error);
          }
        }
      }

      if failures > 0 {
        return Err(eyre!("{} of {} event(s) failed", failures, outcomes.len()));
      }
    }
  }

  Ok(())
}

/// Build the request for `fetch` from its command-line flags.
fn build_request(
  config: &Config,
  url: &str,
  method: &str,
  navigate: bool,
  data: Option<String>,
) -> Result<Request> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|_| eyre!("Invalid HTTP method '{}'", method))?;
  let url = config.resolve(url)?;

  let mut request = if navigate {
    if method != Method::GET {
      return Err(eyre!("--navigate cannot be used with {}", method));
    }
    Request::navigate(url)
  } else {
    Request::new(method, url)
  };
  if let Some(data) = data {
    if request.is_get() {
      return Err(eyre!("--data cannot be used with GET"));
    }
    request = request
      .with_header("content-type", "application/json")
      .with_body(data);
  }

  Ok(request)
}

fn print_served(request: &Request, served: &Served) {
  let age = served
    .cached_at
    .map(|at| format!(", cached {}", at.format("%Y-%m-%d %H:%M:%S UTC")))
    .unwrap_or_default();
  println!(
    "{} {} -> {} ({}, {} bytes{})",
    request.method,
    request.url,
    served.response.status,
    served.source,
    served.response.body.len(),
    age
  );
}
