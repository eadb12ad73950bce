mod app;
mod cache;
mod clock;
mod commands;
mod config;
mod connectivity;
mod error;
mod event;
mod hook;
mod net;
mod resources;
mod retry;
mod store;
#[cfg(test)]
mod testing;
mod ui;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{LocalCache, MemoryStorage, SqliteStorage};
use connectivity::{ConnectivityMonitor, Prober};
use hook::HookContext;
use net::{LinkWatcher, ReqwestClient, RequestInterceptor, SignatureClassifier, TcpLinkProbe};
use store::RestDocumentStore;

#[derive(Parser, Debug)]
#[command(name = "acon")]
#[command(about = "A terminal admin console that keeps working when the network doesn't")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/acon/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Resource to open first (years, books, news...)
  #[arg(short, long)]
  resource: Option<String>,

  /// Log filter, overrides ACON_LOG (e.g. "acon=debug")
  #[arg(long)]
  log_level: Option<String>,

  /// Keep cached snapshots in memory only
  #[arg(long)]
  no_cache: bool,
}

/// Log to a daily file; the terminal belongs to the UI.
fn init_logging(directive: Option<&str>) -> Result<Option<WorkerGuard>> {
  let Some(dir) = dirs::data_dir().map(|d| d.join("acon").join("logs")) else {
    return Ok(None);
  };
  std::fs::create_dir_all(&dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let filter = match directive {
    Some(d) => EnvFilter::try_new(d).map_err(|e| eyre!("Invalid log filter {}: {}", d, e))?,
    None => EnvFilter::try_from_env("ACON_LOG").unwrap_or_else(|_| EnvFilter::new("acon=info")),
  };

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "acon.log"));
  tracing_subscriber::registry()
    .with(filter)
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .init();
  Ok(Some(guard))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_level.as_deref())?;

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let base_url = config.base_url()?;
  info!(backend = %base_url, "starting");

  let monitor = ConnectivityMonitor::new(
    config.monitor_config(),
    SignatureClassifier::with_extra(config.connectivity.blocker_signatures.clone()),
  );

  // Every backend call goes through the interceptor
  let http = Arc::new(RequestInterceptor::new(
    ReqwestClient::new(Duration::from_secs(15))?,
    monitor.clone(),
    config.backend_hosts()?,
  ));
  let store = Arc::new(RestDocumentStore::new(
    http.clone(),
    base_url.clone(),
    config::Config::get_api_token(),
  ));

  let cache = if args.no_cache || !config.cache.persistent {
    LocalCache::new(MemoryStorage::new())
  } else {
    LocalCache::new(SqliteStorage::open(config.cache.path.as_deref())?)
  };

  // Link watcher stands in for the OS online/offline signal
  let host = base_url
    .host_str()
    .ok_or_else(|| eyre!("Backend URL has no host: {}", base_url))?;
  let port = base_url.port_or_known_default().unwrap_or(443);
  let link = TcpLinkProbe::new(format!("{}:{}", host, port), Duration::from_secs(3));
  let _link_task =
    LinkWatcher::new(Arc::new(link), monitor.clone(), config.link_check_interval()).spawn();

  let _probe_task = config.connectivity.probe.enabled.then(|| {
    Prober::new(http.clone(), monitor.clone(), base_url.as_str(), config.retry_policy()).spawn()
  });

  let ctx = HookContext::new(store, monitor.clone(), cache).with_settings(config.hook_settings());

  // Initialize and run the app
  let mut app = app::App::new(&config, monitor, ctx, args.resource.as_deref())?;
  app.run().await?;

  Ok(())
}
