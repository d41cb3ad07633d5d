use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use shellcache::{
  logging, Config, Handled, Host, HttpNetwork, Method, Network, Registration, Request,
  SqliteStorage, StoreManager,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-capable, versioned resource cache for a web app shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Also append logs to this file
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured generation and activate it, deleting older stores
  Deploy,
  /// Send one request through the active generation
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// List persisted stores
  Stores,
  /// List the request keys held by a store (default: current store)
  Keys { store: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  let config = Config::load(args.config.as_deref())?;
  let storage = match &config.database {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  let manager = StoreManager::new(storage);

  match args.command {
    Command::Deploy => deploy(&config, manager).await,
    Command::Fetch { url, method } => fetch(&config, manager, &url, &method).await,
    Command::Stores => stores(&config, &manager).await,
    Command::Keys { store } => keys(&config, &manager, store).await,
  }
}

async fn deploy(config: &Config, manager: StoreManager<SqliteStorage>) -> Result<()> {
  let network = Arc::new(HttpNetwork::new(config.origin.clone())?);
  let mut host = Host::new(manager, network);

  match host.register(config.generation()).await? {
    Registration::Activated(report) => {
      println!("Activated {}", config.store_id());
      for id in &report.deleted {
        println!("  deleted {}", id);
      }
      for (id, reason) in &report.failed {
        println!("  could not delete {}: {}", id, reason);
      }
    }
    Registration::Waiting => println!("Installed {}, waiting for clients", config.store_id()),
  }

  Ok(())
}

async fn fetch(
  config: &Config,
  manager: StoreManager<SqliteStorage>,
  url: &str,
  method: &str,
) -> Result<()> {
  let url = config
    .origin
    .join(url)
    .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
  let request = Request::new(method, url);

  let network = Arc::new(HttpNetwork::new(config.origin.clone())?);
  let mut host = Host::restore(manager, Arc::clone(&network), config.generation())
    .await
    .map_err(|e| eyre!("{}. Run `shellcache deploy` first.", e))?;
  let client = host.open_client();

  let (response, source) = match host.dispatch(client, &request).await? {
    Handled::PassThrough(reason) => {
      let response = network.fetch(&request).await?;
      (response, format!("network (not intercepted: {:?})", reason))
    }
    Handled::Cache(response) => (response, "cache".to_string()),
    Handled::Network {
      response,
      write_back,
    } => {
      let source = if write_back.is_some() {
        "network, cached"
      } else {
        "network, not cacheable"
      };
      if let Some(task) = write_back {
        task.await?;
      }
      (response, source.to_string())
    }
  };

  println!(
    "{} {} ({} bytes, {})",
    response.status,
    response.url,
    response.body.len(),
    source
  );
  Ok(())
}

async fn stores(config: &Config, manager: &StoreManager<SqliteStorage>) -> Result<()> {
  let current = config.store_id().to_string();

  for id in manager.list_store_ids().await? {
    let entries = match manager.existing(&id).await? {
      Some(store) => store.keys()?.len(),
      None => 0,
    };
    let marker = if id == current { "*" } else { " " };
    println!("{} {} ({} entries)", marker, id, entries);
  }

  Ok(())
}

async fn keys(
  config: &Config,
  manager: &StoreManager<SqliteStorage>,
  store: Option<String>,
) -> Result<()> {
  let id = store.unwrap_or_else(|| config.store_id().to_string());
  let store = manager
    .existing(&id)
    .await?
    .ok_or_else(|| eyre!("Store {} does not exist", id))?;

  for key in store.keys()? {
    println!("{}", key);
  }

  Ok(())
}
