use clap::{Parser, ValueEnum};
use pkg_constants::paths::DEFAULT_CONFIG;
use pkg_controllers::Context;
use pkg_controllers::queue::{Manager, WorkQueue};
use pkg_forest::NamespaceForest;
use pkg_state::client::StateStore;
use pkg_types::config::{HnsConfig, HnsConfigFile, load_config_file};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "hns-manager", about = "k3rs hierarchical namespace manager")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Ceiling on namespaces sharing one enforcement root
    #[arg(long)]
    max_subnamespaces: Option<usize>,

    /// Allow every admission request without checking it
    #[arg(long)]
    no_webhooks: bool,

    /// Create every new subnamespace as a resource pool
    #[arg(long)]
    resource_pool_only: bool,

    /// Depth up to which subnamespaces get a namespace-local quota
    #[arg(long)]
    root_depth: Option<u32>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Load config file (returns defaults if file not found)
    let file_cfg: HnsConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let mut config = HnsConfig::from_file(file_cfg);
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(max) = cli.max_subnamespaces {
        config.max_subnamespaces = max;
    }
    if let Some(depth) = cli.root_depth {
        config.root_depth = depth;
    }
    config.no_webhooks |= cli.no_webhooks;
    config.resource_pool_only |= cli.resource_pool_only;

    info!("Starting hns-manager");
    info!("  Data dir:           {}", config.data_dir);
    info!("  Root depth:         {}", config.root_depth);
    info!("  Max subnamespaces:  {}", config.max_subnamespaces);
    info!("  Resource pool only: {}", config.resource_pool_only);
    if config.no_webhooks {
        warn!("Admission checks are disabled");
    }

    let store = StateStore::new(&config.data_dir).await?;
    let forest = Arc::new(NamespaceForest::new());
    pkg_forest::rebuild(&forest, &store, config.root_depth).await?;

    let (queue, rx) = WorkQueue::new();
    let ctx = Context {
        store,
        forest,
        queue,
        config: Arc::new(config),
    };
    let handle = Manager::new(ctx, rx).start();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down hns-manager");
        }
        res = handle => {
            if let Err(e) = res {
                anyhow::bail!("dispatcher stopped: {}", e);
            }
        }
    }
    Ok(())
}
