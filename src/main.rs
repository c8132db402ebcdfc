//! cosmos-mcp server binary.
//!
//! Run with: cosmos-mcp --endpoint <uri> --key <key> --database <db>

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "cosmos")]
use cosmos_mcp::{CosmosConfig, CosmosStore};
use cosmos_mcp::{
    Dispatcher, DocumentStore, McpError, McpServer, McpSession, MemoryStore, Result,
    SessionSettings, ToolRegistry, DEFAULT_MAX_IN_FLIGHT, DEFAULT_TIMEOUT,
};

#[derive(Parser, Debug)]
#[command(name = "cosmos-mcp")]
#[command(version, about = "MCP server exposing Azure Cosmos DB documents as agent tools")]
struct Args {
    /// Cosmos DB account endpoint
    #[arg(long, env = "COSMOS_URI")]
    endpoint: Option<String>,

    /// Cosmos DB account key
    #[arg(long, env = "COSMOS_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Database name
    #[arg(long, env = "COSMOS_DATABASE")]
    database: Option<String>,

    /// Serve an in-process store instead of Cosmos DB
    #[arg(long)]
    in_memory: bool,

    /// Containers to create in the in-process store (repeatable)
    #[arg(long = "container", requires = "in_memory")]
    containers: Vec<String>,

    /// Per-call store timeout in seconds (0 disables)
    #[arg(long, env = "COSMOS_MCP_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Fail queries that return more than this many items
    #[arg(long, env = "COSMOS_MCP_MAX_QUERY_ITEMS")]
    max_query_items: Option<usize>,

    /// Maximum tool calls running at once
    #[arg(long, env = "COSMOS_MCP_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    max_in_flight: usize,

    /// Guard update_item with the etag from its read
    #[arg(long)]
    optimistic_updates: bool,

    /// Reject put_item and update_item
    #[arg(long)]
    read_only: bool,
}

impl Args {
    fn settings(&self) -> SessionSettings {
        SessionSettings {
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            max_query_items: self.max_query_items,
            optimistic_updates: self.optimistic_updates,
            read_only: self.read_only,
        }
    }

    fn store(&self) -> Result<Arc<dyn DocumentStore>> {
        if self.in_memory {
            return Ok(Arc::new(MemoryStore::with_containers(self.containers.iter().cloned())));
        }
        self.remote_store()
    }

    #[cfg(feature = "cosmos")]
    fn remote_store(&self) -> Result<Arc<dyn DocumentStore>> {
        let config = CosmosConfig {
            endpoint: self.endpoint.clone().unwrap_or_default(),
            key: self.key.clone().unwrap_or_default(),
            database: self.database.clone().unwrap_or_default(),
        };
        tracing::info!(endpoint = %config.endpoint, database = %config.database, "connecting to Cosmos DB");
        Ok(Arc::new(CosmosStore::new(config)?))
    }

    #[cfg(not(feature = "cosmos"))]
    fn remote_store(&self) -> Result<Arc<dyn DocumentStore>> {
        Err(McpError::Config(
            "built without the 'cosmos' feature; use --in-memory".to_string(),
        ))
    }
}

fn run(args: Args) -> Result<()> {
    let store = args.store()?;
    tracing::info!(store = store.kind(), settings = ?args.settings(), "starting cosmos-mcp");

    let session = McpSession::new(store, args.settings())?;
    let registry = ToolRegistry::new()?;
    let server =
        McpServer::new(Dispatcher::new(registry, session)).with_max_in_flight(args.max_in_flight);
    server.run_sync()
}

fn main() -> ExitCode {
    // Initialize logging to stderr (stdout is for MCP protocol)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cosmos_mcp=info")))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ McpError::Config(_)) => {
            tracing::error!("{}", err);
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!("server error: {}", err);
            ExitCode::FAILURE
        }
    }
}
