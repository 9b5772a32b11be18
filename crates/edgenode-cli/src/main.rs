use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edgenode_core::domain::{Priority, Task, TaskId};
use edgenode_core::impls::InMemoryCoordinator;
use edgenode_core::{EdgeBuilder, EdgeConfig, EdgeRuntime};

#[derive(Parser)]
#[command(name = "edgenode")]
#[command(version, about = "Edge compute node: pull tasks, run them, report results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file; missing file means defaults
    #[arg(short, long, global = true, env = "EDGENODE_CONFIG", default_value = "edgenode.toml")]
    config: PathBuf,

    #[command(flatten)]
    overrides: Overrides,
}

/// Command-line overrides applied on top of the config file.
#[derive(Args)]
struct Overrides {
    /// Coordinator API base url
    #[arg(long, global = true, env = "EDGENODE_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the coordinator
    #[arg(long, global = true, env = "EDGENODE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true, env = "EDGENODE_NODE_ID")]
    node_id: Option<String>,

    #[arg(long, global = true, env = "EDGENODE_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register, then heartbeat, pull and execute until Ctrl-C
    Run(RunArgs),

    /// Log in and print the bearer token
    Login(Credentials),

    /// Register this node with the coordinator
    Register,

    /// Run sample tasks against an in-process coordinator
    Demo {
        /// Number of sample tasks
        #[arg(long, default_value_t = 9)]
        tasks: usize,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Args)]
struct Credentials {
    #[arg(long, env = "EDGENODE_EMAIL")]
    email: String,

    #[arg(long, env = "EDGENODE_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args)]
struct RunArgs {
    /// Log in first when no token is configured
    #[arg(long, env = "EDGENODE_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "EDGENODE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long)]
    skip_register: bool,

    /// Seconds to wait for running tasks on shutdown
    #[arg(long, default_value_t = 30)]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Login(creds) => {
            let runtime = http_runtime(config)?;
            let token = runtime.login(&creds.email, &creds.password).await?;
            println!("{token}");
            Ok(())
        }
        Commands::Register => {
            let runtime = http_runtime(config)?;
            runtime.register_node().await?;
            println!("registered {}", runtime.node_id());
            Ok(())
        }
        Commands::Demo { tasks } => demo(config, tasks).await,
        Commands::Config => {
            let mut shown = config;
            if shown.api.token.is_some() {
                shown.api.token = Some("<redacted>".to_string());
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<EdgeConfig> {
    let mut config = EdgeConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let o = &cli.overrides;
    if let Some(url) = &o.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(token) = &o.token {
        config.api.token = Some(token.clone());
    }
    if let Some(node_id) = &o.node_id {
        config.node.node_id = Some(node_id.clone());
    }
    if let Some(n) = o.max_concurrency {
        config.pool.max_concurrency = n;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn http_runtime(config: EdgeConfig) -> Result<EdgeRuntime> {
    Ok(EdgeBuilder::new().config(config).with_builtin()?.build()?)
}

async fn run(config: EdgeConfig, args: RunArgs) -> Result<()> {
    let has_token = config.api.token.is_some();
    let runtime = http_runtime(config)?;

    if !has_token {
        match (&args.email, &args.password) {
            (Some(email), Some(password)) => {
                runtime.login(email, password).await.context("login failed")?;
            }
            _ => warn!("no token configured and no credentials given; requests may be rejected"),
        }
    }

    if !args.skip_register {
        if let Err(err) = runtime.register_node().await {
            warn!(error = %err, "node registration failed, continuing");
        }
    }

    runtime.start();
    info!(node_id = %runtime.node_id(), "running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    info!("shutting down");
    if !runtime.shutdown(Duration::from_secs(args.grace_secs)).await {
        warn!("some tasks were still running at exit");
    }
    print_statistics(&runtime).await
}

async fn demo(mut config: EdgeConfig, count: usize) -> Result<()> {
    if count == 0 {
        bail!("--tasks must be at least 1");
    }
    // the in-process coordinator answers instantly; no reason to idle
    config.automation.pull_interval_ms = config.automation.pull_interval_ms.min(500);

    let coordinator = Arc::new(InMemoryCoordinator::with_tasks(sample_tasks(count)));
    let runtime = EdgeBuilder::new()
        .config(config)
        .coordinator(coordinator.clone())
        .with_builtin()?
        .build()?;

    runtime.register_node().await?;
    runtime.start();

    while coordinator.results().len() < count {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    runtime.shutdown(Duration::from_secs(5)).await;
    print_statistics(&runtime).await
}

fn sample_tasks(count: usize) -> Vec<Task> {
    (0..count)
        .map(|i| {
            let (task_type, payload) = match i % 3 {
                0 => ("compute", json!({ "complexity": 200_000 })),
                1 => ("hash_calculation", json!({ "iterations": 2_000 })),
                _ => ("data_analysis", json!({})),
            };
            let priority = match i % 4 {
                0 => Priority::High,
                3 => Priority::Low,
                _ => Priority::Medium,
            };
            Task::new(TaskId::generate(), task_type, payload)
                .with_priority(priority)
                .with_hints((i % 5 + 1) as f64, 0.1 * i as f64)
        })
        .collect()
}

async fn print_statistics(runtime: &EdgeRuntime) -> Result<()> {
    let stats = runtime.statistics().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
