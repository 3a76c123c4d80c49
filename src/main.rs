// Toolflow — Workflow client for external agent tool servers
// License: Apache-2.0

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use toolflow::config::{Config, TransportKind};
use toolflow::credentials::{self, CredentialKind, ToolCredentials};
use toolflow::executor::WorkflowExecutor;
use toolflow::provider::factory::create_provider;
use toolflow::runlog::RunLogger;
use toolflow::tool::ToolRegistry;
use toolflow::workflow::{parser, WorkflowCatalog};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "toolflow",
    about = "Toolflow — Run tool workflows on an external agent tool server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute an instruction (optionally naming a workflow)
    Run {
        /// Natural-language instruction
        #[arg(short, long)]
        message: String,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// List the workflows in the configured workflow file
    Workflows {
        #[arg(short, long)]
        config: Option<String>,
    },
    /// List tools advertised by the tool server
    Tools {
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show recorded runs from the run log
    Runs {
        /// Only show this run id
        #[arg(long)]
        run: Option<Uuid>,
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show which credential variables are set for the given tools
    Credentials {
        #[arg(required = true)]
        tools: Vec<String>,
    },
    /// Show version information
    Version,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    toolflow::logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { message, config } => run_cmd(&message, config.as_deref()).await,
        Commands::Workflows { config } => workflows_cmd(config.as_deref()),
        Commands::Tools { config } => tools_cmd(config.as_deref()).await,
        Commands::Runs { run, config } => runs_cmd(run, config.as_deref()),
        Commands::Credentials { tools } => {
            credentials_cmd(&tools);
            Ok(())
        }
        Commands::Version => {
            println!("toolflow v{}", toolflow::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_cmd(message: &str, config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    cfg.validate()?;

    let llm = create_provider(&cfg)?;
    let catalog = load_catalog(&cfg)?;
    let tools = connect_tools(&cfg, &catalog).await?;
    let run_log = RunLogger::new(cfg.run_log_path()?);

    let executor = WorkflowExecutor::new(tools, catalog, run_log, cfg.agent.clone());
    let outcome = executor.execute_workflow(llm.as_ref(), message).await?;

    println!("{}", outcome.output);
    eprintln!(
        "\nrun {} · {} tool call(s){}",
        outcome.run_id,
        outcome.invocations.len(),
        outcome
            .workflow
            .as_deref()
            .map(|w| format!(" · workflow '{}'", w))
            .unwrap_or_default()
    );
    if outcome.followed_workflow(executor.catalog()) == Some(false) {
        eprintln!("warning: the run did not complete every workflow step in order");
    }
    Ok(())
}

fn workflows_cmd(config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    let catalog = load_catalog(&cfg)?;
    if catalog.is_empty() {
        println!("No workflows configured (set workflows.path in the config).");
        return Ok(());
    }
    for wf in catalog.iter() {
        println!("{}", wf.name);
        if !wf.description.is_empty() {
            println!("  {}", wf.description);
        }
        for line in wf.render_steps().lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

async fn tools_cmd(config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    cfg.validate_server()?;
    let catalog = load_catalog(&cfg)?;
    let registry = connect_tools(&cfg, &catalog).await?;
    println!("{} tool(s) on {}", registry.count().await, server_label(&cfg));
    for line in registry.get_summaries().await {
        println!("{}", line);
    }
    Ok(())
}

fn runs_cmd(run: Option<Uuid>, config_path: Option<&str>) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    let logger = RunLogger::new(cfg.run_log_path()?);

    let runs: Vec<_> = match run {
        Some(id) => logger.run(id)?.into_iter().collect(),
        None => logger.runs()?,
    };
    if runs.is_empty() {
        println!("No runs recorded in {}", logger.get_path().display());
        return Ok(());
    }
    for r in runs {
        println!("{}  {}", r.run_id, r.started_at.to_rfc3339());
        for tool in &r.tools {
            println!("    {}", tool);
        }
    }
    Ok(())
}

fn credentials_cmd(tools: &[String]) {
    for tool in tools {
        let creds = ToolCredentials::resolve(tool);
        println!("{} ({}_*)", tool, creds.prefix());
        for kind in CredentialKind::ALL {
            let mark = if creds.get(kind).is_some() { "set" } else { "-" };
            println!("    {:<32} {}", credentials::env_var_name(tool, kind), mark);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn server_label(cfg: &Config) -> &str {
    match cfg.server.transport {
        TransportKind::Stdio => &cfg.server.command,
        TransportKind::Http => &cfg.server.url,
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => Config::default_path()?,
    };
    Ok(Config::load(&config_path)?)
}

fn load_catalog(cfg: &Config) -> anyhow::Result<WorkflowCatalog> {
    match cfg.workflows_path()? {
        Some(path) => Ok(parser::load_catalog(&path)?),
        None => Ok(WorkflowCatalog::new()),
    }
}

/// Connect to the tool server and register its tools. Credentials for every
/// tool named in the catalog or in `server.credential_tools` are forwarded to
/// a spawned server.
async fn connect_tools(cfg: &Config, catalog: &WorkflowCatalog) -> anyhow::Result<ToolRegistry> {
    let tool_names = catalog.tool_names();
    let env = credentials::server_env(
        tool_names
            .iter()
            .chain(&cfg.server.credential_tools)
            .map(String::as_str),
    );

    let client = toolflow::mcp::connect(&cfg.server, &env).await?;
    let registry = ToolRegistry::new();
    toolflow::mcp::register_server_tools(Arc::clone(&client), &registry).await?;
    Ok(registry)
}
