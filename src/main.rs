use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use confab::config::EngineConfig;
use confab::engine::ChatEngine;
use confab::mcp::{ConnectionTimeouts, StdioTransport, ToolCatalog, ToolProviderConnection};
use confab::provider::OpenAiCompatibleClient;
use confab::session::MemoryStore;

/// Tool-augmented conversation engine.
#[derive(Parser, Debug)]
#[command(name = "confab", version, about)]
struct Cli {
    /// Path to the config file (defaults to the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured model.
    #[arg(long)]
    model: Option<String>,

    /// Run a single report prompt instead of the interactive loop.
    #[arg(long)]
    report: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> confab::Result<()> {
    let mut config = load_config(cli.config.as_deref())?.apply_env();
    if let Some(model) = cli.model {
        config.model = model;
    }
    config.validate()?;

    let timeouts = ConnectionTimeouts {
        handshake: std::time::Duration::from_secs(config.limits.handshake_timeout_secs),
        discovery: std::time::Duration::from_secs(config.limits.discovery_timeout_secs),
        teardown: std::time::Duration::from_secs(config.limits.teardown_timeout_secs),
    };
    let mut catalog = ToolCatalog::new();
    for spec in &config.providers {
        let transport = StdioTransport::new(&spec.command, spec.args.clone());
        let connection = ToolProviderConnection::new(&spec.id, Box::new(transport), timeouts);
        catalog.register(Box::new(connection)).await;
    }
    info!(tools = catalog.tool_names().len(), "catalog ready");

    let model = Arc::new(
        OpenAiCompatibleClient::new(&config.base_url, config.api_key.clone())
            .with_timeout(std::time::Duration::from_secs(config.limits.model_timeout_secs)),
    );
    let mut engine = ChatEngine::new(config, model, catalog, Arc::new(MemoryStore::new()));

    let result = match cli.report {
        Some(prompt) => run_report(&engine, &prompt).await,
        None => repl(&engine).await,
    };
    engine.shutdown().await;
    result
}

fn load_config(path: Option<&std::path::Path>) -> confab::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => match EngineConfig::default_path() {
            Some(path) if path.exists() => EngineConfig::from_file(&path),
            _ => Ok(EngineConfig::default()),
        },
    }
}

async fn run_report(engine: &ChatEngine, prompt: &str) -> confab::Result<()> {
    let report = engine.generate_report("local", prompt).await?;
    println!("{report}");
    Ok(())
}

async fn repl(engine: &ChatEngine) -> confab::Result<()> {
    let user = "local";
    println!("confab {} — /reset, /usage, /exit", env!("CARGO_PKG_VERSION"));
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" | "/quit" => break,
            "/reset" => {
                engine.reset(user).await?;
                println!("session cleared");
            }
            "/usage" => println!("{}", engine.usage_report(user).await?),
            _ => match engine.process_message(user, line).await {
                Ok(answer) => println!("{answer}"),
                Err(e) => {
                    error!(error = %e, "turn failed");
                    println!("Sorry, something went wrong handling that message.");
                }
            },
        }
    }
    Ok(())
}
