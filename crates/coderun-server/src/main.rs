//! coderun server binary
//!
//! Loads the service configuration, connects to the Docker daemon and serves
//! the execution API until Ctrl+C or SIGTERM.

use anyhow::Result;
use clap::{Parser, Subcommand};
use coderun_core::{
    ConfigLoader, CoderunConfig, DockerRuntime, ExecutionOrchestrator, LanguageRegistry,
};
use coderun_server::{shutdown_signal, CoderunServer, ServerConfig};
use log::LevelFilter;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "coderun - run untrusted code snippets in disposable containers")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, global = true, default_value = "coderun.yaml", help = "Configuration source: file path or URL")]
    config: String,

    #[clap(long, global = true, help = "Override the configured bind address")]
    bind_addr: Option<String>,

    #[clap(long, short, global = true, help = "Override the configured log level")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the execution server (default command)
    Run,
    /// Print the configured language table
    Languages,
    /// Validate the configuration and check that the Docker daemon answers
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).await?;

    // Initialize logger
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_level_filter = level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();
    log::info!("Configuration loaded from {}", cli.config);

    match cli.command {
        Some(Commands::Languages) => print_languages(&config),
        Some(Commands::Check) => check(&config).await,
        Some(Commands::Run) | None => run_server(config, cli.bind_addr).await,
    }
}

async fn load_config(source: &str) -> Result<CoderunConfig> {
    let config = if source.starts_with("http://") || source.starts_with("https://") {
        ConfigLoader::from_source(source).await?
    } else {
        ConfigLoader::from_file_or_default(source).await?
    };
    Ok(config)
}

async fn run_server(config: CoderunConfig, bind_addr: Option<String>) -> Result<()> {
    let mut server_config = ServerConfig::from_settings(&config.server)?;
    if let Some(addr) = bind_addr {
        server_config = server_config.with_bind_addr_str(&addr)?;
    }

    let runtime = DockerRuntime::connect(&config.sandbox)?;
    if let Err(e) = runtime.ping().await {
        log::warn!("Docker daemon is not answering yet: {}", e);
    }

    let orchestrator = ExecutionOrchestrator::from_config(&config, Arc::new(runtime));
    log::info!(
        "Serving {} language(s): {}",
        orchestrator.registry().len(),
        orchestrator.registry().languages().join(", ")
    );
    log::info!(
        "Limits: {} concurrent, {:?} timeout, {} output bytes",
        orchestrator.admission().max_concurrent(),
        orchestrator.timeout(),
        config.limits.max_output_bytes
    );

    let server = CoderunServer::with_config(orchestrator, server_config);

    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

fn print_languages(config: &CoderunConfig) -> Result<()> {
    let registry = LanguageRegistry::from_config(config.languages.as_ref());
    if registry.is_empty() {
        println!("No languages configured.");
        return Ok(());
    }

    println!("{:<14} {:<24} {:<6} ALIASES", "LANGUAGE", "IMAGE", "EXT");
    for info in registry.describe() {
        println!(
            "{:<14} {:<24} {:<6} {}",
            info.name,
            info.image,
            info.extension,
            info.aliases.join(", ")
        );
    }
    Ok(())
}

async fn check(config: &CoderunConfig) -> Result<()> {
    println!("Configuration: OK");

    let runtime = DockerRuntime::connect(&config.sandbox)?;
    runtime.ping().await?;
    println!("Docker daemon: OK");

    let workspace_base = config.workspace.resolved_base_dir();
    if !tokio::fs::try_exists(&workspace_base).await.unwrap_or(false) {
        anyhow::bail!("Workspace base directory {} does not exist", workspace_base.display());
    }
    println!("Workspace base: {}", workspace_base.display());
    Ok(())
}
