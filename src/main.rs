use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mcprun::RunError;
use mcprun::config::Config;
use mcprun::domain::{RunResult, TerminalReason};
use mcprun::llm::{HttpLlmClient, LlmClient, ProviderKind};
use mcprun::server::scope::handles_for;
use mcprun::session;
use mcprun::tools::ToolCatalog;

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mcprun")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("mcprun.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Returns false when the command should exit non-zero
async fn run_application(cli: &Cli, config: Config) -> Result<bool> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            task,
            max_turns,
            provider,
            model,
            workspace,
            instructions,
        } => {
            let mut config = config;
            if let Some(provider) = provider {
                config.model.provider = ProviderKind::from_str(provider)
                    .ok_or_else(|| eyre!("Unsupported provider '{}'", provider))?;
            }
            if let Some(model) = model {
                config.model.model = Some(model.clone());
            }
            if let Some(max_turns) = max_turns {
                config.runner.max_turns = *max_turns;
            }
            if let Some(workspace) = workspace {
                config.workspace = workspace.clone();
            }
            if let Some(path) = instructions {
                config.instructions = None;
                config.instructions_file = Some(path.clone());
            }
            handle_run_command(task, config, cli.is_verbose()).await
        }
        Commands::Tools => handle_tools_command(config).await,
        Commands::Check => Ok(handle_check_command(&config)),
    }
}

async fn handle_run_command(task: &str, mut config: Config, verbose: bool) -> Result<bool> {
    config.validate()?;
    if !handle_check_command(&config) {
        return Ok(false);
    }

    let workspace = config.ensure_workspace()?;
    let instructions = config.load_instructions()?;
    let llm = Arc::new(HttpLlmClient::from_config(&config.model)?);

    println!(
        "{} {} ({})",
        "Model:".cyan(),
        llm.model(),
        config.model.provider
    );
    println!("{} {}", "Workspace:".cyan(), workspace.display());
    println!("{} {}", "Task:".cyan(), task);

    let cancel = cancel_on_interrupt();
    let result = session::run_task(
        llm.clone(),
        handles_for(config.server_specs()),
        &config,
        &instructions,
        task,
        &cancel,
        print_catalog,
    )
    .await?;

    print_result(&result, verbose);
    Ok(!result.is_failed())
}

async fn handle_tools_command(mut config: Config) -> Result<bool> {
    config.validate()?;
    config.ensure_workspace()?;

    let cancel = cancel_on_interrupt();
    let tools = match session::list_tools(handles_for(config.server_specs()), &cancel).await {
        Ok(tools) => tools,
        Err(RunError::Cancelled) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    for (server, names) in &tools {
        println!("{} {} ({} tools)", "Server:".cyan(), server.bold(), names.len());
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(true)
}

/// Token cancelled on Ctrl-C so servers are shut down before exit
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, shutting down tool servers...".yellow());
            on_interrupt.cancel();
        }
    });
    cancel
}

fn handle_check_command(config: &Config) -> bool {
    let mut ok = true;
    for server in &config.servers {
        match server.resolve_command() {
            Some(path) => println!("{} {}: {}", "✓".green(), server.name, path.display()),
            None => {
                ok = false;
                println!(
                    "{} {}: '{}' not found on PATH",
                    "✗".red(),
                    server.name,
                    server.command
                );
            }
        }
    }
    if !ok {
        println!("{}", "Install the missing commands (Node.js provides npx) and retry.".yellow());
    }
    ok
}

fn print_catalog(catalog: &ToolCatalog) {
    for (server, names) in catalog.by_server() {
        println!("{} {} ({} tools)", "Server:".cyan(), server.bold(), names.len());
        println!("  {}", names.join(", "));
    }
}

fn print_result(result: &RunResult, verbose: bool) {
    match result.reason {
        TerminalReason::Completed => {
            println!("\n{}", "Final answer:".green().bold());
            println!("{}", result.final_output.as_deref().unwrap_or_default());
        }
        TerminalReason::TurnLimitExceeded => {
            println!("\n{}", "No final answer within the turn limit".yellow());
        }
        TerminalReason::Failed => {
            println!(
                "\n{} {}",
                "Run failed:".red().bold(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    println!(
        "{} {} after {} turns, {} tool calls, {} tokens",
        "Finished:".cyan(),
        result.reason,
        result.turns,
        result.transcript.tool_call_count(),
        result.usage.total()
    );

    if verbose {
        for turn in result.transcript.turns() {
            println!("{} {:?}: {}", "·".dimmed(), turn.role, turn.content);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    let ok = run_application(&cli, config).await.context("Application failed")?;
    if !ok {
        std::process::exit(1);
    }

    Ok(())
}
