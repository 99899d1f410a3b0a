use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use toolrelay_engine::cli::{Cli, Command, Runner};
use toolrelay_engine::config;
use toolrelay_engine::llm::LlmClient;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    // Operand problems are usage errors, reported before any network traffic.
    if let Command::Add(args) = &cli.command {
        if let Err(e) = args.validated() {
            Cli::command()
                .error(ErrorKind::ValueValidation, e.to_string())
                .exit();
        }
    }

    let config_dir = std::env::var("TOOLRELAY_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let engine_config = match config::load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration, refusing to start");
            std::process::exit(1);
        }
    };

    let llm = match LlmClient::new(engine_config.system.llm.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build LLM client");
            std::process::exit(1);
        }
    };

    let runner = Runner::new(engine_config, llm);
    match runner.execute(&cli.command).await {
        Ok(text) => println!("{}", text),
        Err(e) => {
            tracing::error!(error = %e, tool = e.tool_name().unwrap_or("-"), "Turn failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
