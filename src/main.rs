mod cli;
mod clipboard;
mod config;
mod daemon;
mod hotkey;
mod input;
mod notify;
mod processor;
mod provider;
mod retry;

use std::path::Path;

use clap::Parser;
use cli::{Cli, Command, Overrides};
use config::{Config, ConfigError};
use daemon::DaemonError;
use notify::Notification;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let name = cli.command.name();
    match execute(cli.command, cli.config.as_deref()).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "{name} failed");
            eprintln!("chisel {name}: {e}");
            std::process::exit(1);
        }
    }
}

async fn execute(command: Command, config_path: Option<&Path>) -> Result<i32, DaemonError> {
    match command {
        Command::Config => {
            print!("{}", config::DEFAULT_CONFIG);
            Ok(0)
        }
        Command::Run(overrides) => {
            daemon::run(load_config(config_path, overrides)?).await?;
            Ok(0)
        }
        Command::Once(overrides) => {
            match daemon::once(load_config(config_path, overrides)?).await? {
                Notification::Success { chars } => {
                    println!("replaced selection ({chars} characters)");
                    Ok(0)
                }
                Notification::Failure { kind, message } => {
                    eprintln!("chisel once: {kind}: {message}");
                    Ok(1)
                }
            }
        }
        Command::Check(overrides) => {
            let reply = daemon::check(&load_config(config_path, overrides)?).await?;
            println!("provider OK: {reply}");
            Ok(0)
        }
    }
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<Config, ConfigError> {
    let mut config = Config::load(path)?;
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}
