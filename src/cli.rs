use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{Config, ProviderKind};

#[derive(Parser)]
#[command(name = "chisel", about = "Rewrite the selected text with a language model")]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/chisel/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the daemon: listen for the hotkey (or SIGUSR1) and rewrite the selection
    Run(Overrides),

    /// Rewrite the current selection once and exit
    Once(Overrides),

    /// Send a test request to the configured provider
    Check(Overrides),

    /// Print the default configuration file
    Config,
}

/// Per-invocation overrides of config file values.
#[derive(Args, Default)]
pub struct Overrides {
    /// Hotkey binding, e.g. "Ctrl+Shift+R" or "<ctrl>+<shift>+r"
    #[arg(long)]
    pub hotkey: Option<String>,

    /// Transformation provider
    #[arg(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// Model id
    #[arg(long)]
    pub model: Option<String>,
}

impl Overrides {
    /// Switching provider without naming a model selects that
    /// provider's default model.
    pub fn apply(self, config: &mut Config) {
        if let Some(hotkey) = self.hotkey {
            config.hotkey.binding = hotkey;
        }
        if let Some(kind) = self.provider
            && kind != config.provider.kind
        {
            config.provider.kind = kind;
            config.provider.model = None;
            config.provider.base_url = None;
        }
        if let Some(model) = self.model {
            config.provider.model = Some(model);
        }
    }
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run(_) => "run",
            Command::Once(_) => "once",
            Command::Check(_) => "check",
            Command::Config => "config",
        }
    }
}
