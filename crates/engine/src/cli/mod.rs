pub mod chat;
pub mod config;
pub mod run;

use clap::{Parser, Subcommand};

use pv_domain::config::Config;

/// Palaver: templated, tool-using chat turns with provenance.
#[derive(Debug, Parser)]
#[command(name = "palaver", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a single turn and print the response.
    Run {
        /// The message to send.
        message: String,
        /// Conversation to continue (a new one is started when omitted).
        #[arg(long)]
        session: Option<String>,
        /// Model override (e.g. "echo/echo-1").
        #[arg(long)]
        model: Option<String>,
        /// Output the full turn outcome as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Interactive conversation on stdin (default when no subcommand is given).
    Chat {
        /// Conversation to continue.
        #[arg(long)]
        session: Option<String>,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `PV_CONFIG` (or `config.toml`
/// by default).  A missing file yields the defaults.  Returns the parsed
/// [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("PV_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

/// Collaborators available to the command-line binary: the local echo
/// provider only.  Embedders supply their own through
/// [`crate::bootstrap::Collaborators`].
pub(crate) fn local_collaborators() -> crate::bootstrap::Collaborators {
    crate::bootstrap::Collaborators {
        providers: vec![std::sync::Arc::new(pv_providers::EchoProvider::new("echo"))],
        ..Default::default()
    }
}
