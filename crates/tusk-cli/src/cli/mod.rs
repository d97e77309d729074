//! CLI for the tusk resumable upload client.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tusk_core::auth::TokenStore;
use tusk_core::config::{self, TuskConfig};
use tusk_core::upload::Uploader;

use commands::{run_probe, run_settings, run_upload};

/// Top-level CLI for tusk.
#[derive(Debug, Parser)]
#[command(name = "tusk")]
#[command(about = "tusk: resumable chunked uploads over tus", long_about = None)]
pub struct Cli {
    /// Public tus endpoint (overrides `endpoint` in config.toml).
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Server settings URL (overrides `settings_url` in config.toml).
    #[arg(long, global = true, value_name = "URL")]
    pub settings_url: Option<String>,

    /// Auth token sent as `X-Auth`.
    #[arg(long, global = true, env = "TUSK_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Read configuration from this file instead of the XDG config dir.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload a file in chunks, retrying failed requests.
    Upload {
        /// Local file to upload.
        file: PathBuf,

        /// Target path on the server (percent-encoded like a URL path).
        destination: String,

        /// Replace an existing file at the destination.
        #[arg(long)]
        overwrite: bool,

        /// Upload even if the server would not pick the resumable path for this file.
        #[arg(long)]
        force: bool,
    },

    /// Report whether a file would be uploaded through the resumable path.
    Probe {
        /// Local file to check.
        file: PathBuf,
    },

    /// Fetch and print the server's upload settings.
    Settings,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<TuskConfig> {
        let mut cfg = match &self.config {
            Some(path) => config::load_from(path)?,
            None => config::load_or_init()?,
        };
        if let Some(endpoint) = &self.endpoint {
            cfg.endpoint = endpoint.clone();
        }
        if let Some(url) = &self.settings_url {
            cfg.settings_url = url.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn token_store(&self) -> TokenStore {
        match &self.token {
            Some(t) if !t.is_empty() => TokenStore::with_token(t.clone()),
            _ => TokenStore::new(),
        }
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = cli.resolve_config()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let uploader = Uploader::from_config(&cfg, cli.token_store());

        match cli.command {
            CliCommand::Upload {
                file,
                destination,
                overwrite,
                force,
            } => run_upload(&uploader, &file, &destination, overwrite, force).await?,
            CliCommand::Probe { file } => run_probe(&uploader, &file).await?,
            CliCommand::Settings => run_settings(&uploader).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
