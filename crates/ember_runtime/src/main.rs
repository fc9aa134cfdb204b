//! Ember Server Runtime
//!
//! Minimal host binary: loads settings and the operator's script, then feeds console
//! input to the scripting layer as server events.

mod console;
mod host;

use anyhow::{Context, Result};
use ember_services::Settings;
use host::{Flow, Host};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_SETTINGS: &str = "data/ember.json";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS));

    info!("Ember v{}", env!("CARGO_PKG_VERSION"));
    let settings = Settings::load_or_default(&settings_path)
        .with_context(|| format!("failed to load settings from {}", settings_path.display()))?;

    let host = Host::new(&settings.scripting)?;
    host.start();
    info!("Server running; {}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read console input")? else {
                    info!("Console closed, shutting down...");
                    break;
                };
                if host.handle(console::parse_line(&line)) == Flow::Quit {
                    info!("Shutting down...");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    host.stop();
    Ok(())
}
