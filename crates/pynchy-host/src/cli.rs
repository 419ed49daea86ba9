//! Argument parsing and subcommand dispatch for the `pynchy` binary (§1.1
//! "a single entrypoint starts the host; a separate subcommand runs the TUI
//! client ... `pynchy extract-token slack` ... service installer").
//!
//! `main.rs` owns process setup (tracing, config load, signal handling);
//! this module only decides which of the four things the binary does.

use std::io::Write as _;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt as _;
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Parser)]
#[command(name = "pynchy", about = "Per-user agent host")]
pub struct Cli {
    /// Path to the TOML config file (falls back to PYNCHY_CONFIG, then
    /// `~/.pynchy/pynchy.toml`, per `PynchyConfig::load`).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a terminal chat client against an already-running host's HTTP API.
    Tui {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        host: String,
        /// Chat JID to read/send as; defaults to the local TUI channel's
        /// fixed JID (`pynchy_channels_tui::LOCAL_JID`).
        #[arg(long, default_value = "local")]
        chat: String,
    },
    /// One-time setup helper: extract a browser-session token for a channel
    /// that authenticates without a bot-token app (currently just Slack).
    ExtractToken {
        /// Target service, e.g. "slack".
        service: String,
        #[arg(long, default_value = "chromium")]
        browser_bin: String,
        #[arg(long)]
        display: Option<String>,
    },
    /// Install (or confirm already-installed) the host as a platform
    /// service unit so it survives reboots.
    Install {
        /// Path to this binary; defaults to the current executable's path.
        #[arg(long)]
        binary_path: Option<String>,
    },
}

/// Dispatches a parsed subcommand that does not start the host itself.
/// Returns `Ok(true)` if it handled the command and the process should
/// exit; `Ok(false)` means `command` was `None` and the caller should run
/// the host normally.
pub async fn dispatch(cli: &Cli, config_path: Option<&str>) -> Result<bool> {
    match &cli.command {
        None => Ok(false),
        Some(Command::Tui { host, chat }) => {
            run_tui_client(host, chat).await?;
            Ok(true)
        }
        Some(Command::ExtractToken { service, browser_bin, display }) => {
            let token = crate::token_extract::extract_token(service, browser_bin, display.as_deref())?;
            println!("{token}");
            Ok(true)
        }
        Some(Command::Install { binary_path }) => {
            let binary_path = binary_path
                .clone()
                .or_else(|| std::env::current_exe().ok().map(|p| p.to_string_lossy().to_string()))
                .unwrap_or_else(|| "pynchy".to_string());
            let config_path = config_path.unwrap_or("~/.pynchy/pynchy.toml");
            crate::install::install_service(&binary_path, config_path)?;
            Ok(true)
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    content: String,
}

/// A minimal blocking-free chat loop: poll `GET /api/messages`, print new
/// rows, read a line from stdin, `POST` it to `/api/send`. No rendering
/// library — the host's own HTTP API is the only thing this talks to (§6).
async fn run_tui_client(host: &str, chat: &str) -> Result<()> {
    let client = reqwest::Client::new();
    println!("connected to {host} as {chat} — type a message and press enter (Ctrl-D to quit)");

    let mut last_seen = 0usize;
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = client
                    .post(format!("{host}/api/send"))
                    .json(&serde_json::json!({ "jid": chat, "content": line }))
                    .send()
                    .await
                {
                    warn!(error = %e, "failed to send message");
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                match fetch_messages(&client, host, chat).await {
                    Ok(rows) => {
                        for row in rows.iter().skip(last_seen) {
                            println!("{}", row.content);
                        }
                        last_seen = rows.len();
                    }
                    Err(e) => warn!(error = %e, "failed to poll messages"),
                }
            }
        }
    }
    std::io::stdout().flush().ok();
    Ok(())
}

async fn fetch_messages(client: &reqwest::Client, host: &str, chat: &str) -> anyhow::Result<Vec<MessageRow>> {
    let resp = client.get(format!("{host}/api/messages")).query(&[("jid", chat)]).send().await?;
    Ok(resp.json().await?)
}
