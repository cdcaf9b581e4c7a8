//! # wsreq
//!
//! Command-line entry point.
//!
//! - `wsreq serve` runs a server with a demo handler
//! - `wsreq request <url>` sends one request and prints the result as JSON

#![deny(unsafe_code)]

mod demo;
mod prompt;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use wsreq_client::{FixedAnswer, WsRequest};
use wsreq_core::logging::init_subscriber;
use wsreq_server::{RequestServer, ServerConfig};
use wsreq_settings::{WsreqSettings, load_settings, load_settings_from_path};

use crate::demo::DemoHandler;

#[derive(Parser, Debug)]
#[command(
    name = "wsreq",
    version,
    about = "Request/response over a single WebSocket, with server-to-client callbacks"
)]
struct Cli {
    /// Settings file (defaults to ~/.wsreq/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo handler until Ctrl-C.
    Serve {
        /// Host to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (0 picks a free port).
        #[arg(long)]
        port: Option<u16>,
        /// WebSocket endpoint path.
        #[arg(long)]
        path: Option<String>,
    },
    /// Send one request and print its result.
    Request {
        /// Endpoint URL, or a path resolved against `client.origin`.
        url: String,
        /// Request payload as JSON.
        #[arg(long)]
        data: Option<String>,
        /// Answer every callback with this JSON value.
        #[arg(long, conflicts_with = "interactive")]
        answer: Option<String>,
        /// Answer `confirm` and `prompt` callbacks from the terminal.
        #[arg(long)]
        interactive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command {
        Command::Serve { host, port, path } => serve(&settings, host, port, path).await,
        Command::Request {
            url,
            data,
            answer,
            interactive,
        } => request(&settings, url, data.as_deref(), answer.as_deref(), interactive).await,
    }
}

async fn serve(
    settings: &WsreqSettings,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
) -> Result<()> {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(path) = path {
        if !path.starts_with('/') {
            bail!("--path must start with '/', got {path:?}");
        }
        config.path = path;
    }
    let shutdown_timeout = config.shutdown_timeout();

    let server = RequestServer::new(config, DemoHandler);
    let (addr, handle) = server.listen().await.context("failed to bind listener")?;
    info!(%addr, path = %server.config().path, "serving demo handler");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(shutdown_timeout))
        .await;
    Ok(())
}

async fn request(
    settings: &WsreqSettings,
    url: String,
    data: Option<&str>,
    answer: Option<&str>,
    interactive: bool,
) -> Result<()> {
    let data = match data {
        Some(raw) => parse_json("--data", raw)?,
        None => Value::Null,
    };

    let mut request = WsRequest::new(url).data(data).with_settings(&settings.client);
    if let Some(raw) = answer {
        request = request.callback(FixedAnswer(parse_json("--answer", raw)?));
    } else if interactive {
        request = request.callback(prompt::interactive_callbacks());
    }

    let result = request.send().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_json(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON"))
}
