//! `proxyglassctl`: command-line access to the management API.

use crate::events::StoredEvent;
use crate::filter::compile_strict;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;

pub mod client;
pub mod format;
pub mod sse;

pub use client::{ApiClient, CliError, EventsPage, QueryParams};

const DEFAULT_MGMT_PORT: u16 = 9090;
const TAIL_LIMIT: usize = 200;
const SEARCH_LIMIT: usize = 2000;

#[derive(Parser, Debug)]
#[command(name = "proxyglassctl")]
#[command(about = "Query and tail traffic captured by a proxyglass instance", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Management API base URL [default: http://127.0.0.1:$MGMT_PORT]
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Bearer token (falls back to PROXYGLASS_TOKEN, then TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print recent events, then follow the live stream
    Tail(TailArgs),
    /// Print events matching a filter and time window
    Search(SearchArgs),
    /// Print aggregate counts
    Stats(StatsArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Filter expression, e.g. "host=example.com status_class=5xx"
    #[arg(long)]
    pub q: Option<String>,

    /// Cursor or relative duration (30s, 5m, 1h)
    #[arg(long)]
    pub since: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Lower time bound (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<String>,

    /// Upper time bound (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Human-readable one-line output
    #[arg(long, conflicts_with = "json")]
    pub pretty: bool,

    /// JSON lines output (default)
    #[arg(long)]
    pub json: bool,
}

impl OutputArgs {
    pub fn render(&self, event: &StoredEvent) -> Result<String, CliError> {
        if self.pretty && !self.json {
            Ok(format::pretty(event))
        } else {
            Ok(serde_json::to_string(event)?)
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct TailArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long, default_value_t = TAIL_LIMIT)]
    pub limit: usize,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SearchArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub window: WindowArgs,

    #[arg(long, default_value_t = SEARCH_LIMIT)]
    pub limit: usize,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct StatsArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub window: WindowArgs,
}

/// `http://127.0.0.1:$MGMT_PORT`, falling back to the default port when the
/// variable is missing or not a port number.
pub fn default_base_url(mgmt_port: Option<&str>) -> String {
    let port = mgmt_port
        .and_then(|p| p.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_MGMT_PORT);
    format!("http://127.0.0.1:{port}")
}

/// Explicit flag, then `PROXYGLASS_TOKEN`, then `TOKEN`.
pub fn resolve_token(flag: Option<String>, proxyglass_token: Option<String>, token: Option<String>) -> Option<String> {
    [flag, proxyglass_token, token]
        .into_iter()
        .flatten()
        .find(|t| !t.is_empty())
}

impl Cli {
    pub fn client(&self) -> Result<ApiClient, CliError> {
        let url = self
            .url
            .clone()
            .unwrap_or_else(|| default_base_url(std::env::var("MGMT_PORT").ok().as_deref()));
        let token = resolve_token(
            self.token.clone(),
            std::env::var("PROXYGLASS_TOKEN").ok(),
            std::env::var("TOKEN").ok(),
        );
        ApiClient::new(&url, token)
    }
}

/// Rejects malformed filter expressions before any request is made.
fn check_filter(filter: &FilterArgs) -> Result<(), CliError> {
    if let Some(q) = filter.q.as_deref().filter(|q| !q.trim().is_empty()) {
        compile_strict(q)?;
    }
    Ok(())
}

pub async fn run<W: Write>(cli: Cli, out: &mut W) -> Result<(), CliError> {
    match &cli.command {
        Command::Tail(args) => {
            check_filter(&args.filter)?;
            tail(&cli.client()?, args, out).await
        }
        Command::Search(args) => {
            check_filter(&args.filter)?;
            search(&cli.client()?, args, out).await
        }
        Command::Stats(args) => {
            check_filter(&args.filter)?;
            stats(&cli.client()?, args, out).await
        }
    }
}

pub async fn tail<W: Write>(client: &ApiClient, args: &TailArgs, out: &mut W) -> Result<(), CliError> {
    let page = client
        .events(&QueryParams {
            q: args.filter.q.clone(),
            since: args.filter.since.clone(),
            limit: Some(args.limit),
            ..Default::default()
        })
        .await?;
    for event in &page.events {
        writeln!(out, "{}", args.output.render(event)?)?;
    }
    out.flush()?;

    let stream = client
        .stream(&QueryParams {
            q: args.filter.q.clone(),
            since: Some(page.next_cursor.to_string()),
            ..Default::default()
        })
        .await?;
    futures::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        writeln!(out, "{}", args.output.render(&event?)?)?;
        out.flush()?;
    }
    Ok(())
}

pub async fn search<W: Write>(client: &ApiClient, args: &SearchArgs, out: &mut W) -> Result<(), CliError> {
    let page = client
        .events(&QueryParams {
            q: args.filter.q.clone(),
            since: args.filter.since.clone(),
            from: args.window.from.clone(),
            to: args.window.to.clone(),
            limit: Some(args.limit),
        })
        .await?;
    for event in &page.events {
        writeln!(out, "{}", args.output.render(event)?)?;
    }
    Ok(())
}

pub async fn stats<W: Write>(client: &ApiClient, args: &StatsArgs, out: &mut W) -> Result<(), CliError> {
    let stats = client
        .stats(&QueryParams {
            q: args.filter.q.clone(),
            since: args.filter.since.clone(),
            from: args.window.from.clone(),
            to: args.window.to.clone(),
            limit: None,
        })
        .await?;
    write!(out, "{}", format::render_stats(&stats))?;
    Ok(())
}
