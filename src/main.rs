//!
//! portal server binary
//! --------------------
//! Starts the profile HTTP endpoint. Settings come from `PORTAL_*` environment
//! variables; `--http-port` and `--data-url` override them.

use std::env;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use portal::config::{parse_port, PortalConfig};
use portal::data::DataClient;

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let i = args.iter().position(|a| a == flag)?;
    args.get(i + 1).map(String::as_str)
}

fn print_usage() {
    println!(
        "portal\n\nUSAGE:\n  portal [--http-port N] [--data-url URL]\n\nOPTIONS:\n  --http-port N     HTTP port (env: PORTAL_HTTP_PORT, default 8787)\n  --data-url URL    data service base URL, or `memory` for the in-process store\n                    (env: PORTAL_DATA_URL or SUPABASE_URL)\n\nENVIRONMENT:\n  PORTAL_API_KEY    public API key of the data service (or SUPABASE_ANON_KEY)\n  RUST_LOG          log filter (default info)\n"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    // CLI arguments override environment
    if let Some(url) = arg_value(&args, "--data-url") {
        env::set_var("PORTAL_DATA_URL", url);
    }
    let mut config = PortalConfig::from_env().context("reading portal configuration")?;
    if let Some(raw) = arg_value(&args, "--http-port") {
        config.http_port = parse_port("--http-port", raw)?;
    }
    config.log_summary();

    let client = DataClient::connect(&config.data).context("connecting to the data service")?;
    info!(target: "startup", backend = client.backend().name(), "data client ready");
    portal::server::run_with_port(config.http_port, client).await
}
