//!
//! portal terminal front end
//! -------------------------
//! Interactive sign-in, profile editing and event registration against the
//! configured data service. The session survives restarts through the
//! session file.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use portal::cli::{parse_command, Command, Portal};
use portal::config::PortalConfig;
use portal::data::DataClient;
use portal::identity::{FileSessionStore, SessionManager};

fn main() -> Result<()> {
    // Quiet by default so log lines do not interleave with the prompt
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = env::args().collect();
    if let Some(i) = args.iter().position(|a| a == "--data-url") {
        if let Some(url) = args.get(i + 1) {
            env::set_var("PORTAL_DATA_URL", url);
        }
    }
    let config = PortalConfig::from_env().context("reading portal configuration")?;
    let client = DataClient::connect(&config.data).context("connecting to the data service")?;
    let store = Arc::new(FileSessionStore::new(&config.session_file));

    let rt = tokio::runtime::Runtime::new()?;
    let session = SessionManager::new(client, store);
    let mut portal = Portal::new(session.clone());
    let mut rx = session.subscribe();

    rt.block_on(async {
        if let Some(me) = session.initialize().await {
            println!("restored session for {}", me.email);
        }
    });

    let mut rl = DefaultEditor::new()?;
    println!("portal. Type 'help' for commands.");
    loop {
        // Pick up session changes made by the previous command
        if rx.has_changed().unwrap_or(false) {
            let state = rx.borrow_and_update().clone();
            rt.block_on(portal.sync(&state));
        }
        let line = match rl.readline(&portal.prompt()) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());
        let cmd = match parse_command(&line) {
            Ok(cmd) => cmd,
            Err(msg) => {
                eprintln!("{}", msg);
                continue;
            }
        };
        if cmd == Command::Quit {
            break;
        }
        let out = rt.block_on(portal.execute(cmd));
        print!("{}", out);
    }
    Ok(())
}
