mod config;
mod console;
mod menu;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use libregtree::{ChannelOptions, Session};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use console::Console;
use menu::SessionEnd;

/// Regtree - learn, print and query regression trees on a remote tree service
#[derive(Parser)]
#[command(name = "regtree", version, about)]
struct Cli {
    /// Server host (falls back to the config file)
    host: Option<String>,

    /// Server port (falls back to the config file)
    port: Option<u16>,

    /// Read settings from this file instead of ~/.config/regtree/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait for each server reply
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Abort predictions deeper than this many questions
    #[arg(long)]
    max_turns: Option<usize>,

    /// Log more (-v debug, -vv trace); overrides RUST_LOG for regtree itself
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Error: {e}");
        return ExitCode::from(1);
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    debug!(?config, "Config loaded");

    let (Some(host), Some(port)) = (cli.host.or(config.host.clone()), cli.port.or(config.port))
    else {
        eprintln!("Error: a server host and port are required");
        return ExitCode::from(2);
    };

    let options = ChannelOptions {
        connect_timeout: config.connect_timeout(),
        read_timeout: cli
            .timeout
            .map(std::time::Duration::from_secs)
            .or(config.read_timeout()),
        ..Default::default()
    };
    let max_turns = cli.max_turns.or(config.max_turns);

    let mut session = match Session::connect(&host, port, &options, max_turns) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Connection failed: {e}");
            return ExitCode::from(1);
        }
    };
    println!("Connected to {host}:{port}");

    let mut console = Console::stdio();
    let result = menu::run(&mut session, &mut console);

    if let Err(e) = session.close() {
        warn!("Closing the connection failed: {e}");
    }

    match result {
        Ok(SessionEnd::Finished | SessionEnd::InputClosed) => ExitCode::SUCCESS,
        Ok(SessionEnd::DataError) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

const LOG_TARGETS: [&str; 2] = ["regtree", "libregtree"];

fn init_tracing(verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = filter_directives(verbose, rust_log.as_deref());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(directives)?)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Build the log filter.
///
/// `RUST_LOG` is used untouched when no `-v` was given. Otherwise our own
/// targets get the level picked by `-v` and every other directive is kept.
fn filter_directives(verbose: u8, rust_log: Option<&str>) -> String {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let ours = LOG_TARGETS.map(|target| format!("{target}={level}"));

    let Some(env) = rust_log.map(str::trim).filter(|env| !env.is_empty()) else {
        return ours.join(",");
    };
    if verbose == 0 {
        return env.to_string();
    }

    let mut directives: Vec<&str> = env
        .split(',')
        .map(str::trim)
        .filter(|d| {
            let target = d.split(['=', '[', ':']).next().unwrap_or_default();
            !d.is_empty() && !LOG_TARGETS.iter().any(|t| *t == target)
        })
        .collect();
    directives.extend(ours.iter().map(String::as_str));
    directives.join(",")
}
