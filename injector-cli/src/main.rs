//! CLI for the flasher station messaging core.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod fetch;
mod report;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use injector_proto::topic::{DEFAULT_CMD_BASE, DEFAULT_REPORT_BASE};
use injector_proto::{CommandTopic, HardwareAddr, ReportTopic, TopicBuilder};
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the station's hardware address.
const ADDR_ENV: &str = "INJECTOR_ADDR";

#[derive(Parser)]
#[command(name = "injector", version, about = "Flasher station messaging diagnostics")]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a blob into a file with a hard size cap.
    Fetch(fetch::FetchArgs),

    /// Encode a telemetry report and print its topic and bytes.
    Report(report::ReportArgs),

    /// Print every report and command topic for a station.
    Topics {
        /// Hardware address (defaults to $INJECTOR_ADDR).
        #[arg(long)]
        addr: Option<String>,
    },

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = cli.dispatch().await {
        eprintln!("injector: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Fetch(args) => args.run().await,
            Command::Report(args) => args.run(),
            Command::Topics { addr } => topics(addr.as_deref()),
            Command::Completion { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Self::command(),
                    "injector",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}

fn topics(addr: Option<&str>) -> Result<()> {
    let addr = resolve_addr(addr)?;
    let reports = TopicBuilder::new(DEFAULT_REPORT_BASE, addr);
    let commands = TopicBuilder::new(DEFAULT_CMD_BASE, addr);

    println!("{:<5} {:<10} TOPIC", "DIR", "SUBTOPIC");
    for t in ReportTopic::ALL {
        println!("{:<5} {:<10} {}", "out", t.as_str(), reports.topic(t.as_str()));
    }
    for t in CommandTopic::ALL {
        println!("{:<5} {:<10} {}", "in", t.as_str(), commands.topic(t.as_str()));
    }
    Ok(())
}

/// Resolves the hardware address from `--addr` or `$INJECTOR_ADDR`.
pub(crate) fn resolve_addr(arg: Option<&str>) -> Result<HardwareAddr> {
    let raw = match arg {
        Some(a) => a.to_owned(),
        None => std::env::var(ADDR_ENV)
            .with_context(|| format!("no --addr given and ${ADDR_ENV} is not set"))?,
    };
    raw.parse()
        .with_context(|| format!("invalid hardware address: {raw}"))
}

/// Reads a JSON config file, filling absent fields with defaults.
pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config: {}", path.display()))
}

/// Parses a hex string (separators `:` and `-` allowed).
pub(crate) fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| !matches!(b, b':' | b'-')).collect();
    if digits.len() % 2 != 0 || !digits.iter().all(u8::is_ascii_hexdigit) {
        anyhow::bail!("invalid hex: {s}");
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|p| u8::from_str_radix(p, 16).ok())
                .with_context(|| format!("invalid hex: {s}"))
        })
        .collect()
}
