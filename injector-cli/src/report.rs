//! `injector report`: encode a telemetry event offline.
//!
//! Prints the topic the station would publish on, the encoded size and the
//! MessagePack bytes. Hash arguments are files; their SHA-256 goes into the
//! event.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use injector_proto::report::{self, SCRATCH_LEN};
use injector_proto::topic::DEFAULT_REPORT_BASE;
use injector_proto::{
    EraseEvent, InitEvent, ProgramEvent, RepairEvent, ReportEvent, SerialNumber, Sha256Digest,
    StateEvent, TopicBuilder,
};
use sha2::{Digest, Sha256};

/// Arguments for `injector report`.
#[derive(clap::Args)]
pub struct ReportArgs {
    #[command(subcommand)]
    event: EventCmd,

    /// Station hardware address (defaults to $INJECTOR_ADDR).
    #[arg(long, global = true)]
    hw_addr: Option<String>,

    /// Report topic base.
    #[arg(long, global = true, default_value = DEFAULT_REPORT_BASE)]
    base: String,

    /// Output format.
    #[arg(long, global = true, default_value = "hex")]
    format: Format,
}

/// Output format for encoded reports.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Format {
    /// Hex dump of the encoded bytes.
    #[default]
    Hex,
    /// JSON object with topic, size and bytes.
    Json,
}

#[derive(clap::Subcommand)]
enum EventCmd {
    /// Product detected.
    Init {
        /// Target serial number (hex).
        #[arg(long, default_value = "")]
        sn: String,
        /// Firmware image to hash.
        #[arg(long)]
        fw: PathBuf,
        /// Flash algorithm ELF to hash.
        #[arg(long)]
        algo: PathBuf,
    },
    /// Host state or error.
    State {
        /// Message text.
        msg: String,
        /// Error code, 0 for OK.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        code: i32,
        /// Target serial number (hex).
        #[arg(long, default_value = "")]
        sn: String,
    },
    /// Programming finished.
    Prog {
        /// Target serial number (hex).
        #[arg(long, default_value = "")]
        sn: String,
        /// Firmware image to hash.
        #[arg(long)]
        fw: PathBuf,
        /// Flash algorithm ELF to hash.
        #[arg(long)]
        algo: PathBuf,
        /// First programmed address (decimal or 0x-prefixed).
        #[arg(long, value_parser = parse_u32)]
        addr: u32,
        /// Bytes programmed.
        #[arg(long)]
        len: u32,
    },
    /// Erase finished.
    Erase {
        /// Target serial number (hex).
        #[arg(long, default_value = "")]
        sn: String,
        /// First erased address (decimal or 0x-prefixed).
        #[arg(long, value_parser = parse_u32)]
        addr: u32,
        /// Bytes erased.
        #[arg(long)]
        len: u32,
    },
    /// Product routed to repair.
    Repair {
        /// Target serial number (hex).
        #[arg(long, default_value = "")]
        sn: String,
        /// Free-form comment.
        #[arg(long)]
        comment: Option<String>,
    },
    /// Product routed to disposal.
    Dispose {
        /// Target serial number (hex).
        #[arg(long, default_value = "")]
        sn: String,
        /// Free-form comment.
        #[arg(long)]
        comment: Option<String>,
    },
}

impl ReportArgs {
    pub fn run(self) -> Result<()> {
        let addr = crate::resolve_addr(self.hw_addr.as_deref())?;
        let event = self.event.build()?;
        let topic = TopicBuilder::new(self.base, addr).topic(event.topic().as_str());

        let size = report::serialized_size(&event)?;
        let bytes = report::to_vec(&event)?;
        tracing::debug!(size, heap = size > SCRATCH_LEN, "encoded report");

        match self.format {
            Format::Hex => {
                println!("topic: {topic}");
                println!("size:  {size}");
                println!("{}", hex(&bytes));
            }
            Format::Json => {
                let out = serde_json::json!({
                    "topic": topic,
                    "size": size,
                    "hex": hex(&bytes),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
        }
        Ok(())
    }
}

impl EventCmd {
    fn build(self) -> Result<ReportEvent> {
        Ok(match self {
            Self::Init { sn, fw, algo } => ReportEvent::Init(InitEvent {
                flash_algo_hash: hash_file(&algo)?,
                firmware_hash: hash_file(&fw)?,
                target_sn: serial(&sn)?,
            }),
            Self::State { msg, code, sn } => ReportEvent::State(StateEvent {
                message: msg,
                code,
                target_sn: serial(&sn)?,
            }),
            Self::Prog {
                sn,
                fw,
                algo,
                addr,
                len,
            } => ReportEvent::Program(ProgramEvent {
                flash_algo_hash: hash_file(&algo)?,
                firmware_hash: hash_file(&fw)?,
                addr,
                len,
                target_sn: serial(&sn)?,
            }),
            Self::Erase { sn, addr, len } => ReportEvent::Erase(EraseEvent {
                addr,
                len,
                target_sn: serial(&sn)?,
            }),
            Self::Repair { sn, comment } => ReportEvent::Repair(repair(&sn, comment)?),
            Self::Dispose { sn, comment } => ReportEvent::Dispose(repair(&sn, comment)?),
        })
    }
}

fn repair(sn: &str, comment: Option<String>) -> Result<RepairEvent> {
    Ok(RepairEvent {
        target_sn: serial(sn)?,
        comment: comment.map(String::into_bytes),
    })
}

fn serial(hex: &str) -> Result<SerialNumber> {
    let bytes = crate::parse_hex(hex)?;
    SerialNumber::new(&bytes).context("invalid serial number")
}

/// SHA-256 of a file's contents.
fn hash_file(path: &Path) -> Result<Sha256Digest> {
    let data = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let digest = Sha256::digest(&data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_slice());
    Ok(Sha256Digest(out))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {s}: {e}"))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
