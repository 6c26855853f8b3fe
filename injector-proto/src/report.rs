//! Report codec: typed telemetry events encoded as MessagePack maps.
//!
//! Every event is a flat map with fixed keys. Hashes and serial numbers go
//! out as `bin`, never as text or arrays. Integers take the smallest
//! MessagePack representation that holds the value.
//!
//! Size and encode are separate calls; the caller must invoke
//! [`serialized_size`] and [`serialize`] against the same field values.

use std::io::{self, Write};

use serde::{Serialize, Serializer};

use crate::topic::ReportTopic;
use crate::{Error, Result};

/// Stack scratch size used by publishers before falling back to the heap.
pub const SCRATCH_LEN: usize = 256;

/// Longest serial number a report can carry.
pub const MAX_SN_LEN: usize = 32;

/// SHA-256 digest (flash algorithm ELF or firmware image).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Sha256Digest(pub [u8; 32]);

impl From<[u8; 32]> for Sha256Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Sha256Digest {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_bytes(&self.0)
    }
}

/// Serial number read from the target product (at most 32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SerialNumber {
    /// Number of valid bytes.
    len: u8,
    /// Backing storage.
    bytes: [u8; MAX_SN_LEN],
}

impl SerialNumber {
    /// Copies `sn`, rejecting anything longer than [`MAX_SN_LEN`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(sn: &[u8]) -> Result<Self> {
        if sn.len() > MAX_SN_LEN {
            return Err(Error::InvalidArgument(format!(
                "serial number is {} bytes, max {MAX_SN_LEN}",
                sn.len()
            )));
        }
        let mut bytes = [0u8; MAX_SN_LEN];
        bytes[..sn.len()].copy_from_slice(sn);
        Ok(Self {
            len: sn.len() as u8,
            bytes,
        })
    }

    /// Valid serial number bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Whether no serial number is known.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for SerialNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SerialNumber(")?;
        for b in self.as_bytes() {
            write!(f, "{b:02x}")?;
        }
        f.write_str(")")
    }
}

impl Serialize for SerialNumber {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_bytes(self.as_bytes())
    }
}

/// Product detected: `algo`, `fw`, `sn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitEvent {
    /// Flash algorithm ELF hash.
    #[serde(rename = "algo")]
    pub flash_algo_hash: Sha256Digest,
    /// Firmware image hash.
    #[serde(rename = "fw")]
    pub firmware_hash: Sha256Digest,
    /// Target serial number.
    #[serde(rename = "sn")]
    pub target_sn: SerialNumber,
}

/// Host state or error: `msg`, `code`, optional `sn`.
///
/// A zero `code` means OK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateEvent {
    /// Human-readable message.
    #[serde(rename = "msg")]
    pub message: String,
    /// Error code, 0 for OK.
    pub code: i32,
    /// Target serial number, omitted when empty.
    #[serde(rename = "sn", skip_serializing_if = "SerialNumber::is_empty")]
    pub target_sn: SerialNumber,
}

/// Programming finished: `algo`, `fw`, `addr`, `len`, `sn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgramEvent {
    /// Flash algorithm ELF hash.
    #[serde(rename = "algo")]
    pub flash_algo_hash: Sha256Digest,
    /// Firmware image hash.
    #[serde(rename = "fw")]
    pub firmware_hash: Sha256Digest,
    /// First programmed address.
    pub addr: u32,
    /// Number of bytes programmed.
    pub len: u32,
    /// Target serial number.
    #[serde(rename = "sn")]
    pub target_sn: SerialNumber,
}

/// Test result: `testID`, `ret`, `algo`, `sn`, optional `retPld`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfTestEvent {
    /// Test identifier.
    #[serde(rename = "testID")]
    pub test_id: u32,
    /// Test return value.
    #[serde(rename = "ret")]
    pub return_code: u32,
    /// Flash algorithm ELF hash.
    #[serde(rename = "algo")]
    pub flash_algo_hash: Sha256Digest,
    /// Target serial number.
    #[serde(rename = "sn")]
    pub target_sn: SerialNumber,
    /// Raw result payload, sent only when non-empty.
    #[serde(
        rename = "retPld",
        skip_serializing_if = "no_bytes",
        serialize_with = "opt_bin"
    )]
    pub payload: Option<Vec<u8>>,
}

/// Erase finished: `addr`, `len`, `sn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EraseEvent {
    /// First erased address.
    pub addr: u32,
    /// Number of bytes erased.
    pub len: u32,
    /// Target serial number.
    #[serde(rename = "sn")]
    pub target_sn: SerialNumber,
}

/// Product routed to repair or disposal: `sn`, optional `comment`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairEvent {
    /// Target serial number.
    #[serde(rename = "sn")]
    pub target_sn: SerialNumber,
    /// Free-form comment, sent only when non-empty.
    #[serde(skip_serializing_if = "no_bytes", serialize_with = "opt_bin")]
    pub comment: Option<Vec<u8>>,
}

/// Every outbound telemetry event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReportEvent {
    /// See [`InitEvent`].
    Init(InitEvent),
    /// See [`StateEvent`].
    State(StateEvent),
    /// See [`ProgramEvent`].
    Program(ProgramEvent),
    /// See [`SelfTestEvent`].
    SelfTest(SelfTestEvent),
    /// See [`EraseEvent`].
    Erase(EraseEvent),
    /// See [`RepairEvent`].
    Repair(RepairEvent),
    /// Disposal, same fields as repair.
    Dispose(RepairEvent),
}

impl ReportEvent {
    /// Default subtopic for this event.
    pub const fn topic(&self) -> ReportTopic {
        match self {
            Self::Init(_) => ReportTopic::Init,
            Self::State(_) => ReportTopic::State,
            Self::Program(_) => ReportTopic::Program,
            Self::SelfTest(_) => ReportTopic::SelfTest,
            Self::Erase(_) => ReportTopic::Erase,
            Self::Repair(_) => ReportTopic::Repair,
            Self::Dispose(_) => ReportTopic::Dispose,
        }
    }
}

/// Number of bytes [`serialize`] needs for `event` as it is right now.
pub fn serialized_size(event: &ReportEvent) -> Result<usize> {
    let mut counter = ByteCounter(0);
    write_event(&mut counter, event)?;
    Ok(counter.0)
}

/// Encodes `event` into `buf`, returning the number of bytes stored.
///
/// A `buf` shorter than [`serialized_size`] truncates the output; the
/// returned length is then short and the bytes are not a valid map.
pub fn serialize(event: &ReportEvent, buf: &mut [u8]) -> Result<usize> {
    let mut w = Truncating { buf, pos: 0 };
    write_event(&mut w, event)?;
    Ok(w.pos)
}

/// Encodes `event` into a freshly allocated vector.
pub fn to_vec(event: &ReportEvent) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(serialized_size(event)?);
    write_event(&mut out, event)?;
    Ok(out)
}

/// Writes the map for `event` to `w`.
fn write_event<W: Write>(w: &mut W, event: &ReportEvent) -> Result<()> {
    match event {
        ReportEvent::Init(e) => rmp_serde::encode::write_named(w, e)?,
        ReportEvent::State(e) => rmp_serde::encode::write_named(w, e)?,
        ReportEvent::Program(e) => rmp_serde::encode::write_named(w, e)?,
        ReportEvent::SelfTest(e) => rmp_serde::encode::write_named(w, e)?,
        ReportEvent::Erase(e) => rmp_serde::encode::write_named(w, e)?,
        ReportEvent::Repair(e) | ReportEvent::Dispose(e) => rmp_serde::encode::write_named(w, e)?,
    }
    Ok(())
}

/// Skip predicate for optional binary fields.
#[allow(clippy::ref_option)]
fn no_bytes(v: &Option<Vec<u8>>) -> bool {
    v.as_ref().is_none_or(Vec::is_empty)
}

/// Serializes an optional binary field as `bin`.
#[allow(clippy::ref_option)]
fn opt_bin<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_bytes(v.as_deref().unwrap_or_default())
}

/// Sink that only counts bytes.
struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0 += data.len();
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Slice writer that silently drops whatever does not fit.
struct Truncating<'a> {
    /// Destination.
    buf: &'a mut [u8],
    /// Bytes stored so far.
    pos: usize,
}

impl Write for Truncating<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = data.len().min(self.buf.len() - self.pos);
        self.buf[self.pos..self.pos + n].copy_from_slice(&data[..n]);
        self.pos += n;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
