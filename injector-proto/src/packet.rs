//! Decoded inbound command with an inline-or-heap payload.

use crate::{Error, Result};

/// Payloads up to this many bytes are stored inline in the packet.
pub const INLINE_CAPACITY: usize = 128;

/// Kind of command carried by a [`CommandPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandKind {
    /// Firmware metadata.
    MetaFirmware,
    /// Flash-algorithm metadata.
    MetaAlgo,
    /// Firmware binary chunk.
    BinFirmware,
    /// Flash-algorithm binary chunk.
    BinAlgo,
    /// State-change command.
    SetState,
    /// Memory-read command.
    ReadMem,
}

/// Command payload storage.
///
/// Small payloads are copied into a fixed buffer so the hot path never
/// touches the allocator; larger ones own a heap blob of exactly the
/// payload length, released when the packet is dropped.
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    /// Copied into the packet.
    Inline {
        /// Number of valid bytes in `buf`.
        len: usize,
        /// Backing storage.
        buf: [u8; INLINE_CAPACITY],
    },
    /// Owned heap blob.
    Blob(Vec<u8>),
}

impl Payload {
    /// Empty inline payload.
    pub const EMPTY: Self = Self::Inline {
        len: 0,
        buf: [0; INLINE_CAPACITY],
    };

    /// Payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Inline { len, buf } => &buf[..*len],
            Self::Blob(v) => v,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Inline { len, .. } => *len,
            Self::Blob(v) => v.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline { len, .. } => f.debug_struct("Inline").field("len", len).finish(),
            Self::Blob(v) => f.debug_struct("Blob").field("len", &v.len()).finish(),
        }
    }
}

/// One decoded inbound command.
///
/// Ownership moves with the packet: whoever dequeues it is responsible for
/// it, and the heap blob (if any) is freed exactly once on drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    /// Command kind.
    kind: CommandKind,
    /// Command body.
    payload: Payload,
}

impl CommandPacket {
    /// Builds a packet by copying `bytes`.
    ///
    /// Returns [`Error::ResourceExhausted`] if the heap blob for a payload
    /// larger than [`INLINE_CAPACITY`] cannot be allocated; no packet exists
    /// in that case.
    pub fn new(kind: CommandKind, bytes: &[u8]) -> Result<Self> {
        let payload = if bytes.len() > INLINE_CAPACITY {
            let mut blob = Vec::new();
            blob.try_reserve_exact(bytes.len()).map_err(|e| {
                Error::ResourceExhausted(format!("command blob of {} bytes: {e}", bytes.len()))
            })?;
            blob.extend_from_slice(bytes);
            Payload::Blob(blob)
        } else {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..bytes.len()].copy_from_slice(bytes);
            Payload::Inline {
                len: bytes.len(),
                buf,
            }
        };

        Ok(Self { kind, payload })
    }

    /// Command kind.
    pub const fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Payload storage.
    pub const fn storage(&self) -> &Payload {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the packet carries no payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether the payload is stored inline.
    pub const fn is_inline(&self) -> bool {
        matches!(self.payload, Payload::Inline { .. })
    }

    /// Consumes the packet and returns its payload as an owned vector.
    ///
    /// A heap blob is handed over without copying.
    pub fn into_vec(self) -> Vec<u8> {
        match self.payload {
            Payload::Blob(v) => v,
            Payload::Inline { len, buf } => buf[..len].to_vec(),
        }
    }
}
