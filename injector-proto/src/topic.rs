//! Topic taxonomy: `<base>/<hw-addr>/<subtopic>`.
//!
//! Two bases exist. Reports flow out under [`DEFAULT_REPORT_BASE`],
//! commands flow in under [`DEFAULT_CMD_BASE`]. Both subtopic sets are
//! closed: anything outside [`ReportTopic`] / [`CommandTopic`] is rejected.

use std::fmt;

use crate::{CommandKind, Error, HardwareAddr, Result};

/// Base of every outbound report topic.
pub const DEFAULT_REPORT_BASE: &str = "/soulinjector/v1/report";

/// Base of every inbound command topic.
pub const DEFAULT_CMD_BASE: &str = "/soulinjector/v1/cmd";

/// Longest subtopic accepted when publishing.
pub const MAX_SUBTOPIC_LEN: usize = 16;

/// Outbound report subtopics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReportTopic {
    /// Product detected.
    Init,
    /// Host state / error message.
    State,
    /// Programming finished.
    Program,
    /// Internal self-test result.
    SelfTest,
    /// External test result.
    ExternTest,
    /// Erase finished.
    Erase,
    /// Product sent to repair.
    Repair,
    /// Product disposed.
    Dispose,
}

impl ReportTopic {
    /// Every report subtopic, in taxonomy order.
    pub const ALL: [Self; 8] = [
        Self::Init,
        Self::State,
        Self::Program,
        Self::SelfTest,
        Self::ExternTest,
        Self::Erase,
        Self::Repair,
        Self::Dispose,
    ];

    /// Subtopic string on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::State => "state",
            Self::Program => "prog",
            Self::SelfTest => "test/int",
            Self::ExternTest => "test/ext",
            Self::Erase => "erase",
            Self::Repair => "repair",
            Self::Dispose => "dispose",
        }
    }
}

impl fmt::Display for ReportTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound command subtopics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandTopic {
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

impl CommandTopic {
    /// Every command subtopic.
    pub const ALL: [Self; 6] = [
        Self::MetaFirmware,
        Self::MetaAlgo,
        Self::BinFirmware,
        Self::BinAlgo,
        Self::SetState,
        Self::ReadMem,
    ];

    /// Subtopics subscribed as soon as the link comes up.
    pub const SUBSCRIBE_ON_CONNECT: [Self; 4] = [
        Self::ReadMem,
        Self::SetState,
        Self::MetaFirmware,
        Self::MetaAlgo,
    ];

    /// Subtopic string on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MetaFirmware => "meta/fw",
            Self::MetaAlgo => "meta/algo",
            Self::BinFirmware => "bin/fw",
            Self::BinAlgo => "bin/algo",
            Self::SetState => "state",
            Self::ReadMem => "read_mem",
        }
    }

    /// Packet kind produced for messages on this subtopic.
    pub const fn packet_kind(self) -> CommandKind {
        match self {
            Self::MetaFirmware => CommandKind::MetaFirmware,
            Self::MetaAlgo => CommandKind::MetaAlgo,
            Self::BinFirmware => CommandKind::BinFirmware,
            Self::BinAlgo => CommandKind::BinAlgo,
            Self::SetState => CommandKind::SetState,
            Self::ReadMem => CommandKind::ReadMem,
        }
    }

    /// Whether this subtopic answers a blob request.
    pub const fn is_blob(self) -> bool {
        matches!(self, Self::BinFirmware | Self::BinAlgo)
    }

    /// Classifies an inbound topic against `cmd_base`.
    ///
    /// The segment after the address must equal a known subtopic or start
    /// with one followed by `/` (parametric blob replies such as
    /// `bin/fw/0/4096`). The address segment itself is not checked.
    pub fn classify(cmd_base: &str, topic: &str) -> Result<Self> {
        let rest = topic
            .strip_prefix(cmd_base)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| Error::NotSupported(format!("not a command topic: {topic}")))?;

        let subtopic = rest
            .split_once('/')
            .map(|(_addr, sub)| sub)
            .ok_or_else(|| Error::NotSupported(format!("missing subtopic: {topic}")))?;

        Self::ALL
            .into_iter()
            .find(|t| {
                subtopic
                    .strip_prefix(t.as_str())
                    .is_some_and(|tail| tail.is_empty() || tail.starts_with('/'))
            })
            .ok_or_else(|| Error::NotSupported(format!("unknown command subtopic: {subtopic}")))
    }
}

impl fmt::Display for CommandTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds full topic strings for one base and hardware address.
#[derive(Debug, Clone)]
pub struct TopicBuilder {
    /// Topic base, without trailing slash.
    base: String,
    /// Address rendered into every topic.
    addr: HardwareAddr,
}

impl TopicBuilder {
    /// Creates a builder for `base` (trailing `/` is stripped).
    pub fn new(base: impl Into<String>, addr: HardwareAddr) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base, addr }
    }

    /// Returns the configured base.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// `<base>/<addr>/<subtopic>`.
    pub fn topic(&self, subtopic: &str) -> String {
        format!("{}/{}/{subtopic}", self.base, self.addr)
    }

    /// `<base>/<addr>/<kind>/<offset>/<len>`: an offset-addressed chunk request.
    pub fn blob_request(&self, kind: &str, offset: u32, len: usize) -> String {
        format!("{}/{}/{kind}/{offset}/{len}", self.base, self.addr)
    }
}
