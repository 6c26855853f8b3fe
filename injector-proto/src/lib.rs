//! Wire vocabulary shared by the flasher station and its controller.
//!
//! Outbound telemetry is a MessagePack map per [`ReportEvent`], published
//! under `<report-base>/<hw-addr>/<subtopic>`. Inbound commands arrive under
//! `<cmd-base>/<hw-addr>/<subtopic>` and are decoded into a
//! [`CommandPacket`] whose payload lives inline (up to
//! [`INLINE_CAPACITY`] bytes) or in an owned heap blob.

mod addr;
mod error;
mod packet;
pub mod report;
mod state;
pub mod topic;

pub use addr::HardwareAddr;
pub use error::{Error, Result};
pub use packet::{CommandKind, CommandPacket, INLINE_CAPACITY, Payload};
pub use report::{
    EraseEvent, InitEvent, ProgramEvent, RepairEvent, ReportEvent, SelfTestEvent, SerialNumber,
    Sha256Digest, StateEvent,
};
pub use state::StateCode;
pub use topic::{CommandTopic, ReportTopic, TopicBuilder};
