//! Messaging and bulk-transfer core of the flasher station.
//!
//! A [`Session`] owns the publish/subscribe link to the controller: it
//! subscribes to the command topics once connected, turns inbound messages
//! into [`CommandPacket`]s on a bounded queue, and publishes telemetry
//! encoded by [`injector_proto::report`]. Large binaries are fetched out of
//! band by a [`Downloader`], gated by the session's blob-request handshake.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use injector::{DownloadConfig, Downloader, Session, SessionConfig, Transport};
//! use injector_proto::HardwareAddr;
//!
//! fn run(transport: impl Transport) -> injector::Result<()> {
//!     let addr: HardwareAddr = "aa:bb:cc:dd:ee:ff".parse()?;
//!     let session = Session::new(SessionConfig::default(), addr, transport)?;
//!     session.connect()?;
//!
//!     let cmd = session.recv_cmd_packet(Duration::from_secs(30))?;
//!     println!("{:?}: {} bytes", cmd.kind(), cmd.len());
//!
//!     let config = DownloadConfig::new("http://controller.local/fw.bin");
//!     Downloader::open(config, "/tmp/fw.bin")?.request()
//! }
//! ```
//!
//! [`CommandPacket`]: injector_proto::CommandPacket

mod bits;
pub mod download;
mod error;
mod session;
mod transport;

pub use bits::EventBits;
pub use download::{
    DownloadConfig, DownloadHandle, Downloader, HttpEvent, HttpRequest, HttpTransport, Method,
    UreqTransport,
};
pub use error::{Error, Result};
pub use session::{Reporter, Session, SessionConfig, SessionState};
pub use transport::{Qos, SessionEvent, Transport, TransportError};
