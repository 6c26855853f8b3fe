//! Session controller: connection lifecycle, command routing, report
//! publishing, and the gated blob-request handshake.

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use injector_proto::report::{self, SCRATCH_LEN};
use injector_proto::topic::{DEFAULT_CMD_BASE, DEFAULT_REPORT_BASE, MAX_SUBTOPIC_LEN};
use injector_proto::{
    CommandPacket, CommandTopic, EraseEvent, HardwareAddr, InitEvent, ProgramEvent,
    RepairEvent, ReportEvent, ReportTopic, SelfTestEvent, SerialNumber, Sha256Digest,
    StateEvent, TopicBuilder,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::bits::EventBits;
use crate::transport::{Qos, SessionEvent, Transport, TransportError};
use crate::{Error, Result};

/// Session settings, fixed for the lifetime of a [`Session`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Base of every outbound report topic.
    pub report_base: String,
    /// Base of every inbound command topic.
    pub cmd_base: String,
    /// Command queue capacity.
    pub queue_capacity: usize,
    /// How long the event handler may wait for queue space, in ms.
    pub enqueue_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            report_base: DEFAULT_REPORT_BASE.to_owned(),
            cmd_base: DEFAULT_CMD_BASE.to_owned(),
            queue_capacity: 32,
            enqueue_timeout_ms: 100,
        }
    }
}

impl SessionConfig {
    /// Overrides both topic bases.
    #[must_use]
    pub fn bases(mut self, report_base: impl Into<String>, cmd_base: impl Into<String>) -> Self {
        self.report_base = report_base.into();
        self.cmd_base = cmd_base.into();
        self
    }

    /// Overrides the command queue capacity.
    #[must_use]
    pub const fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Overrides the enqueue wait.
    #[must_use]
    pub const fn enqueue_timeout_ms(mut self, ms: u64) -> Self {
        self.enqueue_timeout_ms = ms;
        self
    }
}

/// Snapshot of the session flag word.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState(u32);

impl SessionState {
    /// `disconnect` was requested; suppresses auto-reconnect.
    pub const FORCE_DISCONNECT: Self = Self(1 << 0);
    /// Link is up.
    pub const CONNECTED: Self = Self(1 << 1);
    /// Command subscriptions are in place.
    pub const SUBSCRIBED: Self = Self(1 << 2);
    /// Connected and subscribed.
    pub const REGISTERED: Self = Self(Self::CONNECTED.0 | Self::SUBSCRIBED.0);
    /// A blob reply arrived; the next `request_blob` may proceed.
    pub const BLOB_REQUEST_READY: Self = Self(1 << 3);

    /// Raw flag word.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether every flag of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SessionState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(SessionState, &str); 4] = [
            (SessionState::FORCE_DISCONNECT, "FORCE_DISCONNECT"),
            (SessionState::CONNECTED, "CONNECTED"),
            (SessionState::SUBSCRIBED, "SUBSCRIBED"),
            (SessionState::BLOB_REQUEST_READY, "BLOB_REQUEST_READY"),
        ];
        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// Publish/subscribe session for one station.
///
/// [`Session::handle_event`] runs on the transport's callback thread and
/// is the only producer into the command queue; a consumer task drains it
/// with [`Session::recv_cmd_packet`] and publishes through the `report_*`
/// family. Both sides only share the flag word and the queue.
pub struct Session<T> {
    /// Pub/sub client the session drives.
    transport: T,
    /// Station address embedded in every topic.
    addr: HardwareAddr,
    /// Topics this station publishes on.
    reports: TopicBuilder,
    /// Topics this station subscribes to.
    commands: TopicBuilder,
    /// [`SessionState`] flags.
    state: EventBits,
    /// How long the callback may block on a full queue.
    enqueue_timeout: Duration,
    /// Producer side of the command queue.
    tx: Sender<CommandPacket>,
    /// Consumer side of the command queue.
    rx: Receiver<CommandPacket>,
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.addr)
            .field("state", &SessionState(self.state.get()))
            .field("queued", &self.rx.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Creates a session bound to `addr`; nothing is sent until [`Self::connect`].
    pub fn new(config: SessionConfig, addr: HardwareAddr, transport: T) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(Error::InvalidArgument("queue capacity must be positive".into()));
        }
        let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity);
        Ok(Self {
            transport,
            addr,
            reports: TopicBuilder::new(config.report_base, addr),
            commands: TopicBuilder::new(config.cmd_base, addr),
            state: EventBits::new(),
            enqueue_timeout: Duration::from_millis(config.enqueue_timeout_ms),
            tx,
            rx,
        })
    }

    /// Hardware address baked into every topic.
    pub const fn addr(&self) -> HardwareAddr {
        self.addr
    }

    /// Underlying transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Current flag word.
    pub fn state(&self) -> SessionState {
        SessionState(self.state.get())
    }

    /// Whether the link is up and the command subscriptions are in place.
    pub fn is_registered(&self) -> bool {
        self.state().contains(SessionState::REGISTERED)
    }

    /// Starts the transport and re-enables auto-reconnect.
    pub fn connect(&self) -> Result<()> {
        self.state.clear(SessionState::FORCE_DISCONNECT.0);
        info!(addr = %self.addr, "connecting");
        self.transport.start().map_err(transport_err)
    }

    /// Closes the link on purpose; no reconnect follows.
    pub fn disconnect(&self) -> Result<()> {
        self.state.set(SessionState::FORCE_DISCONNECT.0);
        info!(addr = %self.addr, "disconnecting");
        self.transport.disconnect().map_err(transport_err)
    }

    /// Subscribes to the command subtopics at [`Qos::ExactlyOnce`].
    pub fn subscribe_on_connect(&self) -> Result<()> {
        let filters: Vec<(String, Qos)> = CommandTopic::SUBSCRIBE_ON_CONNECT
            .into_iter()
            .map(|t| (self.commands.topic(t.as_str()), Qos::ExactlyOnce))
            .collect();
        self.transport
            .subscribe_many(&filters)
            .map_err(transport_err)
    }

    /// Processes one transport event.
    ///
    /// Only inbound data and a failed subscription produce an error; every
    /// other event updates the flag word and returns `Ok`.
    pub fn handle_event(&self, event: SessionEvent<'_>) -> Result<()> {
        match event {
            SessionEvent::BeforeConnect => {
                self.state.clear(SessionState::REGISTERED.0);
                Ok(())
            }
            SessionEvent::Connected => {
                self.state.set(SessionState::CONNECTED.0);
                if let Err(e) = self.subscribe_on_connect() {
                    error!(error = %e, "failed to subscribe, disconnecting");
                    self.state.clear(SessionState::REGISTERED.0);
                    if let Err(de) = self.transport.disconnect() {
                        warn!(error = %de, "disconnect after failed subscribe");
                    }
                    return Err(e);
                }
                info!("subscribe OK");
                self.state.set(SessionState::REGISTERED.0);
                Ok(())
            }
            SessionEvent::Disconnected => {
                warn!("disconnected");
                let prev = self.state.clear(SessionState::REGISTERED.0);
                if prev & SessionState::FORCE_DISCONNECT.0 == 0 {
                    info!("eagerly reconnecting");
                    if let Err(e) = self.transport.reconnect() {
                        error!(error = %e, "reconnect failed");
                    }
                }
                Ok(())
            }
            SessionEvent::Data { topic, payload } => self.decode_cmd_msg(topic, payload),
            SessionEvent::Error => {
                debug!("transport error event");
                Ok(())
            }
            SessionEvent::Subscribed
            | SessionEvent::Unsubscribed
            | SessionEvent::Published
            | SessionEvent::Deleted => Ok(()),
        }
    }

    /// Routes one inbound message into the command queue.
    ///
    /// Unknown topics are rejected and dropped. Blob replies also raise
    /// [`SessionState::BLOB_REQUEST_READY`]. A queue that stays full for
    /// the configured enqueue timeout yields [`Error::Timeout`].
    pub fn decode_cmd_msg(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let subtopic = CommandTopic::classify(self.commands.base(), topic).map_err(|e| {
            warn!(topic, "unsupported command topic");
            e
        })?;

        if subtopic.is_blob() {
            self.state.set(SessionState::BLOB_REQUEST_READY.0);
        }

        let packet = CommandPacket::new(subtopic.packet_kind(), payload).map_err(|e| {
            error!(topic, len = payload.len(), "failed to allocate command payload");
            e
        })?;
        debug!(topic, kind = ?packet.kind(), len = packet.len(), "command queued");

        self.tx
            .send_timeout(packet, self.enqueue_timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => {
                    error!(topic, "command queue full");
                    Error::Timeout("command queue full")
                }
                SendTimeoutError::Disconnected(_) => {
                    Error::InvalidState("command queue closed".into())
                }
            })
    }

    /// Takes the oldest queued command, waiting up to `timeout`.
    pub fn recv_cmd_packet(&self, timeout: Duration) -> Result<CommandPacket> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout("no command received"),
            RecvTimeoutError::Disconnected => Error::InvalidState("command queue closed".into()),
        })
    }

    /// Asks the peer for `expected_len` bytes of `kind` starting at `offset`.
    ///
    /// Waits up to `timeout` for the previous blob reply to have arrived,
    /// consuming the ready flag, then subscribes to the parametric request
    /// topic. On timeout nothing is sent.
    pub fn request_blob(
        &self,
        kind: CommandTopic,
        offset: u32,
        expected_len: usize,
        timeout: Duration,
    ) -> Result<()> {
        let ready = SessionState::BLOB_REQUEST_READY.0;
        if self.state.wait_any(ready, true, timeout) & ready == 0 {
            warn!(kind = %kind, offset, "blob request not ready");
            return Err(Error::Timeout("blob request not ready"));
        }

        let topic = self.commands.blob_request(kind.as_str(), offset, expected_len);
        debug!(topic = %topic, "requesting blob");
        self.transport
            .subscribe(&topic, Qos::AtLeastOnce)
            .map_err(transport_err)
    }

    /// Encodes `event` and publishes it on `<report_base>/<addr>/<subtopic>`.
    ///
    /// Encodes into a stack scratch buffer when it fits, otherwise into a
    /// heap buffer sized exactly. Published at-least-once with retain set.
    pub fn report(&self, subtopic: &str, event: &ReportEvent) -> Result<()> {
        if subtopic.len() > MAX_SUBTOPIC_LEN {
            error!(len = subtopic.len(), "event subtopic too long");
            return Err(Error::InvalidArgument(format!(
                "subtopic is {} bytes, max {MAX_SUBTOPIC_LEN}",
                subtopic.len()
            )));
        }

        let topic = self.reports.topic(subtopic);
        let size = report::serialized_size(event)?;

        let mut scratch = [0u8; SCRATCH_LEN];
        let mut heap = Vec::new();
        let buf: &mut [u8] = if size <= SCRATCH_LEN {
            &mut scratch[..size]
        } else {
            warn!(size, subtopic, "report buffer on heap");
            heap.try_reserve_exact(size).map_err(|_| {
                Error::ResourceExhausted(format!("report buffer of {size} bytes"))
            })?;
            heap.resize(size, 0);
            &mut heap
        };

        let written = report::serialize(event, buf)?;
        match self
            .transport
            .enqueue(&topic, &buf[..written], Qos::AtLeastOnce, true)
        {
            Ok(()) => {
                debug!(topic = %topic, len = written, "report enqueued");
                Ok(())
            }
            Err(TransportError::QueueFull) => {
                warn!(topic = %topic, "outbound queue full");
                Err(Error::ResourceExhausted("outbound queue full".into()))
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "failed to enqueue report");
                Err(transport_err(e))
            }
        }
    }

    /// Publishes a product-detected report on `init`.
    pub fn report_init(&self, event: InitEvent) -> Result<()> {
        self.report(ReportTopic::Init.as_str(), &ReportEvent::Init(event))
    }

    /// Publishes a host state report on `state`.
    pub fn report_host_state(&self, event: StateEvent) -> Result<()> {
        self.report(ReportTopic::State.as_str(), &ReportEvent::State(event))
    }

    /// Publishes a bare message and code on `state`.
    pub fn report_state_message(&self, message: &str, code: i32) -> Result<()> {
        self.report_host_state(StateEvent {
            message: message.to_owned(),
            code,
            target_sn: SerialNumber::default(),
        })
    }

    /// Publishes a programming result on `prog`.
    pub fn report_program(&self, event: ProgramEvent) -> Result<()> {
        self.report(ReportTopic::Program.as_str(), &ReportEvent::Program(event))
    }

    /// Publishes an internal test result on `test/int`.
    pub fn report_self_test(&self, event: SelfTestEvent) -> Result<()> {
        self.report(ReportTopic::SelfTest.as_str(), &ReportEvent::SelfTest(event))
    }

    /// Publishes an external test result on `test/ext`.
    pub fn report_extern_test(&self, event: SelfTestEvent) -> Result<()> {
        self.report(ReportTopic::ExternTest.as_str(), &ReportEvent::SelfTest(event))
    }

    /// Publishes an erase result on `erase`.
    pub fn report_erase(&self, event: EraseEvent) -> Result<()> {
        self.report(ReportTopic::Erase.as_str(), &ReportEvent::Erase(event))
    }

    /// Publishes a repair routing on `repair`.
    pub fn report_repair(&self, event: RepairEvent) -> Result<()> {
        self.report(ReportTopic::Repair.as_str(), &ReportEvent::Repair(event))
    }

    /// Publishes a disposal routing on `dispose`.
    pub fn report_dispose(&self, event: RepairEvent) -> Result<()> {
        self.report(ReportTopic::Dispose.as_str(), &ReportEvent::Dispose(event))
    }
}

/// Outbound interface used by the flashing runner.
pub trait Reporter {
    /// Announces an identified target.
    fn send_target_ident(
        &self,
        sn: &[u8],
        firmware_hash: Sha256Digest,
        algo_hash: Sha256Digest,
    ) -> Result<()>;

    /// Sends the result of one test run.
    fn send_test_report(
        &self,
        test_id: u32,
        ret: u32,
        algo_hash: Sha256Digest,
        sn: &[u8],
        payload: &[u8],
    ) -> Result<()>;
}

impl<T: Transport> Reporter for Session<T> {
    fn send_target_ident(
        &self,
        sn: &[u8],
        firmware_hash: Sha256Digest,
        algo_hash: Sha256Digest,
    ) -> Result<()> {
        self.report_init(InitEvent {
            flash_algo_hash: algo_hash,
            firmware_hash,
            target_sn: SerialNumber::new(sn)?,
        })
    }

    fn send_test_report(
        &self,
        test_id: u32,
        ret: u32,
        algo_hash: Sha256Digest,
        sn: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        self.report_self_test(SelfTestEvent {
            test_id,
            return_code: ret,
            flash_algo_hash: algo_hash,
            target_sn: SerialNumber::new(sn)?,
            payload: (!payload.is_empty()).then(|| payload.to_vec()),
        })
    }
}

/// Maps a publish failure, keeping queue-full distinct from other failures.
fn transport_err(e: TransportError) -> Error {
    match e {
        TransportError::QueueFull => Error::ResourceExhausted(e.to_string()),
        TransportError::Failed(msg) => Error::Transport(msg),
    }
}

#[cfg(test)]
mod tests {
    use std::result::Result as StdResult;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Instant;

    use injector_proto::CommandKind;

    use super::*;

    const ADDR: HardwareAddr = HardwareAddr::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

    /// One recorded transport call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Start,
        Disconnect,
        Reconnect,
        SubscribeMany(Vec<(String, Qos)>),
        Subscribe(String, Qos),
        Enqueue {
            topic: String,
            payload: Vec<u8>,
            qos: Qos,
            retain: bool,
        },
    }

    /// Transport that records calls and fails on demand.
    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail_subscribe: bool,
        enqueue_result: Option<TransportError>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Transport for Recorder {
        fn start(&self) -> StdResult<(), TransportError> {
            self.push(Call::Start);
            Ok(())
        }

        fn disconnect(&self) -> StdResult<(), TransportError> {
            self.push(Call::Disconnect);
            Ok(())
        }

        fn reconnect(&self) -> StdResult<(), TransportError> {
            self.push(Call::Reconnect);
            Err(TransportError::Failed("no route".into()))
        }

        fn subscribe_many(&self, filters: &[(String, Qos)]) -> StdResult<(), TransportError> {
            self.push(Call::SubscribeMany(filters.to_vec()));
            if self.fail_subscribe {
                return Err(TransportError::Failed("suback refused".into()));
            }
            Ok(())
        }

        fn subscribe(&self, filter: &str, qos: Qos) -> StdResult<(), TransportError> {
            self.push(Call::Subscribe(filter.to_owned(), qos));
            Ok(())
        }

        fn enqueue(
            &self,
            topic: &str,
            payload: &[u8],
            qos: Qos,
            retain: bool,
        ) -> StdResult<(), TransportError> {
            self.push(Call::Enqueue {
                topic: topic.to_owned(),
                payload: payload.to_vec(),
                qos,
                retain,
            });
            self.enqueue_result.clone().map_or(Ok(()), Err)
        }
    }

    fn session(transport: Recorder) -> Session<Recorder> {
        let config = SessionConfig::default().bases("rpt", "cmd");
        Session::new(config, ADDR, transport).unwrap()
    }

    #[test]
    fn connect_subscribes_and_registers() {
        let s = session(Recorder::default());
        s.connect().unwrap();
        s.handle_event(SessionEvent::BeforeConnect).unwrap();
        assert!(!s.is_registered());
        s.handle_event(SessionEvent::Connected).unwrap();
        assert!(s.is_registered());

        let expected: Vec<(String, Qos)> = ["read_mem", "state", "meta/fw", "meta/algo"]
            .iter()
            .map(|sub| (format!("cmd/aabbccddeeff/{sub}"), Qos::ExactlyOnce))
            .collect();
        assert_eq!(
            s.transport().calls(),
            vec![Call::Start, Call::SubscribeMany(expected)]
        );
    }

    #[test]
    fn failed_subscribe_fails_closed() {
        let s = session(Recorder {
            fail_subscribe: true,
            ..Recorder::default()
        });
        assert!(s.handle_event(SessionEvent::Connected).is_err());
        assert!(!s.is_registered());
        assert_eq!(s.transport().calls().last(), Some(&Call::Disconnect));
    }

    #[test]
    fn unintended_disconnect_reconnects_once() {
        let s = session(Recorder::default());
        s.handle_event(SessionEvent::Connected).unwrap();
        // Reconnect failure is logged, not returned.
        s.handle_event(SessionEvent::Disconnected).unwrap();
        assert!(!s.is_registered());

        let reconnects = s
            .transport()
            .calls()
            .into_iter()
            .filter(|c| *c == Call::Reconnect)
            .count();
        assert_eq!(reconnects, 1);
    }

    #[test]
    fn forced_disconnect_suppresses_reconnect() {
        let s = session(Recorder::default());
        s.disconnect().unwrap();
        s.handle_event(SessionEvent::Disconnected).unwrap();
        assert!(!s.transport().calls().contains(&Call::Reconnect));
        assert!(s.state().contains(SessionState::FORCE_DISCONNECT));

        s.connect().unwrap();
        assert!(!s.state().contains(SessionState::FORCE_DISCONNECT));
    }

    #[test]
    fn blob_reply_is_queued_inline_and_signals_ready() {
        let s = session(Recorder::default());
        s.handle_event(SessionEvent::Data {
            topic: "cmd/AABBCCDDEEFF/bin/fw",
            payload: &[7; 16],
        })
        .unwrap();
        assert!(s.state().contains(SessionState::BLOB_REQUEST_READY));

        let pkt = s.recv_cmd_packet(Duration::ZERO).unwrap();
        assert_eq!(pkt.kind(), CommandKind::BinFirmware);
        assert_eq!(pkt.len(), 16);
        assert!(pkt.is_inline());
    }

    #[test]
    fn commands_keep_fifo_order() {
        let s = session(Recorder::default());
        s.decode_cmd_msg("cmd/aabbccddeeff/state", &[0, 0x30, 0, 0]).unwrap();
        s.decode_cmd_msg("cmd/aabbccddeeff/meta/algo", b"{}").unwrap();
        s.decode_cmd_msg("cmd/aabbccddeeff/bin/algo/0/4096", &[1; 300]).unwrap();

        let kinds: Vec<CommandKind> = (0..3)
            .map(|_| s.recv_cmd_packet(Duration::ZERO).unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            [CommandKind::SetState, CommandKind::MetaAlgo, CommandKind::BinAlgo]
        );
        assert!(matches!(
            s.recv_cmd_packet(Duration::from_millis(5)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn unknown_topics_are_dropped() {
        let s = session(Recorder::default());
        for topic in ["cmd/aabbccddeeff/flash", "rpt/aabbccddeeff/state", "cmd/aabbccddeeff"] {
            assert!(matches!(
                s.decode_cmd_msg(topic, b"x"),
                Err(Error::NotSupported(_))
            ));
        }
        assert!(s.recv_cmd_packet(Duration::ZERO).is_err());
        assert!(!s.state().contains(SessionState::BLOB_REQUEST_READY));
    }

    #[test]
    fn full_queue_times_out_on_33rd_command() {
        let config = SessionConfig::default().bases("rpt", "cmd").enqueue_timeout_ms(10);
        let s = Session::new(config, ADDR, Recorder::default()).unwrap();
        for _ in 0..32 {
            s.decode_cmd_msg("cmd/aabbccddeeff/read_mem", &[0; 8]).unwrap();
        }
        let t0 = Instant::now();
        assert!(matches!(
            s.decode_cmd_msg("cmd/aabbccddeeff/read_mem", &[0; 8]),
            Err(Error::Timeout(_))
        ));
        assert!(t0.elapsed() >= Duration::from_millis(10));

        // Nothing was dropped or duplicated.
        for _ in 0..32 {
            s.recv_cmd_packet(Duration::ZERO).unwrap();
        }
        assert!(s.recv_cmd_packet(Duration::ZERO).is_err());
    }

    #[test]
    fn second_blob_request_waits_for_ready() {
        let s = session(Recorder::default());
        s.decode_cmd_msg("cmd/aabbccddeeff/bin/fw", &[0; 4]).unwrap();

        s.request_blob(CommandTopic::BinFirmware, 0, 4096, Duration::ZERO)
            .unwrap();
        let err = s
            .request_blob(CommandTopic::BinFirmware, 4096, 4096, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        let subscribes: Vec<Call> = s
            .transport()
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Subscribe(..)))
            .collect();
        assert_eq!(
            subscribes,
            vec![Call::Subscribe(
                "cmd/aabbccddeeff/bin/fw/0/4096".into(),
                Qos::AtLeastOnce
            )]
        );
    }

    #[test]
    fn blob_request_unblocks_on_reply_from_other_thread() {
        let s = Arc::new(session(Recorder::default()));
        let cb = Arc::clone(&s);
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            cb.handle_event(SessionEvent::Data {
                topic: "cmd/aabbccddeeff/bin/algo/0/64",
                payload: &[0; 64],
            })
        });
        s.request_blob(CommandTopic::BinAlgo, 64, 64, Duration::from_secs(5))
            .unwrap();
        h.join().unwrap().unwrap();
        assert!(!s.state().contains(SessionState::BLOB_REQUEST_READY));
    }

    #[test]
    fn report_publishes_retained_at_least_once() {
        let s = session(Recorder::default());
        s.report_state_message("ready", 0).unwrap();

        let calls = s.transport().calls();
        let Some(Call::Enqueue {
            topic,
            payload,
            qos,
            retain,
        }) = calls.last()
        else {
            panic!("no enqueue in {calls:?}");
        };
        assert_eq!(topic, "rpt/aabbccddeeff/state");
        assert_eq!(*qos, Qos::AtLeastOnce);
        assert!(*retain);
        let expected = report::to_vec(&ReportEvent::State(StateEvent {
            message: "ready".into(),
            code: 0,
            target_sn: SerialNumber::default(),
        }))
        .unwrap();
        assert_eq!(payload, &expected);
    }

    #[test]
    fn large_report_uses_exact_heap_buffer() {
        let s = session(Recorder::default());
        let event = SelfTestEvent {
            test_id: 3,
            return_code: 1,
            payload: Some(vec![0x5a; 1000]),
            ..SelfTestEvent::default()
        };
        let expected = report::to_vec(&ReportEvent::SelfTest(event.clone())).unwrap();
        assert!(expected.len() > SCRATCH_LEN);

        s.report_extern_test(event).unwrap();
        match s.transport().calls().last() {
            Some(Call::Enqueue { topic, payload, .. }) => {
                assert_eq!(topic, "rpt/aabbccddeeff/test/ext");
                assert_eq!(payload, &expected);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn long_subtopic_rejected_before_publish() {
        let s = session(Recorder::default());
        let event = ReportEvent::Erase(EraseEvent::default());
        assert!(matches!(
            s.report("seventeen-bytes!!", &event),
            Err(Error::InvalidArgument(_))
        ));
        s.report("sixteen-bytes!!!", &event).unwrap();
        assert_eq!(s.transport().calls().len(), 1);
    }

    #[test]
    fn enqueue_failures_are_distinguished() {
        let full = session(Recorder {
            enqueue_result: Some(TransportError::QueueFull),
            ..Recorder::default()
        });
        assert!(matches!(
            full.report_erase(EraseEvent::default()),
            Err(Error::ResourceExhausted(_))
        ));

        let broken = session(Recorder {
            enqueue_result: Some(TransportError::Failed("offline".into())),
            ..Recorder::default()
        });
        assert!(matches!(
            broken.report_repair(RepairEvent::default()),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn reporter_builds_typed_events() {
        let s = session(Recorder::default());
        let sn = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
        s.send_target_ident(&sn, Sha256Digest::default(), Sha256Digest::default())
            .unwrap();
        s.send_test_report(1, 0, Sha256Digest::default(), &sn, &[])
            .unwrap();
        assert!(s
            .send_target_ident(&[0; 33], Sha256Digest::default(), Sha256Digest::default())
            .is_err());

        let topics: Vec<String> = s
            .transport()
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Enqueue { topic, .. } => Some(topic),
                _ => None,
            })
            .collect();
        assert_eq!(topics, ["rpt/aabbccddeeff/init", "rpt/aabbccddeeff/test/int"]);
    }

    #[test]
    fn config_defaults_from_json() {
        let config: SessionConfig = serde_json::from_str(r#"{"cmd_base":"c"}"#).unwrap();
        assert_eq!(config.cmd_base, "c");
        assert_eq!(config.report_base, DEFAULT_REPORT_BASE);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.enqueue_timeout_ms, 100);
        assert!(Session::new(config.queue_capacity(0), ADDR, Recorder::default()).is_err());
    }
}
