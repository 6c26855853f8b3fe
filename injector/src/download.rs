//! Bulk downloader: streams one HTTP response into a bounded sink.
//!
//! The transport drives the transfer by calling
//! [`Downloader::handle_event`] (or a cloned [`DownloadHandle`] from its own
//! thread) once per [`HttpEvent`]; the caller of [`Downloader::request`]
//! then waits on the completion bits. Chunks are written straight from the
//! transport's buffer and never retained, so nothing but the flag word
//! crosses between the two sides.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::bits::EventBits;
use crate::{Error, Result};

/// Transfer failed (transport error, oversize, or sink failure).
pub const ERROR: u32 = 1 << 0;
/// At least one chunk has been written.
pub const DATA_AVAIL: u32 = 1 << 1;
/// Response complete and sink closed.
pub const DONE: u32 = 1 << 2;
/// The transport reported [`HttpEvent::Disconnected`].
pub const CLOSED: u32 = 1 << 3;

/// Default hard cap on the transfer size (1 MiB).
pub const DEFAULT_MAX_LEN: usize = 1024 * 1024;

/// Default transfer deadline.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = "SoulInjector/5.0";

/// Body read granularity of [`UreqTransport`].
const CHUNK_SIZE: usize = 4096;

/// Settings for one transfer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct DownloadConfig {
    /// Source URL.
    pub url: String,
    /// Hard cap on bytes written to the sink.
    pub max_len: usize,
    /// Deadline for the whole transfer, in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Redirects followed before giving up.
    pub max_redirects: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_len: DEFAULT_MAX_LEN,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_redirects: 10,
        }
    }
}

impl DownloadConfig {
    /// Config for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the size cap.
    #[must_use]
    pub const fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Sets the transfer deadline.
    #[must_use]
    pub const fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Transfer deadline as a [`Duration`].
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP method of the transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Method {
    /// Plain fetch.
    #[default]
    Get,
    /// Fetch with a request body.
    Post,
}

/// Fully described transfer request handed to the transport.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct HttpRequest {
    /// Source URL.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Extra request headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body for [`Method::Post`].
    pub body: Option<Vec<u8>>,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Redirects followed before giving up.
    pub max_redirects: u32,
}

/// Transport-side event for the active transfer.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub enum HttpEvent<'a> {
    /// The transfer failed at the transport level.
    Error,
    /// A body chunk, valid only for the duration of the call.
    Data(&'a [u8]),
    /// The body is complete.
    Finish,
    /// The connection closed.
    Disconnected,
}

/// Something that can execute an [`HttpRequest`] and report its progress.
pub trait HttpTransport {
    /// Performs `request`, feeding every event to `on_event` in order.
    ///
    /// An error returned by `on_event` aborts the transfer and is passed
    /// back to the caller. [`HttpEvent::Disconnected`] is always the last
    /// event delivered.
    fn perform(
        &mut self,
        request: &HttpRequest,
        timeout: Duration,
        on_event: &mut dyn FnMut(HttpEvent<'_>) -> Result<()>,
    ) -> Result<()>;
}

/// [`HttpTransport`] backed by a blocking [`ureq`] agent.
///
/// Redirects are followed; a non-2xx status is a transport error.
#[derive(Debug, Clone, Copy, Default)]
pub struct UreqTransport;

impl UreqTransport {
    /// Issues the request and streams the body through `on_event`.
    fn stream(
        request: &HttpRequest,
        timeout: Duration,
        on_event: &mut dyn FnMut(HttpEvent<'_>) -> Result<()>,
    ) -> Result<()> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .max_redirects(request.max_redirects)
            .user_agent(request.user_agent.as_str())
            .build()
            .into();

        let resp = match request.method {
            Method::Get => {
                let mut req = agent.get(&request.url);
                for (k, v) in &request.headers {
                    req = req.header(k, v);
                }
                req.call()
            }
            Method::Post => {
                let mut req = agent.post(&request.url);
                for (k, v) in &request.headers {
                    req = req.header(k, v);
                }
                req.send(request.body.as_deref().unwrap_or_default())
            }
        }
        .map_err(|e| Error::Http(e.to_string()))?;

        let mut reader = resp.into_body().into_reader();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Http(e.to_string())),
            };
            on_event(HttpEvent::Data(&chunk[..n]))?;
        }
        on_event(HttpEvent::Finish)
    }
}

impl HttpTransport for UreqTransport {
    fn perform(
        &mut self,
        request: &HttpRequest,
        timeout: Duration,
        on_event: &mut dyn FnMut(HttpEvent<'_>) -> Result<()>,
    ) -> Result<()> {
        let result = Self::stream(request, timeout, on_event);
        if let Err(Error::Http(ref msg)) = result {
            warn!(url = %request.url, error = %msg, "transfer failed");
            let _ = on_event(HttpEvent::Error);
        }
        let _ = on_event(HttpEvent::Disconnected);
        result
    }
}

/// Progress of the active transfer, owned by the event handler.
#[derive(Debug)]
struct Progress<W> {
    /// Bytes written so far.
    position: usize,
    /// Hard cap on `position`.
    max_len: usize,
    /// Destination; `None` once closed.
    sink: Option<W>,
}

/// State touched from the transport's event context.
#[derive(Debug)]
struct Shared<W> {
    /// Transfer progress and sink.
    progress: Mutex<Progress<W>>,
    /// `ERROR` / `DATA_AVAIL` / `DONE` / `CLOSED`.
    bits: EventBits,
}

impl<W: Write> Shared<W> {
    /// Aborts the transfer: error wins over any success bit.
    fn fail(&self, progress: &mut Progress<W>) {
        self.bits.replace(DATA_AVAIL | DONE, ERROR);
        if let Some(mut sink) = progress.sink.take() {
            let _ = sink.flush();
        }
    }

    /// Applies one transport event.
    fn handle(&self, event: HttpEvent<'_>) -> Result<()> {
        match event {
            HttpEvent::Error => {
                self.bits.replace(DATA_AVAIL | DONE, ERROR);
                Ok(())
            }
            HttpEvent::Data(chunk) => {
                let mut progress = self.progress.lock();
                let end = progress.position.saturating_add(chunk.len());
                if end > progress.max_len {
                    error!(max = progress.max_len, now = end, "exceeding max length");
                    self.fail(&mut progress);
                    return Err(Error::ResourceExhausted(format!(
                        "transfer exceeds {} bytes",
                        progress.max_len
                    )));
                }

                let Some(sink) = progress.sink.as_mut() else {
                    error!("chunk arrived after sink was closed");
                    self.fail(&mut progress);
                    return Err(Error::InvalidState("sink closed".into()));
                };
                if let Err(e) = sink.write_all(chunk) {
                    error!(error = %e, "failed to write chunk");
                    self.fail(&mut progress);
                    return Err(e.into());
                }

                progress.position = end;
                debug!(written = chunk.len(), pos = end, "chunk stored");
                self.bits.replace(ERROR, DATA_AVAIL);
                Ok(())
            }
            HttpEvent::Finish => {
                let mut progress = self.progress.lock();
                let Some(mut sink) = progress.sink.take() else {
                    return Ok(());
                };
                if let Err(e) = sink.flush() {
                    error!(error = %e, "failed to flush sink");
                    self.fail(&mut progress);
                    return Err(e.into());
                }
                drop(sink);
                info!(bytes = progress.position, "transfer finished, sink closed");
                self.bits.replace(ERROR, DONE);
                Ok(())
            }
            HttpEvent::Disconnected => {
                if let Some(mut sink) = self.progress.lock().sink.take() {
                    debug!("disconnected with sink open, closing");
                    let _ = sink.flush();
                }
                self.bits.set(CLOSED);
                Ok(())
            }
        }
    }
}

/// Drives one streaming transfer into an exclusively owned sink.
///
/// At most one transfer runs per downloader. The size cap is enforced
/// chunk by chunk: the first chunk that would cross it aborts the transfer
/// and closes the sink.
#[derive(Debug)]
pub struct Downloader<W = File, H = UreqTransport> {
    /// Request issued by [`Self::request`].
    request: HttpRequest,
    /// Default deadline.
    timeout: Duration,
    /// Executes the request.
    transport: H,
    /// Event-side state.
    shared: Arc<Shared<W>>,
}

/// Cloneable event entry point for transports that deliver events from
/// their own thread after [`HttpTransport::perform`] has returned.
#[derive(Debug)]
pub struct DownloadHandle<W> {
    /// State of the owning [`Downloader`].
    shared: Arc<Shared<W>>,
}

impl<W> Clone for DownloadHandle<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W: Write> DownloadHandle<W> {
    /// Same as [`Downloader::handle_event`].
    pub fn handle_event(&self, event: HttpEvent<'_>) -> Result<()> {
        self.shared.handle(event)
    }
}

impl Downloader {
    /// Opens (creating or truncating) `path` as the sink for `config.url`.
    pub fn open(config: DownloadConfig, path: impl AsRef<Path>) -> Result<Self> {
        validate(&config)?;
        let file = File::create(path.as_ref()).map_err(|e| {
            error!(path = %path.as_ref().display(), error = %e, "failed to open sink");
            e
        })?;
        Self::with_sink(config, file, UreqTransport)
    }
}

impl<W: Write + Send, H: HttpTransport> Downloader<W, H> {
    /// Builds a downloader over an arbitrary sink and transport.
    pub fn with_sink(config: DownloadConfig, sink: W, transport: H) -> Result<Self> {
        validate(&config)?;
        let timeout = config.timeout();
        Ok(Self {
            request: HttpRequest {
                url: config.url,
                method: Method::Get,
                headers: Vec::new(),
                body: None,
                user_agent: config.user_agent,
                max_redirects: config.max_redirects,
            },
            timeout,
            transport,
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress {
                    position: 0,
                    max_len: config.max_len,
                    sink: Some(sink),
                }),
                bits: EventBits::new(),
            }),
        })
    }

    /// Replaces the source URL.
    pub fn set_url(&mut self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        if url.is_empty() {
            return Err(Error::InvalidArgument("empty URL".into()));
        }
        self.request.url = url;
        Ok(())
    }

    /// Sets the request method.
    pub const fn set_method(&mut self, method: Method) {
        self.request.method = method;
    }

    /// Sets a request header, replacing any previous value for `key`.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.request
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        self.request.headers.push((key, value.into()));
    }

    /// Sets the request body sent with [`Method::Post`].
    pub fn set_post_field(&mut self, body: impl Into<Vec<u8>>) {
        self.request.body = Some(body.into());
    }

    /// Request that [`Self::request`] will issue.
    pub const fn http_request(&self) -> &HttpRequest {
        &self.request
    }

    /// Applies one transport event.
    ///
    /// Callable from the transport's own thread while another task waits
    /// in [`Self::request`]. Failures are recorded in the flag word and
    /// returned to the transport, which must abort the transfer.
    pub fn handle_event(&self, event: HttpEvent<'_>) -> Result<()> {
        self.shared.handle(event)
    }

    /// Handle a transport can move to another thread to feed events.
    pub fn handle(&self) -> DownloadHandle<W> {
        DownloadHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the transfer with the configured deadline.
    pub fn request(&mut self) -> Result<()> {
        self.request_timeout(self.timeout)
    }

    /// Runs the transfer and waits for `DONE`, `ERROR` or `CLOSED` until
    /// `timeout`.
    ///
    /// Succeeds only if `DONE` was raised without `ERROR` before the
    /// deadline. A connection that closes before `Finish` fails at once
    /// instead of waiting out the deadline.
    pub fn request_timeout(&mut self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        info!(url = %self.request.url, "start request");

        let shared = &*self.shared;
        let result = self
            .transport
            .perform(&self.request, timeout, &mut |ev| shared.handle(ev));
        if let Err(e) = result {
            warn!(url = %self.request.url, error = %e, "end request");
            return Err(e);
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let bits = self
            .shared
            .bits
            .wait_any(DONE | ERROR | CLOSED, true, remaining);
        if bits & ERROR != 0 {
            error!(url = %self.request.url, bits, "failed to download");
            return Err(Error::Http("transfer aborted".into()));
        }
        if bits & DONE == 0 {
            error!(url = %self.request.url, bits, "failed to download");
            return Err(if bits & CLOSED == 0 {
                Error::Timeout("transfer did not complete")
            } else {
                Error::Http("connection closed before transfer finished".into())
            });
        }

        info!(url = %self.request.url, bytes = self.position(), "end request");
        Ok(())
    }

    /// Bytes written to the sink so far.
    pub fn position(&self) -> usize {
        self.shared.progress.lock().position
    }

    /// Hard cap on the transfer size.
    pub fn max_len(&self) -> usize {
        self.shared.progress.lock().max_len
    }

    /// Whether the sink is still open.
    pub fn is_sink_open(&self) -> bool {
        self.shared.progress.lock().sink.is_some()
    }

    /// Current `ERROR` / `DATA_AVAIL` / `DONE` / `CLOSED` flags.
    pub fn flags(&self) -> u32 {
        self.shared.bits.get()
    }
}

/// Rejects configs that cannot describe a transfer.
fn validate(config: &DownloadConfig) -> Result<()> {
    if config.url.is_empty() {
        return Err(Error::InvalidArgument("empty URL".into()));
    }
    if config.max_len == 0 {
        return Err(Error::InvalidArgument("max_len must be positive".into()));
    }
    Ok(())
}
