//! Link session: one socket, one handshake, receiver and saver threads
//!
//! # Lifecycle
//!
//! ```text
//! setup ──► handshake ──► [tcp_to_udp] ──► start_receiver / start_saver
//!                                              │
//!                    send / latest ◄───────────┘
//!                                              │
//!                                          stop_all
//! ```
//!
//! Frame sizes are fixed by the handshake. Every data-path call made before
//! it fails with [`Error::HandshakeIncomplete`].

use crate::cache::LatestValue;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{
    AuxArgs, ByteOrder, Encoding, FrameCodec, FrameLayout, Handshake, HandshakeOutcome,
    LocalEndpoint, PeerRegistry,
};
use crate::receiver::{RetryPolicy, Sinks, receiver_loop};
use crate::recorder::{BinaryLog, RecordBuffer, saver_loop};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::transport::{Connection, Role, TransportKind};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Where and how inbound frames are recorded
#[derive(Debug, Clone)]
pub struct RecorderOptions {
    pub log: BinaryLog,
    pub threshold: usize,
}

/// Everything a session needs besides the socket
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub local: LocalEndpoint,
    pub encoding: Encoding,
    pub aux: AuxArgs,
    pub byte_order: ByteOrder,
    pub registry: PeerRegistry,
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
    pub join_timeout: Duration,
    /// Datagram receive buffer after the UDP switch; OS default when `None`
    pub udp_recv_buffer: Option<usize>,
    /// `None` disables recording
    pub recorder: Option<RecorderOptions>,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        let recorder = config.recorder.enabled.then(|| RecorderOptions {
            log: BinaryLog::dated(
                &config.recorder.dir,
                &config.recorder.base_filename,
                &config.recorder.extension,
                config.link.byte_order,
            ),
            threshold: config.recorder.threshold,
        });

        Self {
            local: config.local_endpoint(),
            encoding: config.handshake.encoding,
            aux: config.aux_args(),
            byte_order: config.link.byte_order,
            registry: config.registry(),
            read_timeout: config.read_timeout(),
            retry: config.retry_policy(),
            join_timeout: config.join_timeout(),
            udp_recv_buffer: config.udp_recv_buffer(),
            recorder,
        }
    }
}

/// Negotiated state, present once the handshake succeeded
struct Link {
    codec: FrameCodec,
    outcome: HandshakeOutcome,
}

/// Named worker thread handle
struct Worker {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn spawn(&mut self, body: impl FnOnce() + Send + 'static) -> Result<()> {
        // Reap a thread that already exited on its own
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| Error::ThreadPanic)?;
        }
        let handle = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(body)
            .map_err(|e| Error::Other(format!("Failed to spawn {} thread: {}", self.name, e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Join within `timeout`, detaching the thread if it does not exit
    fn join(&mut self, timeout: Duration) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("{} thread did not stop in {:?}, detaching", self.name, timeout);
                return Err(Error::JoinTimeout(self.name));
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.join().map_err(|_| Error::ThreadPanic)
    }
}

/// One point-to-point link session
pub struct Session {
    options: SessionOptions,
    connection: Option<Connection>,
    link: Option<Link>,
    cache: Arc<LatestValue>,
    records: Option<Arc<RecordBuffer>>,
    stats: Arc<LinkStats>,
    receiver_running: Arc<AtomicBool>,
    receiver: Worker,
    saver: Worker,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let records = options
            .recorder
            .as_ref()
            .map(|rec| Arc::new(RecordBuffer::new(rec.threshold)));

        Self {
            options,
            connection: None,
            link: None,
            cache: Arc::new(LatestValue::new()),
            records,
            stats: Arc::new(LinkStats::new()),
            receiver_running: Arc::new(AtomicBool::new(false)),
            receiver: Worker::new("setu-receiver"),
            saver: Worker::new("setu-saver"),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(SessionOptions::from_config(config))
    }

    /// Open the session socket: accept one peer (server) or connect (client)
    pub fn setup(&mut self, address: &str, port: u16, role: Role) -> Result<()> {
        self.ensure_no_socket()?;
        let connection = match role {
            Role::Server => Connection::listen(address, port)?,
            Role::Client => Connection::connect(address, port)?,
        };
        self.attach(connection)
    }

    /// Adopt a connection opened elsewhere (e.g. from [`Connection::bind`])
    pub fn attach(&mut self, connection: Connection) -> Result<()> {
        self.ensure_no_socket()?;
        self.connection = Some(connection);
        Ok(())
    }

    fn ensure_no_socket(&self) -> Result<()> {
        if self.connection.is_some() {
            return Err(Error::Setup(
                "socket already exists for this session".to_string(),
            ));
        }
        Ok(())
    }

    /// Negotiate counts and encodings; allowed once per session
    pub fn handshake(&mut self) -> Result<&HandshakeOutcome> {
        if self.link.is_some() {
            return Err(Error::Protocol("handshake already completed".to_string()));
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::Protocol("no socket; call setup first".to_string()))?;

        let handshake = Handshake::new(
            self.options.registry.clone(),
            self.options.local,
            self.options.encoding,
            self.options.aux.clone(),
            self.options.byte_order,
        );
        let role = connection.role();
        let peer_addr = connection.peer_addr();
        let stream = connection.stream_mut()?;
        let outcome = match role {
            Role::Server => handshake.as_server(stream)?,
            Role::Client => handshake.as_client(stream)?,
        };

        identify(&outcome, peer_addr);

        if let Some(rec) = self.options.recorder.as_mut() {
            rec.log = rec.log.clone().with_values_per_record(outcome.layout.inputs);
        }
        let link = self.link.insert(Link {
            codec: FrameCodec::new(outcome.layout),
            outcome,
        });
        Ok(&link.outcome)
    }

    /// Move the link from TCP to UDP, keeping the negotiated frame sizes
    ///
    /// If the datagram socket cannot be opened the error is returned and the
    /// TCP connection stays in place.
    pub fn tcp_to_udp(&mut self) -> Result<()> {
        if self.link.is_none() {
            return Err(Error::HandshakeIncomplete);
        }
        if self.receiver.is_running() {
            return Err(Error::Protocol(
                "stop the receiver before switching transport".to_string(),
            ));
        }
        let recv_buffer = self.options.udp_recv_buffer;
        self.connection
            .as_mut()
            .ok_or_else(|| Error::Protocol("no socket to switch".to_string()))?
            .switch_to_datagram(recv_buffer)
    }

    /// Start the receiver thread; a no-op if it is already running
    pub fn start_receiver(&mut self) -> Result<()> {
        let codec = self.codec()?;
        if self.receiver.is_running() {
            log::info!("Receiver already running");
            return Ok(());
        }
        let connection = self.connection()?;
        connection.set_read_timeout(Some(self.options.read_timeout))?;
        let rx = connection.receiver(codec.layout().recv_size())?;

        let sinks = Sinks {
            cache: Arc::clone(&self.cache),
            records: self.records.clone(),
            stats: Arc::clone(&self.stats),
        };
        let running = Arc::clone(&self.receiver_running);
        let retry = self.options.retry;
        running.store(true, Ordering::Relaxed);

        let spawned = self
            .receiver
            .spawn(move || receiver_loop(rx, codec, sinks, running, retry));
        if spawned.is_err() {
            self.receiver_running.store(false, Ordering::Relaxed);
        }
        spawned
    }

    pub fn is_receiving(&self) -> bool {
        self.receiver.is_running()
    }

    pub fn is_saving(&self) -> bool {
        self.saver.is_running()
    }

    pub fn stop_receiver(&mut self) -> Result<()> {
        self.receiver_running.store(false, Ordering::Relaxed);
        self.receiver.join(self.options.join_timeout)
    }

    /// Start the saver thread; a no-op if it is already running
    pub fn start_saver(&mut self) -> Result<()> {
        let inputs = self.codec()?.layout().inputs;
        if self.saver.is_running() {
            log::info!("Saver already running");
            return Ok(());
        }
        let (Some(rec), Some(records)) = (self.options.recorder.as_ref(), self.records.as_ref())
        else {
            return Err(Error::Protocol("recording is disabled".to_string()));
        };

        let sink = rec.log.clone().with_values_per_record(inputs);
        let records = Arc::clone(records);
        let stats = Arc::clone(&self.stats);
        records.resume();

        self.saver.spawn(move || saver_loop(records, sink, stats))
    }

    pub fn stop_saver(&mut self) -> Result<()> {
        if let Some(records) = &self.records {
            records.stop();
        }
        self.saver.join(self.options.join_timeout)
    }

    /// Encode and transmit one outbound frame, returning the bytes sent
    ///
    /// Transport failures are counted in [`StatsSnapshot::send_errors`] and
    /// leave the session usable.
    pub fn send(&self, values: &[f64]) -> Result<Vec<u8>> {
        let frame = self.codec()?.encode(values)?;
        if let Err(e) = self.connection()?.send(&frame) {
            LinkStats::bump(&self.stats.send_errors);
            return Err(e);
        }
        LinkStats::bump(&self.stats.frames_sent);
        log::trace!("Sent {} bytes", frame.len());
        Ok(frame)
    }

    /// Newest inbound values not yet read, if any
    pub fn latest(&self) -> Option<Vec<f64>> {
        self.cache.take()
    }

    /// Stop both threads and close the socket
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned.
    pub fn stop_all(&mut self) -> Result<()> {
        let receiver = self.stop_receiver();
        let saver = self.stop_saver();
        if let Some(connection) = self.connection.take() {
            log::info!(
                "Closing {} {} socket on {}",
                connection.transport(),
                connection.role(),
                connection.local_addr()
            );
        }
        receiver.and(saver)
    }

    /// Truncate the recording file
    pub fn clear_log(&self) -> Result<()> {
        match &self.options.recorder {
            Some(rec) => rec.log.clear(),
            None => Err(Error::Protocol("recording is disabled".to_string())),
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.options.recorder.as_ref().map(|rec| rec.log.path())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn peer(&self) -> Option<&HandshakeOutcome> {
        self.link.as_ref().map(|link| &link.outcome)
    }

    pub fn layout(&self) -> Option<&FrameLayout> {
        self.link.as_ref().map(|link| &link.outcome.layout)
    }

    pub fn role(&self) -> Option<Role> {
        self.connection.as_ref().map(Connection::role)
    }

    pub fn transport(&self) -> Option<TransportKind> {
        self.connection.as_ref().map(Connection::transport)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(Connection::local_addr)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().and_then(Connection::peer_addr)
    }

    /// Records queued but not yet written
    pub fn pending_records(&self) -> usize {
        self.records.as_ref().map_or(0, |records| records.len())
    }

    fn codec(&self) -> Result<FrameCodec> {
        self.link
            .as_ref()
            .map(|link| link.codec)
            .ok_or(Error::HandshakeIncomplete)
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| Error::Protocol("socket is closed".to_string()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.receiver.is_running() || self.saver.is_running() {
            log::debug!("Session dropped with workers running, stopping them");
            if let Err(e) = self.stop_all() {
                log::warn!("Session shutdown: {}", e);
            }
        }
    }
}

/// Log who we are talking to and the negotiated frame shapes
fn identify(outcome: &HandshakeOutcome, peer_addr: Option<SocketAddr>) {
    let layout = &outcome.layout;
    let address = peer_addr.map_or_else(|| "unknown".to_string(), |a| a.to_string());
    log::info!(
        "Connected to {} (id {}) at {}",
        outcome.peer_name,
        outcome.peer_id,
        address
    );
    log::info!(
        "Receiving {} {:?} values ({} bytes/frame), sending {} {:?} values ({} bytes/frame)",
        layout.inputs,
        layout.inbound,
        layout.recv_size(),
        layout.outputs,
        layout.outbound,
        layout.send_size()
    );
    match &outcome.peer_aux {
        Some(aux) => log::info!("Peer aux args: {:?}", aux),
        None => log::info!("Peer skipped encoding and aux negotiation"),
    }
}
