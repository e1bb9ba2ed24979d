//! The TLS session state machine.
//!
//! Bytes read from the transport are committed to `enc_in` and fed to the
//! engine. Ciphertext produced by the engine collects in `enc_out` until the
//! transport accepts it. Decrypted data is handed to the [`SessionHandler`]
//! in chunks as soon as it is read from the engine.

use std::{
    collections::VecDeque,
    fmt,
    io::{self, IoSlice, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rustls::{
    server::{Accepted, Acceptor},
    ClientConnection, Connection, KeyLog, ServerName,
};

use crate::{
    ciphers::cipher_info,
    config::{MAX_SEND_FRAGMENT, MIN_SEND_FRAGMENT},
    context::{ClientHooks, ServerHooks},
    error::hello_rejection_alert,
    hello::ServerHelloSniffer,
    session::{ClientSessionBridge, ServerSessionBridge},
    ticket::SessionTicketer,
    verify::VerifyState,
    x509::{self, CertificateInfo},
    CipherInfo, ClientSession, EphemeralKeyInfo, ProtocolVersion, Role, SecureContext, ServerSession,
    Session, SessionHandler, TlsError, Transport, VerifyError, WrapConfig, WriteStatus,
};
#[cfg(feature = "logging")]
use crate::log::{debug, trace, warn};

/// Largest chunk of cleartext handed to [`SessionHandler::on_data`].
pub const CLEAR_OUT_CHUNK_SIZE: usize = 16 * 1024;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_ALERT: u8 = 0x15;
const ALERT_LEVEL_FATAL: u8 = 2;

/// Identifies a cleartext write started with [`Wrap::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriteId(u64);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No handshake bytes have been exchanged yet.
    Created,
    /// The handshake is in progress.
    Handshaking,
    /// The handshake completed.
    Established,
    /// [`Wrap::shutdown`] was called.
    ShuttingDown,
    /// A fatal error was reported. Writes fail with that error.
    Failed,
    /// [`Wrap::destroy`] was called.
    Destroyed,
}

/// Progress of a deferred certificate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CertCb {
    Idle,
    Running,
    Done,
}

enum Engine {
    /// Client session that has not been started.
    Idle,
    /// Server collecting the ClientHello.
    Accepting(Box<Acceptor>),
    /// Server holding a parsed ClientHello until a certificate is chosen.
    AwaitingCert(Box<Accepted>),
    Connected(Box<Connection>),
    /// The ClientHello was rejected before a connection existed.
    Failed,
    Destroyed,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Engine::Idle => "Idle",
            Engine::Accepting(_) => "Accepting",
            Engine::AwaitingCert(_) => "AwaitingCert",
            Engine::Connected(_) => "Connected",
            Engine::Failed => "Failed",
            Engine::Destroyed => "Destroyed",
        })
    }
}

/// Work postponed until the next [`Wrap::tick`].
#[derive(Debug)]
enum Deferred {
    /// A transport write finished synchronously.
    AfterWrite(Result<(), TlsError>),
    /// Complete the current cleartext write.
    InvokeQueued(Result<(), TlsError>),
}

/// Collects NSS key log lines produced by the engine.
#[derive(Default)]
struct KeyLogLines {
    enabled: AtomicBool,
    lines: Mutex<Vec<Vec<u8>>>,
}

impl KeyLogLines {
    fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl KeyLog for KeyLogLines {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let line = format!(
            "{label} {} {}\n",
            hex::encode(client_random),
            hex::encode(secret)
        );
        self.lines.lock().push(line.into_bytes());
    }

    fn will_log(&self, _label: &str) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// A TLS session over a [`Transport`].
///
/// The host drives the session by delivering transport events
/// ([`Wrap::on_transport_read`], [`Wrap::on_transport_write_done`],
/// [`Wrap::on_transport_eof`]) and by calling [`Wrap::tick`] whenever
/// [`Wrap::has_pending_ticks`] returns true. Completions that would
/// otherwise fire from inside the call that caused them are queued for the
/// next tick.
pub struct Wrap<T, H> {
    context: Arc<SecureContext>,
    sni_context: Option<Arc<SecureContext>>,
    config: WrapConfig,
    transport: T,
    handler: H,

    engine: Engine,
    cert_cb: CertCb,

    enc_in: Vec<u8>,
    enc_out: Vec<u8>,
    /// Bytes of `enc_out` handed to the transport and not yet committed.
    write_size: usize,
    pending_cleartext: Vec<u8>,

    next_write_id: u64,
    current_write: Option<WriteId>,
    current_empty_write: Option<WriteId>,
    in_dowrite: bool,
    deferred: VecDeque<Deferred>,

    handshake_started: bool,
    established: bool,
    eof_emitted: bool,
    shutdown: bool,
    /// The fatal error, once one was reported.
    failure: Option<TlsError>,
    awaiting_new_session: bool,

    verify: VerifyState,
    server_sessions: Arc<ServerSessionBridge>,
    client_sessions: Option<Arc<ClientSessionBridge>>,
    client_session: Option<ClientSession>,
    tickets: Option<Arc<SessionTicketer>>,
    key_log: Arc<KeyLogLines>,
    sniffer: ServerHelloSniffer,

    servername: Option<String>,
    ocsp_requested: bool,
    ocsp_response: Option<Vec<u8>>,
}

impl<T, H> fmt::Debug for Wrap<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrap")
            .field("role", &self.config.role())
            .field("engine", &self.engine)
            .field("cert_cb", &self.cert_cb)
            .field("enc_in", &self.enc_in.len())
            .field("enc_out", &self.enc_out.len())
            .field("write_size", &self.write_size)
            .field("current_write", &self.current_write)
            .finish_non_exhaustive()
    }
}

impl<T, H> Wrap<T, H>
where
    T: Transport,
    H: SessionHandler,
{
    /// Creates a session bound to `context` and starts reading from
    /// `transport`.
    ///
    /// Fails if the context is closed or restricted to the other role.
    pub fn new(
        context: Arc<SecureContext>,
        config: WrapConfig,
        mut transport: T,
        handler: H,
    ) -> Result<Self, TlsError> {
        context.check_role(config.role())?;

        let engine = match config.role() {
            Role::Server => Engine::Accepting(Box::default()),
            Role::Client => Engine::Idle,
        };
        let key_log = Arc::new(KeyLogLines::default());
        key_log
            .enabled
            .store(config.enable_keylog(), Ordering::Relaxed);

        transport.read_start();
        debug!(role = ?config.role(), "created session");

        Ok(Self {
            server_sessions: Arc::new(ServerSessionBridge::new(config.enable_session_callbacks())),
            context,
            sni_context: None,
            config,
            transport,
            handler,
            engine,
            cert_cb: CertCb::Idle,
            enc_in: Vec::new(),
            enc_out: Vec::new(),
            write_size: 0,
            pending_cleartext: Vec::new(),
            next_write_id: 0,
            current_write: None,
            current_empty_write: None,
            in_dowrite: false,
            deferred: VecDeque::new(),
            handshake_started: false,
            established: false,
            eof_emitted: false,
            shutdown: false,
            failure: None,
            awaiting_new_session: false,
            verify: VerifyState::default(),
            client_sessions: None,
            client_session: None,
            tickets: None,
            key_log,
            sniffer: ServerHelloSniffer::default(),
            servername: None,
            ocsp_requested: false,
            ocsp_response: None,
        })
    }

    /// Returns the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns the handler mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the transport mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Returns the session config.
    pub fn config(&self) -> &WrapConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        match self.engine {
            Engine::Destroyed => State::Destroyed,
            _ if self.failure.is_some() => State::Failed,
            _ if self.shutdown => State::ShuttingDown,
            _ if self.established => State::Established,
            _ if self.handshake_started => State::Handshaking,
            _ => State::Created,
        }
    }

    fn is_client(&self) -> bool {
        self.config.role() == Role::Client
    }

    fn is_destroyed(&self) -> bool {
        matches!(self.engine, Engine::Destroyed)
    }

    /// Whether the server is still collecting or holding the ClientHello.
    fn hello_pending(&self) -> bool {
        matches!(self.engine, Engine::Accepting(_) | Engine::AwaitingCert(_))
    }

    fn connection(&self) -> Option<&Connection> {
        match &self.engine {
            Engine::Connected(conn) => Some(conn),
            _ => None,
        }
    }

    fn active_context(&self) -> &SecureContext {
        self.sni_context.as_deref().unwrap_or(&self.context)
    }

    fn max_fragment_size(&self) -> Option<usize> {
        self.config
            .max_send_fragment()
            .map(|size| size + RECORD_HEADER_LEN)
    }

    // ---- Transport events ----

    /// Delivers bytes read from the transport.
    pub fn on_transport_read(&mut self, data: &[u8]) {
        if self.is_destroyed() {
            trace!(len = data.len(), "dropping read after destroy");
            return;
        }

        trace!(len = data.len(), "committing to enc_in");
        self.enc_in.extend_from_slice(data);
        if self.is_client() {
            self.sniffer.feed(data);
        }

        match self.engine {
            Engine::Accepting(_) => self.accept(),
            Engine::Connected(_) => self.cycle(),
            _ => {}
        }
    }

    /// Injects bytes as if they were read from the transport.
    ///
    /// Stops early if the session is destroyed or the transport goes away
    /// while the bytes are processed.
    pub fn receive(&mut self, data: &[u8]) {
        for chunk in data.chunks(CLEAR_OUT_CHUNK_SIZE) {
            if self.is_destroyed() || !self.transport.is_alive() {
                break;
            }
            self.on_transport_read(chunk);
        }
    }

    /// The transport reached end of stream.
    pub fn on_transport_eof(&mut self) {
        if self.is_destroyed() {
            return;
        }
        self.clear_out();
        self.emit_eof();
    }

    /// The transport failed while reading.
    pub fn on_transport_error(&mut self, err: io::Error) {
        if self.is_destroyed() || self.shutdown {
            trace!(%err, "ignoring transport error");
            return;
        }
        self.fail(err.into());
    }

    /// Completes a transport write that returned [`WriteStatus::Pending`].
    pub fn on_transport_write_done(&mut self, result: io::Result<()>) {
        self.after_write(result.map_err(TlsError::from));
    }

    /// Whether completions are queued for [`Wrap::tick`].
    pub fn has_pending_ticks(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Runs completions deferred by earlier calls.
    pub fn tick(&mut self) {
        while let Some(item) = self.deferred.pop_front() {
            match item {
                Deferred::AfterWrite(result) => self.after_write(result),
                Deferred::InvokeQueued(result) => self.invoke_queued(result),
            }
        }
    }

    // ---- Pump ----

    /// Alternates the cleartext and ciphertext pumps until neither moves.
    fn cycle(&mut self) {
        loop {
            let mut progress = self.clear_in();
            progress |= self.clear_out();
            self.enc_out();
            if !progress {
                break;
            }
        }
    }

    /// Feeds `enc_in` to the engine and hands decrypted data to the handler.
    ///
    /// Returns true if bytes were consumed or produced.
    fn clear_out(&mut self) -> bool {
        if self.failure.is_some() {
            return false;
        }
        let Engine::Connected(conn) = &mut self.engine else {
            return false;
        };

        let mut progress = false;
        let mut closed = false;
        let mut chunk = vec![0; CLEAR_OUT_CHUNK_SIZE];
        let mut failure = None;
        loop {
            let mut fed = 0;
            while !self.enc_in.is_empty() {
                let mut rd: &[u8] = &self.enc_in;
                match conn.read_tls(&mut rd) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        self.enc_in.drain(..n);
                        fed += n;
                    }
                }
            }

            if let Err(err) = conn.process_new_packets() {
                failure = Some(err);
                break;
            }

            if !self.established && !conn.is_handshaking() {
                self.established = true;
                debug!(
                    protocol = ?conn.protocol_version(),
                    "handshake done"
                );
                self.handler.on_handshake_done();
                if self.ocsp_requested {
                    let response = self.verify.ocsp_response();
                    self.handler.on_ocsp_response(response.as_deref());
                }
            }

            let mut read = 0;
            loop {
                let result = conn.reader().read(&mut chunk);
                match result {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => {
                        trace!(n, "clear out");
                        read += n;
                        self.handler.on_data(&chunk[..n]);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        closed = true;
                        break;
                    }
                }
            }

            progress |= fed > 0 || read > 0;
            if closed || (fed == 0 && read == 0) {
                break;
            }
        }

        self.drain_sessions();
        self.drain_keylog();

        if let Some(err) = failure {
            let err = self.engine_error(&err);
            // The fatal alert goes out before the error is reported.
            self.enc_out();
            self.fail(err);
            return false;
        }
        if closed {
            self.emit_eof();
        }
        progress
    }

    /// Feeds queued cleartext to the engine once the handshake is done.
    fn clear_in(&mut self) -> bool {
        if self.pending_cleartext.is_empty() {
            return false;
        }
        let Engine::Connected(conn) = &mut self.engine else {
            return false;
        };
        if conn.is_handshaking() {
            return false;
        }

        let result = conn.writer().write(&self.pending_cleartext);
        match result {
            Ok(n) => {
                trace!(n, remaining = self.pending_cleartext.len() - n, "clear in");
                self.pending_cleartext.drain(..n);
                n > 0
            }
            Err(err) => {
                self.pending_cleartext.clear();
                self.complete_write(Err(TlsError::protocol(err)));
                false
            }
        }
    }

    /// Moves engine output into `enc_out`.
    fn drain_engine(&mut self) {
        let Engine::Connected(conn) = &mut self.engine else {
            return;
        };
        while conn.wants_write() {
            match conn.write_tls(&mut self.enc_out) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    /// Flushes `enc_out` to the transport.
    fn enc_out(&mut self) {
        self.drain_engine();

        if self.hello_pending() {
            trace!("enc_out: waiting for the ClientHello");
            return;
        }
        if self.write_size != 0 {
            trace!(write_size = self.write_size, "enc_out: write in flight");
            return;
        }
        if self.awaiting_new_session {
            trace!("enc_out: waiting for new_session_done");
            return;
        }
        if self.is_destroyed() {
            return;
        }

        if self.enc_out.is_empty() {
            if self.pending_cleartext.is_empty() && self.current_write.is_some() {
                self.complete_write(Ok(()));
            }
            return;
        }

        self.write_size = self.enc_out.len();
        trace!(len = self.write_size, "enc_out: writing");
        match self.transport.write(&[IoSlice::new(&self.enc_out)]) {
            Ok(WriteStatus::Done) => self.deferred.push_back(Deferred::AfterWrite(Ok(()))),
            Ok(WriteStatus::Pending) => {}
            Err(err) => {
                self.write_size = 0;
                self.complete_write(Err(err.into()));
            }
        }
    }

    fn after_write(&mut self, result: Result<(), TlsError>) {
        if let Some(id) = self.current_empty_write.take() {
            self.handler.on_write_done(id, result);
            return;
        }
        if self.is_destroyed() {
            // The current write was canceled by destroy.
            self.write_size = 0;
            return;
        }
        if let Err(err) = result {
            self.write_size = 0;
            if self.shutdown {
                trace!(%err, "ignoring write error after shutdown");
                return;
            }
            self.invoke_queued(Err(err));
            return;
        }

        let committed = self.write_size.min(self.enc_out.len());
        self.enc_out.drain(..committed);
        self.clear_in();
        self.write_size = 0;
        self.enc_out();
    }

    /// Completes the current write now, or on the next tick when called
    /// from inside [`Wrap::write`].
    fn complete_write(&mut self, result: Result<(), TlsError>) {
        if self.in_dowrite {
            trace!("deferring write completion");
            self.deferred.push_back(Deferred::InvokeQueued(result));
        } else {
            self.invoke_queued(result);
        }
    }

    fn invoke_queued(&mut self, result: Result<(), TlsError>) {
        if result.is_err() {
            self.pending_cleartext.clear();
        }
        if let Some(id) = self.current_write.take() {
            trace!(?id, ok = result.is_ok(), "write done");
            self.handler.on_write_done(id, result);
        }
    }

    fn engine_error(&self, err: &rustls::Error) -> TlsError {
        match (err, self.verify.error()) {
            (rustls::Error::InvalidCertificate(_), Some(verify)) => TlsError::verification(verify),
            _ => TlsError::from_rustls(err),
        }
    }

    /// Reports a fatal session error. Only the first one is reported.
    fn fail(&mut self, err: TlsError) {
        if self.failure.is_some() {
            return;
        }
        self.failure = Some(err.duplicate());
        debug!(code = err.code(), "session error");
        if let Some(id) = self.current_write.take() {
            self.pending_cleartext.clear();
            self.handler.on_write_done(id, Err(err.duplicate()));
        }
        self.handler.on_error(err);
    }

    fn emit_eof(&mut self) {
        if !self.eof_emitted {
            self.eof_emitted = true;
            debug!("end of cleartext stream");
            self.handler.on_eof();
        }
    }

    fn drain_sessions(&mut self) {
        if !self.config.enable_session_callbacks() {
            return;
        }
        match self.config.role() {
            Role::Server => {
                for session in self.server_sessions.take_pending() {
                    trace!(id = %hex::encode(session.id()), "new server session");
                    self.awaiting_new_session = true;
                    self.handler.on_new_session(Session::Server(session));
                }
            }
            Role::Client => {
                let issued = match &self.client_sessions {
                    Some(bridge) => bridge.take_issued(),
                    None => Vec::new(),
                };
                for session in issued {
                    self.handler.on_new_session(Session::Client(session));
                }
            }
        }
    }

    fn drain_keylog(&mut self) {
        let lines = self.key_log.take();
        if self.config.enable_keylog() {
            for line in lines {
                self.handler.on_keylog(&line);
            }
        }
    }

    // ---- Server handshake ----

    fn accept(&mut self) {
        let Engine::Accepting(acceptor) = &mut self.engine else {
            return;
        };
        while !self.enc_in.is_empty() {
            let mut rd: &[u8] = &self.enc_in;
            match acceptor.read_tls(&mut rd) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    self.enc_in.drain(..n);
                }
            }
        }

        match acceptor.accept() {
            Ok(None) => {}
            Ok(Some(accepted)) => self.on_client_hello(accepted),
            Err(err) => {
                self.handshake_started = true;
                self.reject_hello(&err, TlsError::from_rustls(&err));
            }
        }
    }

    fn on_client_hello(&mut self, accepted: Accepted) {
        self.servername = accepted.client_hello().server_name().map(str::to_owned);
        self.handshake_started = true;
        debug!(servername = ?self.servername, "received ClientHello");
        self.handler.on_handshake_start();

        if self.config.enable_cert_cb() {
            self.engine = Engine::AwaitingCert(Box::new(accepted));
            self.cert_cb = CertCb::Running;
            debug!("waiting for certificate selection");
            self.handler.on_cert_cb(self.servername.as_deref());
        } else {
            self.finish_accept(accepted);
        }
    }

    fn finish_accept(&mut self, accepted: Accepted) {
        let context = match &self.sni_context {
            Some(context) => Arc::clone(context),
            None => Arc::clone(&self.context),
        };
        let tickets = Arc::new(context.session_ticketer());
        self.tickets = Some(Arc::clone(&tickets));

        let hooks = ServerHooks {
            alpn_protocols: self.config.alpn_protocols().to_vec(),
            request_cert: self.config.request_cert(),
            reject_unauthorized: self.config.reject_unauthorized(),
            verify: self.verify.clone(),
            sessions: Arc::clone(&self.server_sessions),
            tickets,
            key_log: self.key_log.clone(),
            max_fragment_size: self.max_fragment_size(),
            ocsp_response: self.ocsp_response.clone(),
        };
        let config = match context.server_config(&hooks) {
            Ok(config) => config,
            Err(err) => {
                warn!(code = err.code(), "failed to configure server session");
                self.engine = Engine::Failed;
                self.queue_alert(rustls::AlertDescription::InternalError);
                self.enc_out();
                self.fail(err);
                return;
            }
        };

        match accepted.into_connection(config) {
            Ok(conn) => {
                let mut conn = Connection::from(conn);
                if let Some(limit) = self.config.buffer_limit() {
                    conn.set_buffer_limit(Some(limit));
                }
                self.engine = Engine::Connected(Box::new(conn));
                self.cycle();
            }
            Err(err) => self.reject_hello(&err, TlsError::from_rustls(&err)),
        }
    }

    /// Sends the alert for a rejected ClientHello and reports `report`.
    fn reject_hello(&mut self, err: &rustls::Error, report: TlsError) {
        debug!(%err, "rejecting ClientHello");
        self.engine = Engine::Failed;
        self.queue_alert(hello_rejection_alert(err));
        self.drain_keylog();
        self.enc_out();
        self.fail(report);
    }

    fn queue_alert(&mut self, description: rustls::AlertDescription) {
        self.enc_out.extend_from_slice(&[
            CONTENT_ALERT,
            0x03,
            0x03,
            0x00,
            0x02,
            ALERT_LEVEL_FATAL,
            description.get_u8(),
        ]);
    }

    /// Switches the session to another context for certificate selection.
    ///
    /// Only valid while the certificate callback is running.
    pub fn set_sni_context(&mut self, context: Arc<SecureContext>) -> Result<(), TlsError> {
        if self.cert_cb != CertCb::Running {
            return Err(TlsError::state(
                "SNI context can only be set from the certificate callback",
            ));
        }
        context.check_role(Role::Server)?;
        debug!(servername = ?self.servername, "switching to SNI context");
        self.sni_context = Some(context);
        Ok(())
    }

    /// Resumes a handshake suspended in [`SessionHandler::on_cert_cb`].
    pub fn cert_cb_done(&mut self) -> Result<(), TlsError> {
        if self.cert_cb != CertCb::Running {
            return Err(TlsError::state("Certificate callback is not running"));
        }
        match std::mem::replace(&mut self.engine, Engine::Failed) {
            Engine::AwaitingCert(accepted) => {
                self.cert_cb = CertCb::Done;
                debug!("certificate selected");
                self.finish_accept(*accepted);
                Ok(())
            }
            other => {
                self.engine = other;
                Err(TlsError::state("Certificate callback is not running"))
            }
        }
    }

    // ---- Client handshake ----

    /// Starts the client handshake.
    pub fn start(&mut self) -> Result<(), TlsError> {
        if !self.is_client() {
            return Err(TlsError::state("Only client sessions can be started"));
        }
        if !matches!(self.engine, Engine::Idle) {
            return Err(TlsError::state("Session already started"));
        }

        let bridge = Arc::new(ClientSessionBridge::new(self.client_session.as_ref()));
        self.client_sessions = Some(Arc::clone(&bridge));
        let hooks = ClientHooks {
            alpn_protocols: self.config.alpn_protocols().to_vec(),
            check_hostname: self.config.server_name().is_some(),
            reject_unauthorized: self.config.reject_unauthorized(),
            verify: self.verify.clone(),
            sessions: bridge,
            key_log: self.key_log.clone(),
            max_fragment_size: self.max_fragment_size(),
            enable_sni: self.config.server_name().is_some(),
        };
        let config = self.context.client_config(&hooks)?;

        let name = self.config.server_name().unwrap_or("localhost");
        let server_name = ServerName::try_from(name)
            .map_err(|_| TlsError::invalid_arg(format!("Invalid server name: {name}")))?;
        let conn = ClientConnection::new(config, server_name).map_err(|err| TlsError::from_rustls(&err))?;
        let mut conn = Connection::from(conn);
        if let Some(limit) = self.config.buffer_limit() {
            conn.set_buffer_limit(Some(limit));
        }

        self.engine = Engine::Connected(Box::new(conn));
        self.handshake_started = true;
        debug!(server_name = name, "starting handshake");
        self.handler.on_handshake_start();
        self.cycle();
        Ok(())
    }

    // ---- Application operations ----

    /// Writes cleartext. Completion is reported through
    /// [`SessionHandler::on_write_done`] with the returned id.
    ///
    /// A zero-length write flushes pending output and completes once the
    /// transport completes an empty write.
    pub fn write(&mut self, bufs: &[&[u8]]) -> Result<WriteId, TlsError> {
        if self.is_destroyed() {
            return Err(TlsError::protocol("Write after DestroySSL"));
        }
        if self.current_write.is_some() || self.current_empty_write.is_some() {
            return Err(TlsError::state("A write is already in progress"));
        }

        let id = WriteId(self.next_write_id);
        self.next_write_id += 1;

        if let Some(err) = &self.failure {
            trace!(?id, "write after session error");
            self.current_write = Some(id);
            self.pending_cleartext.clear();
            self.deferred
                .push_back(Deferred::InvokeQueued(Err(err.duplicate())));
            return Ok(id);
        }

        let length: usize = bufs.iter().map(|buf| buf.len()).sum();

        if length == 0 {
            self.clear_out();
            self.drain_engine();
            if self.enc_out.is_empty() {
                trace!(?id, "empty write");
                self.current_empty_write = Some(id);
                match self.transport.write(&[]) {
                    Ok(WriteStatus::Done) => {
                        self.deferred.push_back(Deferred::AfterWrite(Ok(())))
                    }
                    Ok(WriteStatus::Pending) => {}
                    Err(err) => self.deferred.push_back(Deferred::AfterWrite(Err(err.into()))),
                }
                return Ok(id);
            }
            self.current_write = Some(id);
            self.in_dowrite = true;
            self.enc_out();
            self.in_dowrite = false;
            return Ok(id);
        }

        self.current_write = Some(id);
        let mut written = 0;
        if let [buf] = bufs {
            if let Engine::Connected(conn) = &mut self.engine {
                if !conn.is_handshaking() {
                    written = match conn.writer().write(buf) {
                        Ok(n) => n,
                        Err(err) => {
                            trace!(%err, "direct write refused, queueing cleartext");
                            0
                        }
                    };
                }
            }
        }
        let mut skip = written;
        for buf in bufs {
            if skip >= buf.len() {
                skip -= buf.len();
                continue;
            }
            self.pending_cleartext.extend_from_slice(&buf[skip..]);
            skip = 0;
        }
        trace!(?id, length, written, "write");

        self.clear_in();
        self.in_dowrite = true;
        self.enc_out();
        self.in_dowrite = false;
        Ok(id)
    }

    /// Sends close_notify and shuts down the transport's write half.
    pub fn shutdown(&mut self) -> Result<(), TlsError> {
        if let Engine::Connected(conn) = &mut self.engine {
            conn.send_close_notify();
        }
        self.shutdown = true;
        debug!("shutting down");
        self.enc_out();
        self.transport.shutdown().map_err(TlsError::from)
    }

    /// Releases the engine and cancels the current write.
    ///
    /// Calling it again has no effect.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        debug!("destroying session");
        self.engine = Engine::Destroyed;
        self.pending_cleartext.clear();
        if let Some(id) = self.current_write.take() {
            self.handler.on_write_done(id, Err(TlsError::canceled()));
        }
        self.enc_in.clear();
        self.enc_out.clear();
        self.sni_context = None;
        self.transport.read_stop();
    }

    /// Bytes of ciphertext waiting for the transport.
    pub fn get_write_queue_size(&self) -> usize {
        self.enc_out.len()
    }

    // ---- Session options ----

    /// Sets whether to request a peer certificate and whether to fail the
    /// handshake when it does not verify.
    pub fn set_verify_mode(&mut self, request_cert: bool, reject_unauthorized: bool) {
        self.config.set_verify_mode(request_cert, reject_unauthorized);
    }

    /// Reports new sessions through [`SessionHandler::on_new_session`].
    pub fn enable_session_callbacks(&mut self) {
        self.config.set_session_callbacks();
        self.server_sessions.set_enabled(true);
    }

    /// Reports key material through [`SessionHandler::on_keylog`].
    pub fn enable_keylog(&mut self) {
        self.config.set_keylog();
        self.key_log.enabled.store(true, Ordering::Relaxed);
    }

    /// Defers certificate selection to [`SessionHandler::on_cert_cb`].
    pub fn enable_cert_cb(&mut self) -> Result<(), TlsError> {
        if self.is_client() {
            return Err(TlsError::state("Certificate callback is only valid on servers"));
        }
        self.config.set_cert_cb();
        Ok(())
    }

    /// Sets the ALPN protocols offered or accepted, in preference order.
    pub fn set_alpn_protocols(&mut self, protocols: Vec<Vec<u8>>) {
        self.config.set_alpn_protocols(protocols);
    }

    /// The negotiated ALPN protocol.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.connection().and_then(|conn| conn.alpn_protocol())
    }

    /// Sets the maximum plaintext bytes per record.
    ///
    /// Takes effect for engines created after the call.
    pub fn set_max_send_fragment(&mut self, size: usize) -> Result<(), TlsError> {
        if !(MIN_SEND_FRAGMENT..=MAX_SEND_FRAGMENT).contains(&size) {
            return Err(TlsError::invalid_arg(format!(
                "max_send_fragment must be between {MIN_SEND_FRAGMENT} and {MAX_SEND_FRAGMENT}"
            )));
        }
        if self.connection().is_some() {
            return Err(TlsError::state(
                "max_send_fragment must be set before the handshake",
            ));
        }
        self.config.set_max_send_fragment(size);
        Ok(())
    }

    /// The server name: requested by the peer on servers, configured on
    /// clients.
    pub fn get_servername(&self) -> Option<&str> {
        match self.config.role() {
            Role::Server => self.servername.as_deref(),
            Role::Client => self.config.server_name(),
        }
    }

    /// Sets the server name a client sends.
    pub fn set_servername(&mut self, name: &str) -> Result<(), TlsError> {
        if !self.is_client() {
            return Err(TlsError::state("Only clients send a server name"));
        }
        if !matches!(self.engine, Engine::Idle) {
            return Err(TlsError::state("Already started"));
        }
        self.config.set_server_name(name.to_string());
        Ok(())
    }

    // ---- Sessions ----

    /// Offers a previous session for resumption. Clients only, before
    /// [`Wrap::start`].
    pub fn set_session(&mut self, session: ClientSession) -> Result<(), TlsError> {
        if !self.is_client() {
            return Err(TlsError::state("Only clients can set a session"));
        }
        if !matches!(self.engine, Engine::Idle) {
            return Err(TlsError::state("Already started"));
        }
        self.client_session = Some(session);
        Ok(())
    }

    /// The current session, if any.
    pub fn get_session(&self) -> Option<Session> {
        match self.config.role() {
            Role::Server => self.server_sessions.last().map(Session::Server),
            Role::Client => match &self.client_sessions {
                Some(bridge) => bridge.latest().map(Session::Client),
                None => self.client_session.clone().map(Session::Client),
            },
        }
    }

    /// Makes a session cached by the application available for resumption.
    /// Servers only.
    pub fn load_session(&mut self, session: ServerSession) -> Result<(), TlsError> {
        if self.is_client() {
            return Err(TlsError::state("Only servers can load a session"));
        }
        self.server_sessions.load(session);
        Ok(())
    }

    /// Whether the handshake resumed a previous session.
    pub fn is_session_reused(&self) -> bool {
        match self.config.role() {
            Role::Server => {
                self.server_sessions.hit()
                    || self.tickets.as_ref().is_some_and(|tickets| tickets.decrypted())
            }
            Role::Client => {
                self.established
                    && !self.verify.called()
                    && self
                        .client_sessions
                        .as_ref()
                        .is_some_and(|bridge| bridge.offered())
            }
        }
    }

    /// The last session ticket this server issued.
    pub fn get_tls_ticket(&self) -> Option<Vec<u8>> {
        self.tickets.as_ref().and_then(|tickets| tickets.last_issued())
    }

    /// Releases output held back after [`SessionHandler::on_new_session`].
    pub fn new_session_done(&mut self) {
        self.awaiting_new_session = false;
        self.cycle();
    }

    // ---- OCSP ----

    /// Reports the server's OCSP response through
    /// [`SessionHandler::on_ocsp_response`]. Clients only.
    pub fn request_ocsp(&mut self) -> Result<(), TlsError> {
        if !self.is_client() {
            return Err(TlsError::state("Only clients request OCSP"));
        }
        self.ocsp_requested = true;
        Ok(())
    }

    /// Sets the OCSP response a server staples. Must be called before the
    /// certificate is selected.
    pub fn set_ocsp_response(&mut self, response: Vec<u8>) -> Result<(), TlsError> {
        if self.is_client() {
            return Err(TlsError::state("Only servers send an OCSP response"));
        }
        self.ocsp_response = Some(response);
        Ok(())
    }

    // ---- Introspection ----

    /// The negotiated protocol version, e.g. `TLSv1.3`.
    pub fn get_protocol(&self) -> Option<&'static str> {
        self.connection()
            .and_then(|conn| conn.protocol_version())
            .and_then(ProtocolVersion::from_engine)
            .map(|version| version.name())
    }

    /// The negotiated cipher.
    pub fn get_cipher(&self) -> Option<CipherInfo> {
        self.connection()
            .and_then(|conn| conn.negotiated_cipher_suite())
            .map(cipher_info)
    }

    /// The ephemeral key exchange of a client session.
    pub fn get_ephemeral_key_info(&self) -> Option<EphemeralKeyInfo> {
        if !self.is_client() {
            return None;
        }
        self.sniffer.key_info()
    }

    /// The peer's certificate.
    ///
    /// With `detailed`, issuer certificates are linked through
    /// [`CertificateInfo::issuer_certificate`], taken from the peer's chain
    /// and then from the context's CA certificates.
    pub fn get_peer_certificate(&self, detailed: bool) -> Result<Option<CertificateInfo>, TlsError> {
        let Some(chain) = self.connection().and_then(|conn| conn.peer_certificates()) else {
            return Ok(None);
        };
        let Some(leaf) = chain.first() else {
            return Ok(None);
        };
        if !detailed {
            return CertificateInfo::from_der(&leaf.0).map(Some);
        }

        let ca_certs = self.active_context().ca_certs();
        let limit = chain.len() + ca_certs.len();
        let mut remaining: Vec<&[u8]> = chain[1..].iter().map(|cert| cert.0.as_slice()).collect();
        let mut path: Vec<&[u8]> = vec![&leaf.0];
        while path.len() <= limit {
            let Some(&current) = path.last() else { break };
            if x509::is_self_issued(current) {
                break;
            }
            if let Some(pos) = remaining.iter().position(|c| x509::is_issued_by(current, c)) {
                path.push(remaining.remove(pos));
            } else if let Some(ca) = ca_certs.iter().find(|ca| x509::is_issued_by(current, ca)) {
                path.push(ca);
            } else {
                break;
            }
        }

        let mut info: Option<CertificateInfo> = None;
        for der in path.iter().rev() {
            let mut cert = CertificateInfo::from_der(der)?;
            cert.issuer_certificate = info.take().map(Box::new);
            info = Some(cert);
        }
        Ok(info)
    }

    /// This side's certificate.
    pub fn get_certificate(&self) -> Result<Option<CertificateInfo>, TlsError> {
        self.active_context()
            .get_certificate()
            .map(CertificateInfo::from_der)
            .transpose()
    }

    /// The verification result for the peer certificate.
    ///
    /// A peer that presented no certificate yields
    /// [`VerifyError::UnableToGetIssuerCert`].
    pub fn verify_error(&self) -> Option<VerifyError> {
        if self.is_destroyed() {
            return None;
        }
        if let Some(err) = self.verify.error() {
            return Some(err);
        }
        let has_peer_cert = self
            .connection()
            .and_then(|conn| conn.peer_certificates())
            .is_some_and(|chain| !chain.is_empty());
        if !self.verify.called() && !has_peer_cert {
            return Some(VerifyError::UnableToGetIssuerCert);
        }
        None
    }

    /// The Finished message this side sent. The engine does not expose it.
    pub fn get_finished(&self) -> Option<Vec<u8>> {
        None
    }

    /// The Finished message the peer sent. The engine does not expose it.
    pub fn get_peer_finished(&self) -> Option<Vec<u8>> {
        None
    }

    /// Derives keying material from the session secrets.
    pub fn export_keying_material(
        &self,
        length: usize,
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<Vec<u8>, TlsError> {
        let conn = match self.connection() {
            Some(conn) if self.established => conn,
            _ => {
                return Err(TlsError::state(
                    "TLS socket connection must be securely established",
                ))
            }
        };
        conn.export_keying_material(vec![0; length], label, context)
            .map_err(|err| TlsError::from_rustls(&err))
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use rstest::rstest;
    use tlswrap_fixtures::{CA_CERT_PEM, SERVER_CERT_PEM, SERVER_DOMAIN, SERVER_KEY_PEM};

    use super::*;
    use crate::{ErrorKind as TlsErrorKind, MemoryTransport};

    #[derive(Debug, Default)]
    struct Events {
        data: Vec<u8>,
        writes: Vec<(WriteId, Result<(), String>)>,
        errors: Vec<String>,
        handshakes: usize,
        eof: usize,
    }

    impl SessionHandler for Events {
        fn on_data(&mut self, data: &[u8]) {
            self.data.extend_from_slice(data);
        }

        fn on_eof(&mut self) {
            self.eof += 1;
        }

        fn on_error(&mut self, err: TlsError) {
            self.errors.push(err.code().to_string());
        }

        fn on_handshake_done(&mut self) {
            self.handshakes += 1;
        }

        fn on_write_done(&mut self, id: WriteId, result: Result<(), TlsError>) {
            self.writes
                .push((id, result.map_err(|err| err.code().to_string())));
        }
    }

    type TestWrap = Wrap<MemoryTransport, Events>;

    fn server_context() -> Arc<SecureContext> {
        let mut context = SecureContext::init(None, None, None).unwrap();
        context.set_key(SERVER_KEY_PEM, None).unwrap();
        context.set_cert(SERVER_CERT_PEM).unwrap();
        Arc::new(context)
    }

    fn client_context() -> Arc<SecureContext> {
        let mut context = SecureContext::init(None, None, None).unwrap();
        context.add_ca_cert(CA_CERT_PEM).unwrap();
        Arc::new(context)
    }

    fn pair() -> (TestWrap, TestWrap) {
        let client = Wrap::new(
            client_context(),
            WrapConfig::client(SERVER_DOMAIN),
            MemoryTransport::new(),
            Events::default(),
        )
        .unwrap();
        let server = Wrap::new(
            server_context(),
            WrapConfig::server(),
            MemoryTransport::new(),
            Events::default(),
        )
        .unwrap();
        (client, server)
    }

    fn pump(client: &mut TestWrap, server: &mut TestWrap) {
        for _ in 0..64 {
            client.tick();
            server.tick();
            let to_server = client.transport().take_outbox();
            let to_client = server.transport().take_outbox();
            if to_server.is_empty()
                && to_client.is_empty()
                && !client.has_pending_ticks()
                && !server.has_pending_ticks()
            {
                return;
            }
            server.on_transport_read(&to_server);
            client.on_transport_read(&to_client);
        }
        panic!("sessions did not settle");
    }

    #[test]
    fn test_states_through_handshake() {
        let (mut client, mut server) = pair();
        assert_eq!(client.state(), State::Created);
        assert_eq!(server.state(), State::Created);

        client.start().unwrap();
        assert_eq!(client.state(), State::Handshaking);
        assert!(client.start().is_err());

        pump(&mut client, &mut server);
        assert_eq!(client.state(), State::Established);
        assert_eq!(server.state(), State::Established);
        assert_eq!(client.handler().handshakes, 1);
        assert_eq!(server.handler().handshakes, 1);

        client.shutdown().unwrap();
        assert_eq!(client.state(), State::ShuttingDown);
        client.destroy();
        assert_eq!(client.state(), State::Destroyed);
    }

    #[test]
    fn test_sync_write_completes_on_tick() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        let id = client.write(&[b"hello ", b"world"]).unwrap();
        assert!(client.handler().writes.is_empty());
        assert!(client.has_pending_ticks());

        pump(&mut client, &mut server);
        assert_eq!(client.handler().writes, vec![(id, Ok(()))]);
        assert_eq!(server.handler().data, b"hello world");
    }

    #[test]
    fn test_second_write_while_pending_is_rejected() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        client.write(&[b"one"]).unwrap();
        let err = client.write(&[b"two"]).unwrap_err();
        assert_eq!(err.kind(), TlsErrorKind::State);
    }

    #[test]
    fn test_write_before_handshake_is_held() {
        let (mut client, mut server) = pair();
        let id = client.write(&[b"early"]).unwrap();
        assert_eq!(client.get_write_queue_size(), 0);

        client.start().unwrap();
        pump(&mut client, &mut server);
        assert_eq!(server.handler().data, b"early");
        assert_eq!(client.handler().writes, vec![(id, Ok(()))]);
    }

    #[test]
    fn test_empty_write_completes_through_transport() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        let writes = client.transport().write_count();
        let id = client.write(&[]).unwrap();
        assert_eq!(client.transport().write_count(), writes + 1);
        client.tick();
        assert_eq!(client.handler().writes, vec![(id, Ok(()))]);
    }

    #[test]
    fn test_async_transport_write() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        client.transport().set_async(true);
        let id = client.write(&[b"slow"]).unwrap();
        assert!(client.get_write_queue_size() > 0);
        assert!(!client.has_pending_ticks());

        let bytes = client.transport().take_outbox();
        client.on_transport_write_done(Ok(()));
        assert_eq!(client.get_write_queue_size(), 0);
        assert_eq!(client.handler().writes, vec![(id, Ok(()))]);

        server.on_transport_read(&bytes);
        assert_eq!(server.handler().data, b"slow");
    }

    #[rstest]
    #[case::broken_pipe(ErrorKind::BrokenPipe, "EPIPE")]
    #[case::other(ErrorKind::Other, "EIO")]
    fn test_transport_write_error_fails_write(#[case] kind: ErrorKind, #[case] code: &str) {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        client.transport().fail_writes(Some(kind));
        let id = client.write(&[b"lost"]).unwrap();
        client.tick();
        assert_eq!(client.handler().writes, vec![(id, Err(code.to_string()))]);
    }

    #[test]
    fn test_destroy_cancels_pending_write_once() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        client.transport().set_async(true);
        let id = client.write(&[b"never"]).unwrap();
        client.destroy();
        client.destroy();
        client.on_transport_write_done(Ok(()));
        client.tick();

        assert_eq!(
            client.handler().writes,
            vec![(id, Err("ECANCELED".to_string()))]
        );
        assert!(!client.transport().is_reading());

        let err = client.write(&[b"again"]).unwrap_err();
        assert_eq!(err.code(), "EPROTO");
        assert_eq!(err.msg(), "Write after DestroySSL");
    }

    #[test]
    fn test_peer_close_emits_eof_once() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);

        client.shutdown().unwrap();
        assert!(client.transport().is_shutdown());
        pump(&mut client, &mut server);
        server.on_transport_eof();
        assert_eq!(server.handler().eof, 1);
    }

    #[test]
    fn test_garbage_input_reports_one_error() {
        let (_, mut server) = pair();
        server.on_transport_read(&[0x16, 0x03, 0x01, 0x00, 0x05, 0xff, 0xff, 0xff, 0xff, 0xff]);
        server.on_transport_read(b"more garbage");

        assert_eq!(server.handler().errors.len(), 1);
        let alert = server.transport().take_outbox();
        assert_eq!(&alert[..6], &[0x15, 0x03, 0x03, 0x00, 0x02, 0x02]);
    }

    #[test]
    fn test_cert_cb_done_requires_running_callback() {
        let (_, mut server) = pair();
        let err = server.cert_cb_done().unwrap_err();
        assert_eq!(err.kind(), TlsErrorKind::State);
        assert!(server.set_sni_context(server_context()).is_err());
    }

    #[test]
    fn test_role_specific_operations() {
        let (mut client, mut server) = pair();
        assert!(server.start().is_err());
        assert!(server.request_ocsp().is_err());
        assert!(client.enable_cert_cb().is_err());
        assert!(client.set_ocsp_response(vec![1]).is_err());
        assert!(server.set_servername("example.com").is_err());

        client.set_servername("other.example").unwrap();
        assert_eq!(client.get_servername(), Some("other.example"));
        assert_eq!(server.get_servername(), None);
        assert_eq!(server.get_ephemeral_key_info(), None);
    }

    #[test]
    fn test_max_send_fragment_bounds() {
        let (mut client, mut server) = pair();
        assert!(client.set_max_send_fragment(511).is_err());
        assert!(client.set_max_send_fragment(16385).is_err());
        client.set_max_send_fragment(512).unwrap();

        client.start().unwrap();
        pump(&mut client, &mut server);
        assert!(client.set_max_send_fragment(1024).is_err());

        let payload = vec![7u8; 2000];
        client.write(&[&payload]).unwrap();
        pump(&mut client, &mut server);
        assert_eq!(server.handler().data, payload);
    }

    #[test]
    fn test_export_keying_material_requires_handshake() {
        let (mut client, mut server) = pair();
        assert_eq!(
            client
                .export_keying_material(32, b"EXPORTER-test", None)
                .unwrap_err()
                .kind(),
            TlsErrorKind::State
        );

        client.start().unwrap();
        pump(&mut client, &mut server);
        let client_key = client
            .export_keying_material(32, b"EXPORTER-test", Some(b"ctx"))
            .unwrap();
        let server_key = server
            .export_keying_material(32, b"EXPORTER-test", Some(b"ctx"))
            .unwrap();
        assert_eq!(client_key, server_key);
        assert_eq!(client_key.len(), 32);
    }

    #[test]
    fn test_finished_messages_are_not_exposed() {
        let (mut client, mut server) = pair();
        client.start().unwrap();
        pump(&mut client, &mut server);
        assert_eq!(client.get_finished(), None);
        assert_eq!(server.get_peer_finished(), None);
    }
}
