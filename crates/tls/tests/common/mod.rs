#![allow(dead_code)]

use std::sync::Arc;

use tls_wrap::{
    MemoryTransport, SecureContext, Session, SessionHandler, TlsError, Wrap, WrapConfig, WriteId,
};
use tlswrap_fixtures::{
    ALT_CERT_PEM, ALT_KEY_PEM, CA_CERT_PEM, CLIENT_CERT_PEM, CLIENT_KEY_PEM, SERVER_CERT_PEM,
    SERVER_DOMAIN, SERVER_KEY_PEM,
};

/// Records every event a session reports.
#[derive(Debug, Default)]
pub struct Recorder {
    pub data: Vec<u8>,
    pub largest_chunk: usize,
    pub eof: usize,
    pub errors: Vec<TlsError>,
    pub handshake_start: usize,
    pub handshake_done: usize,
    pub writes: Vec<(WriteId, Result<(), TlsError>)>,
    pub sessions: Vec<Session>,
    pub keylog: Vec<Vec<u8>>,
    pub cert_cb: Vec<Option<String>>,
    pub ocsp: Vec<Option<Vec<u8>>>,
}

impl Recorder {
    pub fn error_code(&self) -> Option<&str> {
        self.errors.first().map(TlsError::code)
    }

    pub fn write_result(&self, id: WriteId) -> Option<Result<(), &str>> {
        self.writes
            .iter()
            .find(|(write, _)| *write == id)
            .map(|(_, result)| result.as_ref().map(|_| ()).map_err(TlsError::code))
    }
}

impl SessionHandler for Recorder {
    fn on_data(&mut self, data: &[u8]) {
        self.largest_chunk = self.largest_chunk.max(data.len());
        self.data.extend_from_slice(data);
    }

    fn on_eof(&mut self) {
        self.eof += 1;
    }

    fn on_error(&mut self, err: TlsError) {
        self.errors.push(err);
    }

    fn on_handshake_start(&mut self) {
        self.handshake_start += 1;
    }

    fn on_handshake_done(&mut self) {
        self.handshake_done += 1;
    }

    fn on_write_done(&mut self, id: WriteId, result: Result<(), TlsError>) {
        self.writes.push((id, result));
    }

    fn on_new_session(&mut self, session: Session) {
        self.sessions.push(session);
    }

    fn on_keylog(&mut self, line: &[u8]) {
        self.keylog.push(line.to_vec());
    }

    fn on_cert_cb(&mut self, servername: Option<&str>) {
        self.cert_cb.push(servername.map(str::to_owned));
    }

    fn on_ocsp_response(&mut self, response: Option<&[u8]>) {
        self.ocsp.push(response.map(<[u8]>::to_vec));
    }
}

pub type TestSession = Wrap<MemoryTransport, Recorder>;

pub fn server_context() -> SecureContext {
    server_context_with(None)
}

pub fn server_context_with(method: Option<&str>) -> SecureContext {
    let mut context = SecureContext::init(method, None, None).unwrap();
    context.set_key(SERVER_KEY_PEM, None).unwrap();
    context.set_cert(SERVER_CERT_PEM).unwrap();
    context.add_ca_cert(CA_CERT_PEM).unwrap();
    context
}

pub fn alt_context() -> SecureContext {
    let mut context = SecureContext::init(None, None, None).unwrap();
    context.set_key(ALT_KEY_PEM, None).unwrap();
    context.set_cert(ALT_CERT_PEM).unwrap();
    context
}

pub fn client_context() -> SecureContext {
    client_context_with(None)
}

pub fn client_context_with(method: Option<&str>) -> SecureContext {
    let mut context = SecureContext::init(method, None, None).unwrap();
    context.add_ca_cert(CA_CERT_PEM).unwrap();
    context
}

pub fn client_context_with_cert() -> SecureContext {
    let mut context = client_context();
    context.set_key(CLIENT_KEY_PEM, None).unwrap();
    context.set_cert(CLIENT_CERT_PEM).unwrap();
    context
}

/// Logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn make_client(context: Arc<SecureContext>, config: WrapConfig) -> TestSession {
    init_tracing();
    Wrap::new(context, config, MemoryTransport::new(), Recorder::default()).unwrap()
}

pub fn make_server(context: Arc<SecureContext>, config: WrapConfig) -> TestSession {
    Wrap::new(context, config, MemoryTransport::new(), Recorder::default()).unwrap()
}

/// A client for `SERVER_DOMAIN` and a server, both with default contexts.
pub fn make_pair() -> (TestSession, TestSession) {
    (
        make_client(
            Arc::new(client_context()),
            WrapConfig::client(SERVER_DOMAIN),
        ),
        make_server(Arc::new(server_context()), WrapConfig::server()),
    )
}

/// Moves bytes between the two sessions and runs their deferred work until
/// neither has anything left to do.
///
/// Returns the number of rounds it took.
pub fn pump(client: &mut TestSession, server: &mut TestSession) -> usize {
    for round in 0..256 {
        client.tick();
        server.tick();

        let to_server = client.transport().take_outbox();
        let to_client = server.transport().take_outbox();
        if to_server.is_empty()
            && to_client.is_empty()
            && !client.has_pending_ticks()
            && !server.has_pending_ticks()
        {
            return round;
        }

        if !to_server.is_empty() {
            server.on_transport_read(&to_server);
        }
        if !to_client.is_empty() {
            client.on_transport_read(&to_client);
        }
    }
    panic!("sessions did not settle");
}

pub fn handshake(client: &mut TestSession, server: &mut TestSession) {
    client.start().unwrap();
    pump(client, server);
}
