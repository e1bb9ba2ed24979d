use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rustls::{
    client::{
        ClientSessionMemoryCache, ClientSessionStore, ServerName, Tls12ClientSessionValue,
        Tls13ClientSessionValue,
    },
    server::StoresServerSessions,
    NamedGroup,
};

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::TlsError;

/// Largest session a server will hand to the application for caching.
pub const MAX_SESSION_SIZE: usize = 10 * 1024;

const CLIENT_CACHE_SIZE: usize = 32;

/// A resumable session.
#[derive(Debug, Clone)]
pub enum Session {
    /// Server-side session state, keyed by session id.
    Server(ServerSession),
    /// Client-side resumption handle.
    Client(ClientSession),
}

/// Server session state as stored by the application.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerSession {
    id: Vec<u8>,
    value: Vec<u8>,
}

impl fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &hex::encode(&self.id))
            .field("len", &self.value.len())
            .finish()
    }
}

impl ServerSession {
    pub(crate) fn new(id: Vec<u8>, value: Vec<u8>) -> Self {
        Self { id, value }
    }

    /// The session id.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Encodes the session as `u16 id length || id || value`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.id.len() + self.value.len());
        out.extend_from_slice(&(self.id.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&self.value);
        out
    }

    /// Decodes a session produced by [`ServerSession::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TlsError> {
        if bytes.len() > MAX_SESSION_SIZE + 2 {
            return Err(TlsError::invalid_arg("Session is too large"));
        }
        let id_len = match bytes {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]) as usize,
            _ => return Err(TlsError::invalid_arg("Bad session data")),
        };
        if bytes.len() < 2 + id_len {
            return Err(TlsError::invalid_arg("Bad session data"));
        }
        Ok(Self {
            id: bytes[2..2 + id_len].to_vec(),
            value: bytes[2 + id_len..].to_vec(),
        })
    }

    fn len(&self) -> usize {
        self.id.len() + self.value.len()
    }
}

/// Client resumption state for one server name.
///
/// The handle refers to in-process engine state and cannot be serialized.
/// Passing it to [`Wrap::set_session`](crate::Wrap::set_session) on a new
/// client session offers resumption to the same server.
#[derive(Clone)]
pub struct ClientSession {
    store: Arc<dyn ClientSessionStore>,
    server_name: ServerName,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    /// The server name the session was negotiated with.
    pub fn server_name(&self) -> &ServerName {
        &self.server_name
    }

    pub(crate) fn store(&self) -> Arc<dyn ClientSessionStore> {
        Arc::clone(&self.store)
    }
}

#[derive(Debug, Default)]
struct ServerCache {
    enabled: bool,
    pending: Vec<ServerSession>,
    loaded: HashMap<Vec<u8>, Vec<u8>>,
    last: Option<ServerSession>,
}

/// Server-side session storage for one session.
///
/// Sessions are never kept beyond the connection: new ones are queued for
/// the application and lookups only find sessions the application loaded.
#[derive(Debug, Default)]
pub(crate) struct ServerSessionBridge {
    cache: Mutex<ServerCache>,
    hit: AtomicBool,
}

impl ServerSessionBridge {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            cache: Mutex::new(ServerCache {
                enabled,
                ..Default::default()
            }),
            hit: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.cache.lock().enabled = enabled;
    }

    /// Makes a session available for resumption.
    pub(crate) fn load(&self, session: ServerSession) {
        let mut cache = self.cache.lock();
        cache.loaded.insert(session.id.clone(), session.value.clone());
        cache.last = Some(session);
    }

    pub(crate) fn take_pending(&self) -> Vec<ServerSession> {
        std::mem::take(&mut self.cache.lock().pending)
    }

    /// The most recent session created or loaded.
    pub(crate) fn last(&self) -> Option<ServerSession> {
        self.cache.lock().last.clone()
    }

    pub(crate) fn hit(&self) -> bool {
        self.hit.load(Ordering::Relaxed)
    }

    fn lookup(&self, key: &[u8], remove: bool) -> Option<Vec<u8>> {
        let mut cache = self.cache.lock();
        let value = if remove {
            cache.loaded.remove(key)
        } else {
            cache.loaded.get(key).cloned()
        };
        if value.is_some() {
            self.hit.store(true, Ordering::Relaxed);
        }
        value
    }
}

impl StoresServerSessions for ServerSessionBridge {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        let mut cache = self.cache.lock();
        let session = ServerSession::new(key, value);
        if !cache.enabled || session.len() > MAX_SESSION_SIZE {
            trace!(len = session.len(), "not offering session to the application");
            cache.last = Some(session);
            return false;
        }
        cache.pending.push(session.clone());
        cache.last = Some(session);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lookup(key, false)
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.lookup(key, true)
    }

    fn can_cache(&self) -> bool {
        self.cache.lock().enabled
    }
}

/// Client-side session storage for one session.
///
/// Delegates to a cache shared by every handle derived from it and counts
/// the sessions the server issued.
pub(crate) struct ClientSessionBridge {
    inner: Arc<dyn ClientSessionStore>,
    issued: Mutex<Vec<ServerName>>,
    latest: Mutex<Option<ServerName>>,
    offered: AtomicBool,
}

impl fmt::Debug for ClientSessionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSessionBridge")
            .field("issued", &self.issued.lock().len())
            .finish_non_exhaustive()
    }
}

impl ClientSessionBridge {
    pub(crate) fn new(session: Option<&ClientSession>) -> Self {
        let inner = match session {
            Some(session) => session.store(),
            None => Arc::new(ClientSessionMemoryCache::new(CLIENT_CACHE_SIZE)),
        };
        Self {
            inner,
            issued: Mutex::new(Vec::new()),
            latest: Mutex::new(session.map(|session| session.server_name.clone())),
            offered: AtomicBool::new(false),
        }
    }

    fn handle(&self, server_name: ServerName) -> ClientSession {
        ClientSession {
            store: Arc::clone(&self.inner),
            server_name,
        }
    }

    /// Handles for sessions issued since the last call.
    pub(crate) fn take_issued(&self) -> Vec<ClientSession> {
        std::mem::take(&mut *self.issued.lock())
            .into_iter()
            .map(|server_name| self.handle(server_name))
            .collect()
    }

    /// A handle for the most recent session issued or installed.
    pub(crate) fn latest(&self) -> Option<ClientSession> {
        self.latest.lock().clone().map(|server_name| self.handle(server_name))
    }

    fn record_issued(&self, server_name: &ServerName) {
        self.issued.lock().push(server_name.clone());
        *self.latest.lock() = Some(server_name.clone());
    }

    /// Whether a stored session was offered to the server.
    pub(crate) fn offered(&self) -> bool {
        self.offered.load(Ordering::Relaxed)
    }
}

impl ClientSessionStore for ClientSessionBridge {
    fn set_kx_hint(&self, server_name: &ServerName, group: NamedGroup) {
        self.inner.set_kx_hint(server_name, group)
    }

    fn kx_hint(&self, server_name: &ServerName) -> Option<NamedGroup> {
        self.inner.kx_hint(server_name)
    }

    fn set_tls12_session(&self, server_name: &ServerName, value: Tls12ClientSessionValue) {
        self.inner.set_tls12_session(server_name, value);
        self.record_issued(server_name);
    }

    fn tls12_session(&self, server_name: &ServerName) -> Option<Tls12ClientSessionValue> {
        let value = self.inner.tls12_session(server_name);
        if value.is_some() {
            self.offered.store(true, Ordering::Relaxed);
        }
        value
    }

    fn remove_tls12_session(&self, server_name: &ServerName) {
        self.inner.remove_tls12_session(server_name)
    }

    fn insert_tls13_ticket(&self, server_name: &ServerName, value: Tls13ClientSessionValue) {
        self.inner.insert_tls13_ticket(server_name, value);
        self.record_issued(server_name);
    }

    fn take_tls13_ticket(&self, server_name: &ServerName) -> Option<Tls13ClientSessionValue> {
        let value = self.inner.take_tls13_ticket(server_name);
        if value.is_some() {
            self.offered.store(true, Ordering::Relaxed);
        }
        value
    }
}
