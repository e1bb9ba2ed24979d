//! A TLS session wrap over a byte-oriented transport.
//!
//! A [`SecureContext`] holds the identity and trust material for one server or
//! client configuration. A [`Wrap`] binds a context to a [`Transport`] and
//! pumps bytes between the transport and the TLS engine through two queues:
//! encrypted input read from the transport and encrypted output waiting to be
//! written to it. Cleartext flows up to a [`SessionHandler`] in bounded chunks
//! as soon as it is decrypted.
//!
//! The wrap is single threaded. It never blocks: every operation returns once
//! the engine can make no further progress, and completions that would
//! otherwise fire re-entrantly are deferred until the host calls
//! [`Wrap::tick`].

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

// tracing for logging (optional).
#[cfg(feature = "logging")]
use tracing as log;

#[cfg(not(feature = "logging"))]
#[allow(unused_macros)]
#[macro_use]
mod log {
    macro_rules! trace    ( ($($tt:tt)*) => {{}} );
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! warn     ( ($($tt:tt)*) => {{}} );
}

mod ciphers;
mod config;
mod context;
mod error;
mod handler;
mod hello;
mod roots;
mod session;
mod ticket;
mod transport;
mod verify;
mod wrap;
pub mod x509;

pub use crate::ciphers::{CipherInfo, ProtocolVersion};
pub use crate::config::{Role, WrapConfig, WrapConfigBuilder, WrapConfigBuilderError};
pub use crate::context::{ContextOptions, Method, SecureContext};
pub use crate::error::{ErrorKind, TlsError};
pub use crate::handler::{NoopHandler, SessionHandler};
pub use crate::hello::EphemeralKeyInfo;
pub use crate::roots::default_root_store;
pub use crate::session::{ClientSession, ServerSession, Session, MAX_SESSION_SIZE};
pub use crate::ticket::{TicketKeyCallback, TicketKeys, TICKET_KEYS_LEN};
pub use crate::transport::{MemoryTransport, Transport, WriteStatus};
pub use crate::verify::VerifyError;
pub use crate::wrap::{State, Wrap, WriteId, CLEAR_OUT_CHUNK_SIZE};
