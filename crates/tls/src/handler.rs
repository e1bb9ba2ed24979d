use crate::{Session, TlsError, WriteId};

/// Receives session events from a [`Wrap`](crate::Wrap).
///
/// Callbacks run synchronously from inside the wrap and must not call back
/// into it. Decisions the wrap waits on (certificate selection, session
/// caching) are made after the call returns, through
/// [`Wrap::cert_cb_done`](crate::Wrap::cert_cb_done) and
/// [`Wrap::new_session_done`](crate::Wrap::new_session_done).
#[allow(unused_variables)]
pub trait SessionHandler {
    /// Decrypted application data, at most
    /// [`CLEAR_OUT_CHUNK_SIZE`](crate::CLEAR_OUT_CHUNK_SIZE) bytes at a time.
    fn on_data(&mut self, data: &[u8]) {}

    /// End of the cleartext stream. Fires at most once.
    fn on_eof(&mut self) {}

    /// A fatal session error. Fires at most once.
    fn on_error(&mut self, err: TlsError) {}

    /// The engine started processing a handshake.
    fn on_handshake_start(&mut self) {}

    /// The handshake finished.
    fn on_handshake_done(&mut self) {}

    /// A cleartext write completed, failed or was canceled.
    fn on_write_done(&mut self, id: WriteId, result: Result<(), TlsError>) {}

    /// A session eligible for caching was created.
    ///
    /// On servers the wrap holds back output until
    /// [`Wrap::new_session_done`](crate::Wrap::new_session_done) is called.
    fn on_new_session(&mut self, session: Session) {}

    /// One line of NSS key log output, newline terminated.
    fn on_keylog(&mut self, line: &[u8]) {}

    /// The server received a ClientHello and is waiting for
    /// [`Wrap::cert_cb_done`](crate::Wrap::cert_cb_done).
    fn on_cert_cb(&mut self, servername: Option<&str>) {}

    /// The client received the server's OCSP response, if any.
    fn on_ocsp_response(&mut self, response: Option<&[u8]>) {}
}

/// A handler that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl SessionHandler for NoopHandler {}
