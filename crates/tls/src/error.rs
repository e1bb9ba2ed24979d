use std::{error::Error, fmt::Display, io};

use rustls::{AlertDescription, PeerIncompatible};
use wrap_crypto::{decorate, CryptoError, DecoratedError, Lib};

use crate::VerifyError;

/// Session and context error.
///
/// Every error carries a stable code (see [`TlsError::code`]). Errors raised
/// by the TLS engine also carry the decorated engine record.
#[derive(Debug, thiserror::Error)]
#[error("{msg}")]
pub struct TlsError {
    kind: ErrorKind,
    code: String,
    msg: String,
    engine: Option<DecoratedError>,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl TlsError {
    pub(crate) fn new(kind: ErrorKind, code: impl Into<String>, msg: impl ToString) -> Self {
        Self {
            kind,
            code: code.into(),
            msg: msg.to_string(),
            engine: None,
            source: None,
        }
    }

    pub(crate) fn from_engine(kind: ErrorKind, err: DecoratedError) -> Self {
        Self {
            kind,
            code: err.code().to_string(),
            msg: err.to_string(),
            engine: Some(err),
            source: None,
        }
    }

    pub(crate) fn invalid_arg(msg: impl ToString) -> Self {
        Self::new(ErrorKind::Config, "ERR_INVALID_ARG_VALUE", msg)
    }

    pub(crate) fn invalid_method(msg: impl ToString) -> Self {
        Self::new(ErrorKind::Config, "ERR_TLS_INVALID_PROTOCOL_METHOD", msg)
    }

    pub(crate) fn state(msg: impl ToString) -> Self {
        Self::new(ErrorKind::State, "ERR_TLS_INVALID_STATE", msg)
    }

    /// A protocol failure that has no engine record, reported as `EPROTO`.
    pub(crate) fn protocol(msg: impl ToString) -> Self {
        Self::new(ErrorKind::Protocol, "EPROTO", msg)
    }

    pub(crate) fn canceled() -> Self {
        Self::new(
            ErrorKind::Canceled,
            "ECANCELED",
            "Canceled because of SSL destruction",
        )
    }

    /// Decorates an engine configuration failure with the `SSL` library.
    pub(crate) fn ssl_config(function: &'static str, reason: &str) -> Self {
        Self::from_engine(ErrorKind::Config, decorate(Lib::Ssl, Some(function), reason))
    }

    /// Decorates a fatal protocol failure reported by the TLS engine.
    pub(crate) fn from_rustls(err: &rustls::Error) -> Self {
        let (function, reason) = engine_reason(err);
        let mut error = Self::from_engine(ErrorKind::Protocol, decorate(Lib::Ssl, function, reason));
        error.source = Some(Box::new(err.clone()));
        error
    }

    /// A certificate verification failure, coded by the verify result.
    pub(crate) fn verification(err: VerifyError) -> Self {
        Self::new(ErrorKind::Protocol, err.code(), err.reason())
    }

    /// The kind of failure.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable code, e.g. `ERR_SSL_NO_SHARED_CIPHER` or `ECANCELED`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn msg(&self) -> &str {
        &self.msg
    }

    /// The decorated engine record, for errors raised by an engine.
    pub fn engine(&self) -> Option<&DecoratedError> {
        self.engine.as_ref()
    }

    /// The engine reason string, e.g. `no shared cipher`.
    pub fn reason(&self) -> Option<&str> {
        self.engine.as_ref().map(DecoratedError::reason)
    }

    /// Builds an independent copy for reporting the same failure twice.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            kind: self.kind,
            code: self.code.clone(),
            msg: self.msg.clone(),
            engine: self.engine.clone(),
            source: None,
        }
    }
}

/// The kind of session or context error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Malformed keys, certificates or parameters, or an unsupported setting.
    Config,
    /// A fatal TLS failure: alerts, decrypt failures, verification failures.
    Protocol,
    /// An operation invoked in the wrong session state.
    State,
    /// A transport failure.
    Io,
    /// The operation was canceled by destroying the session.
    Canceled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => write!(f, "Config"),
            ErrorKind::Protocol => write!(f, "Protocol"),
            ErrorKind::State => write!(f, "State"),
            ErrorKind::Io => write!(f, "Io"),
            ErrorKind::Canceled => write!(f, "Canceled"),
        }
    }
}

impl From<io::Error> for TlsError {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::BrokenPipe => "EPIPE",
            io::ErrorKind::ConnectionReset => "ECONNRESET",
            io::ErrorKind::ConnectionAborted => "ECONNABORTED",
            io::ErrorKind::TimedOut => "ETIMEDOUT",
            _ => "EIO",
        };
        Self {
            kind: ErrorKind::Io,
            code: code.to_string(),
            msg: err.to_string(),
            engine: None,
            source: Some(Box::new(err)),
        }
    }
}

impl From<CryptoError> for TlsError {
    fn from(err: CryptoError) -> Self {
        let engine = match &err {
            CryptoError::Engine(engine) => Some(engine.clone()),
            _ => None,
        };
        Self {
            kind: ErrorKind::Config,
            code: err.code().to_string(),
            msg: err.to_string(),
            engine,
            source: Some(Box::new(err)),
        }
    }
}

fn engine_reason(err: &rustls::Error) -> (Option<&'static str>, String) {
    use rustls::Error::*;

    match err {
        PeerIncompatible(rustls::PeerIncompatible::NoCipherSuitesInCommon) => (
            Some("tls_post_process_client_hello"),
            "no shared cipher".into(),
        ),
        PeerIncompatible(rustls::PeerIncompatible::NoKxGroupsInCommon) => {
            (Some("tls_post_process_client_hello"), "no suitable key share".into())
        }
        PeerIncompatible(rustls::PeerIncompatible::NoSignatureSchemesInCommon) => (
            Some("tls_choose_sigalg"),
            "no suitable signature algorithm".into(),
        ),
        PeerIncompatible(_) => (Some("tls_early_post_process_client_hello"), "unsupported protocol".into()),
        AlertReceived(alert) => (Some("ssl3_read_bytes"), alert_reason(*alert)),
        NoApplicationProtocol => (
            Some("tls_handle_alpn"),
            "no application protocol".into(),
        ),
        DecryptError => (
            Some("ssl3_get_record"),
            "decryption failed or bad record mac".into(),
        ),
        InvalidCertificate(_) => (
            Some("tls_process_server_certificate"),
            "certificate verify failed".into(),
        ),
        NoCertificatesPresented => (
            Some("tls_process_client_certificate"),
            "peer did not return a certificate".into(),
        ),
        PeerSentOversizedRecord => (Some("ssl3_get_record"), "packet length too long".into()),
        InvalidMessage(_) => (Some("ssl3_get_record"), "wrong version number".into()),
        InappropriateMessage { .. } | InappropriateHandshakeMessage { .. } | PeerMisbehaved(_) => {
            (Some("ssl3_read_bytes"), "unexpected message".into())
        }
        HandshakeNotComplete => (None, "handshake not complete".into()),
        _ => (None, "internal error".into()),
    }
}

/// Reason string for an alert received from the peer.
fn alert_reason(alert: AlertDescription) -> String {
    let (prefix, name) = match alert {
        AlertDescription::CloseNotify => ("sslv3", "close notify"),
        AlertDescription::UnexpectedMessage => ("sslv3", "unexpected message"),
        AlertDescription::BadRecordMac => ("sslv3", "bad record mac"),
        AlertDescription::HandshakeFailure => ("sslv3", "handshake failure"),
        AlertDescription::BadCertificate => ("sslv3", "bad certificate"),
        AlertDescription::UnsupportedCertificate => ("sslv3", "unsupported certificate"),
        AlertDescription::CertificateRevoked => ("sslv3", "certificate revoked"),
        AlertDescription::CertificateExpired => ("sslv3", "certificate expired"),
        AlertDescription::CertificateUnknown => ("sslv3", "certificate unknown"),
        AlertDescription::IllegalParameter => ("sslv3", "illegal parameter"),
        AlertDescription::UnknownCA => ("tlsv1", "unknown ca"),
        AlertDescription::AccessDenied => ("tlsv1", "access denied"),
        AlertDescription::DecodeError => ("tlsv1", "decode error"),
        AlertDescription::DecryptError => ("tlsv1", "decrypt error"),
        AlertDescription::ProtocolVersion => ("tlsv1", "protocol version"),
        AlertDescription::InsufficientSecurity => ("tlsv1", "insufficient security"),
        AlertDescription::InternalError => ("tlsv1", "internal error"),
        AlertDescription::UserCanceled => ("tlsv1", "user cancelled"),
        AlertDescription::NoRenegotiation => ("sslv3", "no renegotiation"),
        AlertDescription::UnrecognisedName => ("tlsv1", "unrecognized name"),
        AlertDescription::NoApplicationProtocol => ("tlsv1", "no application protocol"),
        AlertDescription::CertificateRequired => ("tlsv13", "certificate required"),
        other => return format!("tlsv1 alert number {}", other.get_u8()),
    };
    format!("{prefix} alert {name}")
}

/// The alert to send when the engine rejects a ClientHello before a
/// connection exists to send it.
pub(crate) fn hello_rejection_alert(err: &rustls::Error) -> AlertDescription {
    match err {
        rustls::Error::NoApplicationProtocol => AlertDescription::NoApplicationProtocol,
        rustls::Error::PeerIncompatible(PeerIncompatible::ServerTlsVersionIsDisabledByOurConfig)
        | rustls::Error::PeerIncompatible(PeerIncompatible::SupportedVersionsExtensionRequired) => {
            AlertDescription::ProtocolVersion
        }
        rustls::Error::InvalidMessage(_) => AlertDescription::DecodeError,
        rustls::Error::General(_) => AlertDescription::InternalError,
        _ => AlertDescription::HandshakeFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_shared_cipher_code() {
        let err = TlsError::from_rustls(&rustls::Error::PeerIncompatible(
            PeerIncompatible::NoCipherSuitesInCommon,
        ));
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.code(), "ERR_SSL_NO_SHARED_CIPHER");
        assert_eq!(
            err.msg(),
            "error:SSL routines:tls_post_process_client_hello:no shared cipher"
        );
    }

    #[test]
    fn test_alert_codes() {
        let err = TlsError::from_rustls(&rustls::Error::AlertReceived(
            AlertDescription::HandshakeFailure,
        ));
        assert_eq!(err.code(), "ERR_SSL_SSLV3_ALERT_HANDSHAKE_FAILURE");

        let err = TlsError::from_rustls(&rustls::Error::AlertReceived(AlertDescription::UnknownCA));
        assert_eq!(err.code(), "ERR_SSL_TLSV1_ALERT_UNKNOWN_CA");
        assert_eq!(err.reason(), Some("tlsv1 alert unknown ca"));
    }

    #[test]
    fn test_same_reason_same_code() {
        let a = TlsError::from_rustls(&rustls::Error::DecryptError);
        let b = TlsError::from_rustls(&rustls::Error::DecryptError);
        assert_eq!(a.code(), b.code());
        assert_eq!(a.code(), "ERR_SSL_DECRYPTION_FAILED_OR_BAD_RECORD_MAC");
    }

    #[test]
    fn test_crypto_error_keeps_code() {
        let err = TlsError::from(CryptoError::MissingPassphrase);
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.code(), "ERR_MISSING_PASSPHRASE");
    }

    #[test]
    fn test_duplicate_keeps_engine_record() {
        let err = TlsError::from_rustls(&rustls::Error::NoApplicationProtocol);
        let copy = err.duplicate();
        assert_eq!(copy.code(), err.code());
        assert_eq!(copy.engine(), err.engine());
    }
}
