use std::fmt;

/// Library that raised an engine error.
///
/// The discriminants follow the classic library table: every library except
/// `Ssl` is prefixed with `OSSL_` when a code is derived from it.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lib {
    Sys,
    Bn,
    Rsa,
    Dh,
    Evp,
    Buf,
    Obj,
    Pem,
    Dsa,
    X509,
    Asn1,
    Conf,
    Crypto,
    Ec,
    Ssl,
    Bio,
    Pkcs7,
    X509v3,
    Pkcs12,
    Rand,
    Dso,
    Engine,
    Ocsp,
    Ui,
    Comp,
    Ecdsa,
    Ecdh,
    Fips,
    Cms,
    Ts,
    Hmac,
    User,
}

impl Lib {
    /// The short name used when building error codes.
    pub fn code_name(&self) -> &'static str {
        match self {
            Lib::Sys => "SYS",
            Lib::Bn => "BN",
            Lib::Rsa => "RSA",
            Lib::Dh => "DH",
            Lib::Evp => "EVP",
            Lib::Buf => "BUF",
            Lib::Obj => "OBJ",
            Lib::Pem => "PEM",
            Lib::Dsa => "DSA",
            Lib::X509 => "X509",
            Lib::Asn1 => "ASN1",
            Lib::Conf => "CONF",
            Lib::Crypto => "CRYPTO",
            Lib::Ec => "EC",
            Lib::Ssl => "SSL",
            Lib::Bio => "BIO",
            Lib::Pkcs7 => "PKCS7",
            Lib::X509v3 => "X509V3",
            Lib::Pkcs12 => "PKCS12",
            Lib::Rand => "RAND",
            Lib::Dso => "DSO",
            Lib::Engine => "ENGINE",
            Lib::Ocsp => "OCSP",
            Lib::Ui => "UI",
            Lib::Comp => "COMP",
            Lib::Ecdsa => "ECDSA",
            Lib::Ecdh => "ECDH",
            Lib::Fips => "FIPS",
            Lib::Cms => "CMS",
            Lib::Ts => "TS",
            Lib::Hmac => "HMAC",
            Lib::User => "USER",
        }
    }

    /// Human readable library name, as reported in `library`.
    pub fn library(&self) -> &'static str {
        match self {
            Lib::Sys => "system library",
            Lib::Bn => "bignum routines",
            Lib::Rsa => "rsa routines",
            Lib::Dh => "Diffie-Hellman routines",
            Lib::Evp => "digital envelope routines",
            Lib::Buf => "memory buffer routines",
            Lib::Obj => "object identifier routines",
            Lib::Pem => "PEM routines",
            Lib::Dsa => "dsa routines",
            Lib::X509 => "x509 certificate routines",
            Lib::Asn1 => "asn1 encoding routines",
            Lib::Conf => "configuration file routines",
            Lib::Crypto => "common libcrypto routines",
            Lib::Ec => "elliptic curve routines",
            Lib::Ssl => "SSL routines",
            Lib::Bio => "BIO routines",
            Lib::Pkcs7 => "PKCS7 routines",
            Lib::X509v3 => "X509 V3 routines",
            Lib::Pkcs12 => "PKCS12 routines",
            Lib::Rand => "random number generator",
            Lib::Dso => "DSO support routines",
            Lib::Engine => "engine routines",
            Lib::Ocsp => "OCSP routines",
            Lib::Ui => "UI routines",
            Lib::Comp => "compression routines",
            Lib::Ecdsa => "ECDSA routines",
            Lib::Ecdh => "ECDH routines",
            Lib::Fips => "FIPS routines",
            Lib::Cms => "CMS routines",
            Lib::Ts => "time stamp routines",
            Lib::Hmac => "HMAC routines",
            Lib::User => "user library",
        }
    }
}

/// An engine error decorated with a stable, matchable code.
///
/// Built with [`decorate`]; the code is a pure function of the library and
/// the reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedError {
    code: String,
    library: &'static str,
    function: Option<&'static str>,
    reason: String,
    stack: Vec<String>,
}

impl DecoratedError {
    /// Stable error code, e.g. `ERR_OSSL_PEM_NO_START_LINE`.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Library name, e.g. `PEM routines`.
    pub fn library(&self) -> &str {
        self.library
    }

    /// Function that raised the error, if known.
    pub fn function(&self) -> Option<&str> {
        self.function
    }

    /// Reason string, e.g. `no start line`.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Errors queued before this one, oldest first.
    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    /// Pushes an earlier error onto the stack.
    pub fn with_stack_entry(mut self, entry: impl Into<String>) -> Self {
        self.stack.push(entry.into());
        self
    }
}

impl fmt::Display for DecoratedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error:{}:{}:{}",
            self.library,
            self.function.unwrap_or("OPENSSL_internal"),
            self.reason
        )
    }
}

impl std::error::Error for DecoratedError {}

/// Derives the error code for `reason` raised by `lib`.
///
/// The reason is uppercased with spaces mapped to underscores, then prefixed
/// with `ERR_OSSL_<LIB>_`, or `ERR_SSL_` for the SSL library.
pub fn error_code(lib: Lib, reason: &str) -> String {
    let reason: String = reason
        .chars()
        .map(|c| if c == ' ' { '_' } else { c.to_ascii_uppercase() })
        .collect();

    let prefix = if lib == Lib::Ssl { "" } else { "OSSL_" };

    format!("ERR_{}{}_{}", prefix, lib.code_name(), reason)
}

/// Builds a [`DecoratedError`] from an engine reason string.
pub fn decorate(lib: Lib, function: Option<&'static str>, reason: impl Into<String>) -> DecoratedError {
    let reason = reason.into();
    DecoratedError {
        code: error_code(lib, &reason),
        library: lib.library(),
        function,
        reason,
        stack: Vec::new(),
    }
}

/// An error type for this crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    Engine(#[from] DecoratedError),
    #[error("Invalid authentication tag length: {0}")]
    InvalidAuthTagLength(usize),
    #[error("{0}")]
    InvalidAuthTag(String),
    #[error("Unsupported state or unable to authenticate data")]
    AuthFailed,
    #[error("Invalid IV length")]
    InvalidIv,
    #[error("Invalid key length")]
    InvalidKeyLength,
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
    #[error("Unknown cipher: {0}")]
    UnknownCipher(String),
    #[error("Invalid EC curve name: {0}")]
    InvalidCurve(String),
    #[error("Invalid key object type {actual}, expected {expected}.")]
    InvalidKeyObjectType {
        actual: &'static str,
        expected: &'static str,
    },
    #[error("Passphrase required for encrypted key")]
    MissingPassphrase,
    #[error("Message exceeds maximum size")]
    InvalidMessageLength,
    #[error("Invalid scrypt parameter")]
    ScryptInvalidParameter,
    #[error("Public key is not valid for specified curve")]
    InvalidEcdhPublicKey,
    #[error("Private key is not valid for specified curve.")]
    InvalidEcdhPrivateKey,
    #[error("Unknown DH group")]
    UnknownDhGroup,
    #[error("{0}")]
    InvalidDhPublicKey(crate::dh::DhKeyCheck),
    #[error("Input buffers must have the same byte length")]
    TimingSafeEqualLength,
    #[error("{0}")]
    InvalidArgValue(String),
    #[error("{0}")]
    OperationFailed(String),
    #[error("The operation was canceled")]
    Canceled,
}

impl CryptoError {
    /// Stable code for matching on this error.
    pub fn code(&self) -> &str {
        match self {
            CryptoError::IOError(_) => "ERR_SYSTEM_ERROR",
            CryptoError::Engine(err) => err.code(),
            CryptoError::InvalidAuthTagLength(_) | CryptoError::InvalidAuthTag(_) => {
                "ERR_CRYPTO_INVALID_AUTH_TAG"
            }
            CryptoError::AuthFailed => "ERR_CRYPTO_AUTH_FAILED",
            CryptoError::InvalidIv => "ERR_CRYPTO_INVALID_IV",
            CryptoError::InvalidKeyLength => "ERR_CRYPTO_INVALID_KEYLEN",
            CryptoError::InvalidState(_) => "ERR_CRYPTO_INVALID_STATE",
            CryptoError::InvalidDigest(_) => "ERR_CRYPTO_INVALID_DIGEST",
            CryptoError::UnknownCipher(_) => "ERR_CRYPTO_UNKNOWN_CIPHER",
            CryptoError::InvalidCurve(_) => "ERR_CRYPTO_INVALID_CURVE",
            CryptoError::InvalidKeyObjectType { .. } => "ERR_CRYPTO_INVALID_KEY_OBJECT_TYPE",
            CryptoError::MissingPassphrase => "ERR_MISSING_PASSPHRASE",
            CryptoError::InvalidMessageLength => "ERR_CRYPTO_INVALID_MESSAGELEN",
            CryptoError::ScryptInvalidParameter => "ERR_CRYPTO_SCRYPT_INVALID_PARAMETER",
            CryptoError::InvalidEcdhPublicKey => "ERR_CRYPTO_ECDH_INVALID_PUBLIC_KEY",
            CryptoError::InvalidEcdhPrivateKey => "ERR_CRYPTO_INVALID_KEYTYPE",
            CryptoError::UnknownDhGroup => "ERR_CRYPTO_UNKNOWN_DH_GROUP",
            CryptoError::InvalidDhPublicKey(_) => "ERR_CRYPTO_DH_INVALID_PUBLIC_KEY",
            CryptoError::TimingSafeEqualLength => "ERR_CRYPTO_TIMING_SAFE_EQUAL_LENGTH",
            CryptoError::InvalidArgValue(_) => "ERR_INVALID_ARG_VALUE",
            CryptoError::OperationFailed(_) => "ERR_CRYPTO_OPERATION_FAILED",
            CryptoError::Canceled => "ERR_CRYPTO_JOB_CANCELED",
        }
    }

    /// Shorthand for a decorated engine error.
    pub fn engine(lib: Lib, function: &'static str, reason: impl Into<String>) -> Self {
        CryptoError::Engine(decorate(lib, Some(function), reason))
    }

    /// Shorthand for an operation failure carrying a plain message.
    pub(crate) fn failed(msg: impl Into<String>) -> Self {
        CryptoError::OperationFailed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_transform() {
        assert_eq!(
            error_code(Lib::Pem, "no start line"),
            "ERR_OSSL_PEM_NO_START_LINE"
        );
        assert_eq!(
            error_code(Lib::Evp, "bad decrypt"),
            "ERR_OSSL_EVP_BAD_DECRYPT"
        );
    }

    #[test]
    fn test_ssl_has_no_ossl_prefix() {
        assert_eq!(
            error_code(Lib::Ssl, "no shared cipher"),
            "ERR_SSL_NO_SHARED_CIPHER"
        );
        assert_eq!(
            error_code(Lib::Ssl, "sslv3 alert handshake failure"),
            "ERR_SSL_SSLV3_ALERT_HANDSHAKE_FAILURE"
        );
    }

    #[test]
    fn test_code_is_deterministic() {
        let a = decorate(Lib::Dh, Some("DH_check"), "bad generator");
        let b = decorate(Lib::Dh, Some("DH_check"), "bad generator");
        assert_eq!(a, b);
        assert_eq!(a.code(), "ERR_OSSL_DH_BAD_GENERATOR");
        assert_eq!(a.library(), "Diffie-Hellman routines");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CryptoError::InvalidAuthTagLength(3).code(),
            "ERR_CRYPTO_INVALID_AUTH_TAG"
        );
        assert_eq!(
            CryptoError::InvalidAuthTagLength(3).to_string(),
            "Invalid authentication tag length: 3"
        );
        assert_eq!(CryptoError::MissingPassphrase.code(), "ERR_MISSING_PASSPHRASE");
        let err: CryptoError = decorate(Lib::Pem, None, "bad decrypt").into();
        assert_eq!(err.code(), "ERR_OSSL_PEM_BAD_DECRYPT");
    }
}
