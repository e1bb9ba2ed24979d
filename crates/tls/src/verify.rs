//! Peer certificate verification.
//!
//! Both verifiers delegate chain building to the engine, then classify the
//! outcome into a [`VerifyError`] that the session reports later. With
//! `reject_unauthorized` off a failed verification is recorded but does not
//! abort the handshake.

use std::{fmt, sync::Arc, time::SystemTime};

use parking_lot::Mutex;
use rustls::{
    client::{
        verify_server_cert_signed_by_trust_anchor, verify_server_name, ServerCertVerified,
        ServerCertVerifier,
    },
    server::{AllowAnyAuthenticatedClient, ClientCertVerified, ClientCertVerifier, ParsedCertificate},
    Certificate, CertificateError, DistinguishedName, RootCertStore, ServerName,
};

#[cfg(feature = "logging")]
use crate::log::debug;
use crate::x509;

/// A certificate verification failure, named after the classic verify
/// result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum VerifyError {
    UnableToGetIssuerCert,
    UnableToGetCrl,
    UnableToDecryptCertSignature,
    UnableToDecryptCrlSignature,
    UnableToDecodeIssuerPublicKey,
    CertSignatureFailure,
    CrlSignatureFailure,
    CertNotYetValid,
    CertHasExpired,
    CrlNotYetValid,
    CrlHasExpired,
    ErrorInCertNotBeforeField,
    ErrorInCertNotAfterField,
    ErrorInCrlLastUpdateField,
    ErrorInCrlNextUpdateField,
    OutOfMem,
    DepthZeroSelfSignedCert,
    SelfSignedCertInChain,
    UnableToGetIssuerCertLocally,
    UnableToVerifyLeafSignature,
    CertChainTooLong,
    CertRevoked,
    InvalidCa,
    PathLengthExceeded,
    InvalidPurpose,
    CertUntrusted,
    CertRejected,
    HostnameMismatch,
}

impl VerifyError {
    /// Stable code, e.g. `CERT_HAS_EXPIRED`.
    pub fn code(&self) -> &'static str {
        use VerifyError::*;

        match self {
            UnableToGetIssuerCert => "UNABLE_TO_GET_ISSUER_CERT",
            UnableToGetCrl => "UNABLE_TO_GET_CRL",
            UnableToDecryptCertSignature => "UNABLE_TO_DECRYPT_CERT_SIGNATURE",
            UnableToDecryptCrlSignature => "UNABLE_TO_DECRYPT_CRL_SIGNATURE",
            UnableToDecodeIssuerPublicKey => "UNABLE_TO_DECODE_ISSUER_PUBLIC_KEY",
            CertSignatureFailure => "CERT_SIGNATURE_FAILURE",
            CrlSignatureFailure => "CRL_SIGNATURE_FAILURE",
            CertNotYetValid => "CERT_NOT_YET_VALID",
            CertHasExpired => "CERT_HAS_EXPIRED",
            CrlNotYetValid => "CRL_NOT_YET_VALID",
            CrlHasExpired => "CRL_HAS_EXPIRED",
            ErrorInCertNotBeforeField => "ERROR_IN_CERT_NOT_BEFORE_FIELD",
            ErrorInCertNotAfterField => "ERROR_IN_CERT_NOT_AFTER_FIELD",
            ErrorInCrlLastUpdateField => "ERROR_IN_CRL_LAST_UPDATE_FIELD",
            ErrorInCrlNextUpdateField => "ERROR_IN_CRL_NEXT_UPDATE_FIELD",
            OutOfMem => "OUT_OF_MEM",
            DepthZeroSelfSignedCert => "DEPTH_ZERO_SELF_SIGNED_CERT",
            SelfSignedCertInChain => "SELF_SIGNED_CERT_IN_CHAIN",
            UnableToGetIssuerCertLocally => "UNABLE_TO_GET_ISSUER_CERT_LOCALLY",
            UnableToVerifyLeafSignature => "UNABLE_TO_VERIFY_LEAF_SIGNATURE",
            CertChainTooLong => "CERT_CHAIN_TOO_LONG",
            CertRevoked => "CERT_REVOKED",
            InvalidCa => "INVALID_CA",
            PathLengthExceeded => "PATH_LENGTH_EXCEEDED",
            InvalidPurpose => "INVALID_PURPOSE",
            CertUntrusted => "CERT_UNTRUSTED",
            CertRejected => "CERT_REJECTED",
            // Not part of the classic table; the reason doubles as the code.
            HostnameMismatch => "Hostname mismatch",
        }
    }

    /// Human readable reason, e.g. `certificate has expired`.
    pub fn reason(&self) -> &'static str {
        use VerifyError::*;

        match self {
            UnableToGetIssuerCert => "unable to get issuer certificate",
            UnableToGetCrl => "unable to get certificate CRL",
            UnableToDecryptCertSignature => "unable to decrypt certificate's signature",
            UnableToDecryptCrlSignature => "unable to decrypt CRL's signature",
            UnableToDecodeIssuerPublicKey => "unable to decode issuer public key",
            CertSignatureFailure => "certificate signature failure",
            CrlSignatureFailure => "CRL signature failure",
            CertNotYetValid => "certificate is not yet valid",
            CertHasExpired => "certificate has expired",
            CrlNotYetValid => "CRL is not yet valid",
            CrlHasExpired => "CRL has expired",
            ErrorInCertNotBeforeField => "format error in certificate's notBefore field",
            ErrorInCertNotAfterField => "format error in certificate's notAfter field",
            ErrorInCrlLastUpdateField => "format error in CRL's lastUpdate field",
            ErrorInCrlNextUpdateField => "format error in CRL's nextUpdate field",
            OutOfMem => "out of memory",
            DepthZeroSelfSignedCert => "self signed certificate",
            SelfSignedCertInChain => "self signed certificate in certificate chain",
            UnableToGetIssuerCertLocally => "unable to get local issuer certificate",
            UnableToVerifyLeafSignature => "unable to verify the first certificate",
            CertChainTooLong => "certificate chain too long",
            CertRevoked => "certificate revoked",
            InvalidCa => "invalid CA certificate",
            PathLengthExceeded => "path length constraint exceeded",
            InvalidPurpose => "unsupported certificate purpose",
            CertUntrusted => "certificate not trusted",
            CertRejected => "certificate rejected",
            HostnameMismatch => "Hostname mismatch",
        }
    }

    /// The engine error reported to the peer when the failure aborts the
    /// handshake.
    fn to_certificate_error(self) -> CertificateError {
        match self {
            VerifyError::CertHasExpired => CertificateError::Expired,
            VerifyError::CertNotYetValid => CertificateError::NotValidYet,
            VerifyError::CertRevoked => CertificateError::Revoked,
            VerifyError::CertSignatureFailure => CertificateError::BadSignature,
            VerifyError::HostnameMismatch => CertificateError::NotValidForName,
            VerifyError::InvalidPurpose => CertificateError::InvalidPurpose,
            VerifyError::UnableToDecodeIssuerPublicKey => CertificateError::BadEncoding,
            VerifyError::CertRejected | VerifyError::CertUntrusted => {
                CertificateError::ApplicationVerificationFailure
            }
            _ => CertificateError::UnknownIssuer,
        }
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Default)]
struct VerifyRecord {
    error: Option<VerifyError>,
    called: bool,
    ocsp_response: Option<Vec<u8>>,
}

/// Verification outcome shared between a verifier and its session.
#[derive(Debug, Clone, Default)]
pub(crate) struct VerifyState(Arc<Mutex<VerifyRecord>>);

impl VerifyState {
    pub(crate) fn error(&self) -> Option<VerifyError> {
        self.0.lock().error
    }

    /// Whether a peer certificate was verified during this session.
    pub(crate) fn called(&self) -> bool {
        self.0.lock().called
    }

    pub(crate) fn ocsp_response(&self) -> Option<Vec<u8>> {
        self.0.lock().ocsp_response.clone()
    }

    fn record(&self, error: Option<VerifyError>) {
        let mut record = self.0.lock();
        record.called = true;
        record.error = error;
    }
}

/// Trust material the verifiers check against.
#[derive(Debug, Clone)]
pub(crate) struct TrustAnchors {
    pub(crate) roots: Arc<RootCertStore>,
    /// DER of CA certificates added explicitly, for self-signed trust.
    pub(crate) ca_certs: Arc<Vec<Vec<u8>>>,
    pub(crate) crls: Arc<Vec<Vec<u8>>>,
}

impl TrustAnchors {
    fn trusts_directly(&self, end_entity: &Certificate) -> bool {
        self.ca_certs.iter().any(|ca| *ca == end_entity.0)
    }

    /// Classifies the chain, given the engine's verdict on it.
    fn classify(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        chain_result: Result<(), rustls::Error>,
    ) -> Option<VerifyError> {
        let self_issued = x509::is_self_issued(&end_entity.0);
        if self_issued && intermediates.is_empty() && !self.trusts_directly(end_entity) {
            return Some(VerifyError::DepthZeroSelfSignedCert);
        }

        if let Err(err) = chain_result {
            if self.trusts_directly(end_entity) {
                // Explicitly trusted leaves only need to be in date, which
                // the engine checks before anything else.
                return match err {
                    rustls::Error::InvalidCertificate(CertificateError::Expired) => {
                        Some(VerifyError::CertHasExpired)
                    }
                    rustls::Error::InvalidCertificate(CertificateError::NotValidYet) => {
                        Some(VerifyError::CertNotYetValid)
                    }
                    _ => None,
                };
            }
            return Some(classify_engine_error(&err, intermediates));
        }

        if !self.crls.is_empty() {
            for cert in std::iter::once(end_entity).chain(intermediates) {
                match x509::is_revoked(&cert.0, &self.crls) {
                    Ok(false) => {}
                    Ok(true) => return Some(VerifyError::CertRevoked),
                    Err(_) => return Some(VerifyError::UnableToGetCrl),
                }
            }
        }

        None
    }
}

fn classify_engine_error(err: &rustls::Error, intermediates: &[Certificate]) -> VerifyError {
    match err {
        rustls::Error::InvalidCertificate(err) => match err {
            CertificateError::Expired => VerifyError::CertHasExpired,
            CertificateError::NotValidYet => VerifyError::CertNotYetValid,
            CertificateError::Revoked => VerifyError::CertRevoked,
            CertificateError::BadSignature => VerifyError::CertSignatureFailure,
            CertificateError::NotValidForName => VerifyError::HostnameMismatch,
            CertificateError::InvalidPurpose => VerifyError::InvalidPurpose,
            CertificateError::BadEncoding => VerifyError::UnableToDecodeIssuerPublicKey,
            CertificateError::UnknownIssuer => match intermediates.last() {
                None => VerifyError::UnableToVerifyLeafSignature,
                Some(top) if x509::is_self_issued(&top.0) => VerifyError::SelfSignedCertInChain,
                Some(_) => VerifyError::UnableToGetIssuerCertLocally,
            },
            _ => VerifyError::CertRejected,
        },
        _ => VerifyError::CertRejected,
    }
}

/// Verifies server certificates on client sessions.
pub(crate) struct ServerVerifier {
    trust: TrustAnchors,
    check_hostname: bool,
    reject_unauthorized: bool,
    state: VerifyState,
}

impl ServerVerifier {
    pub(crate) fn new(
        trust: TrustAnchors,
        check_hostname: bool,
        reject_unauthorized: bool,
        state: VerifyState,
    ) -> Self {
        Self {
            trust,
            check_hostname,
            reject_unauthorized,
            state,
        }
    }
}

impl ServerCertVerifier for ServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.state.0.lock().ocsp_response =
            (!ocsp_response.is_empty()).then(|| ocsp_response.to_vec());

        let parsed = ParsedCertificate::try_from(end_entity)?;
        let chain = verify_server_cert_signed_by_trust_anchor(
            &parsed,
            &self.trust.roots,
            intermediates,
            now,
        );

        let mut error = self.trust.classify(end_entity, intermediates, chain);
        if error.is_none() && self.check_hostname {
            if let Err(err) = verify_server_name(&parsed, server_name) {
                error = Some(classify_engine_error(&err, intermediates));
            }
        }
        self.state.record(error);

        match error {
            Some(error) if self.reject_unauthorized => {
                debug!(code = error.code(), "rejecting server certificate");
                Err(rustls::Error::InvalidCertificate(error.to_certificate_error()))
            }
            _ => Ok(ServerCertVerified::assertion()),
        }
    }
}

/// Verifies client certificates on server sessions.
pub(crate) struct ClientVerifier {
    trust: TrustAnchors,
    chain: Arc<dyn ClientCertVerifier>,
    subjects: Vec<DistinguishedName>,
    request_cert: bool,
    reject_unauthorized: bool,
    state: VerifyState,
}

impl ClientVerifier {
    pub(crate) fn new(
        trust: TrustAnchors,
        request_cert: bool,
        reject_unauthorized: bool,
        state: VerifyState,
    ) -> Self {
        let subjects = trust
            .roots
            .roots
            .iter()
            .map(|anchor| anchor.subject().clone())
            .collect();
        let chain = AllowAnyAuthenticatedClient::new(RootCertStore::clone(&trust.roots)).boxed();

        Self {
            trust,
            chain,
            subjects,
            request_cert,
            reject_unauthorized,
            state,
        }
    }
}

impl ClientCertVerifier for ClientVerifier {
    fn offer_client_auth(&self) -> bool {
        self.request_cert
    }

    fn client_auth_mandatory(&self) -> bool {
        self.request_cert && self.reject_unauthorized
    }

    fn client_auth_root_subjects(&self) -> &[DistinguishedName] {
        &self.subjects
    }

    fn verify_client_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        now: SystemTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let chain = self
            .chain
            .verify_client_cert(end_entity, intermediates, now)
            .map(|_| ());
        let error = self.trust.classify(end_entity, intermediates, chain);
        self.state.record(error);

        match error {
            Some(error) if self.reject_unauthorized => {
                debug!(code = error.code(), "rejecting client certificate");
                Err(rustls::Error::InvalidCertificate(error.to_certificate_error()))
            }
            _ => Ok(ClientCertVerified::assertion()),
        }
    }
}
