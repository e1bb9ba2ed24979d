//! Certificate and key fixtures for tests.
//!
//! Regenerate with `gen_certs.sh`. Every leaf is issued by the test CA and
//! valid for 100 years.

/// Hostname of the primary test server.
pub const SERVER_DOMAIN: &str = "test-server.io";
/// Hostname served by the alternate (SNI) certificate.
pub const ALT_DOMAIN: &str = "alt.test-server.io";
/// Hostname of the revoked certificate.
pub const REVOKED_DOMAIN: &str = "revoked.test-server.io";
/// Passphrase protecting the encrypted key and the PKCS#12 bundle.
pub const PASSPHRASE: &str = "passphrase";

/// A certificate authority certificate fixture (PEM).
pub static CA_CERT_PEM: &[u8] = include_bytes!("certs/ca_cert.pem");
/// A certificate authority certificate fixture (DER).
pub static CA_CERT_DER: &[u8] = include_bytes!("certs/ca_cert.der");
/// CRL issued by the test CA, revoking the revoked-server certificate.
pub static CA_CRL_PEM: &[u8] = include_bytes!("certs/ca_crl.pem");

/// A server certificate (RSA 2048, PEM) for `SERVER_DOMAIN`.
pub static SERVER_CERT_PEM: &[u8] = include_bytes!("certs/server_cert.pem");
/// A server certificate (DER).
pub static SERVER_CERT_DER: &[u8] = include_bytes!("certs/server_cert.der");
/// The server's private key (PKCS#8 PEM).
pub static SERVER_KEY_PEM: &[u8] = include_bytes!("certs/server_key.pem");
/// The server's private key as encrypted PKCS#8 (PBES2, `PASSPHRASE`).
pub static SERVER_KEY_ENCRYPTED_PEM: &[u8] = include_bytes!("certs/server_key_encrypted.pem");
/// PKCS#12 bundle holding the server key, certificate and the CA.
pub static SERVER_PKCS12: &[u8] = include_bytes!("certs/server.p12");

/// Alternate server certificate (P-256) for `ALT_DOMAIN`.
pub static ALT_CERT_PEM: &[u8] = include_bytes!("certs/alt_cert.pem");
/// Alternate server key.
pub static ALT_KEY_PEM: &[u8] = include_bytes!("certs/alt_key.pem");

/// Client authentication certificate.
pub static CLIENT_CERT_PEM: &[u8] = include_bytes!("certs/client_cert.pem");
/// Client authentication key.
pub static CLIENT_KEY_PEM: &[u8] = include_bytes!("certs/client_key.pem");

/// Certificate for `REVOKED_DOMAIN`, listed in `CA_CRL_PEM`.
pub static REVOKED_CERT_PEM: &[u8] = include_bytes!("certs/revoked_cert.pem");
/// Key for the revoked certificate.
pub static REVOKED_KEY_PEM: &[u8] = include_bytes!("certs/revoked_key.pem");

/// Self-signed P-256 certificate for `SERVER_DOMAIN`.
pub static SELF_SIGNED_CERT_PEM: &[u8] = include_bytes!("certs/self_signed_cert.pem");
/// Key for the self-signed certificate.
pub static SELF_SIGNED_KEY_PEM: &[u8] = include_bytes!("certs/self_signed_key.pem");
