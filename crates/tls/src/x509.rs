//! Certificate introspection.

use std::{fmt, io::Cursor};

use rustls::Certificate;
use wrap_crypto::{hash::digest, DigestAlgorithm, KeyEncoding, KeyInput, KeyObject};
use x509_parser::{
    extensions::GeneralName,
    objects::{oid2abbrev, oid_registry},
    prelude::{FromDer, X509Certificate, X509Name},
    public_key::PublicKey,
    time::ASN1Time,
};

use crate::{ErrorKind, TlsError};

/// An X.509 distinguished name as ordered `(short name, value)` pairs,
/// e.g. `[("CN", "test-server.io")]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Name(Vec<(String, String)>);

impl Name {
    fn from_x509(name: &X509Name<'_>) -> Self {
        let registry = oid_registry();
        Self(
            name.iter_attributes()
                .map(|attr| {
                    let key = oid2abbrev(attr.attr_type(), registry)
                        .map(str::to_string)
                        .unwrap_or_else(|_| attr.attr_type().to_id_string());
                    let value = attr
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|_| hex::encode_upper(attr.as_slice()));
                    (key, value)
                })
                .collect(),
        )
    }

    /// The first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All entries in certificate order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

/// Public key details of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicKeyInfo {
    /// Key size in bits.
    pub bits: Option<usize>,
    /// RSA modulus, uppercase hex.
    pub modulus: Option<String>,
    /// RSA public exponent, e.g. `0x10001`.
    pub exponent: Option<String>,
    /// EC curve name, e.g. `prime256v1`.
    pub asn1_curve: Option<String>,
    /// NIST name of the EC curve, e.g. `P-256`.
    pub nist_curve: Option<String>,
    /// The encoded public key.
    pub pubkey: Vec<u8>,
}

/// A parsed certificate, in the shape applications inspect peers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject name.
    pub subject: Name,
    /// Issuer name.
    pub issuer: Name,
    /// Subject alternative names, e.g. `DNS:test-server.io, IP Address:127.0.0.1`.
    pub subjectaltname: Option<String>,
    /// Key details.
    pub public_key: PublicKeyInfo,
    /// Start of validity, e.g. `Oct 19 05:08:41 2026 GMT`.
    pub valid_from: String,
    /// End of validity.
    pub valid_to: String,
    /// Colon separated SHA-1 fingerprint of the DER encoding.
    pub fingerprint: String,
    /// Colon separated SHA-256 fingerprint of the DER encoding.
    pub fingerprint256: String,
    /// Extended key usage OIDs.
    pub ext_key_usage: Vec<String>,
    /// Serial number, uppercase hex.
    pub serial_number: String,
    /// Whether the certificate is a CA.
    pub ca: bool,
    /// DER encoding.
    pub raw: Vec<u8>,
    /// The issuing certificate, when the full chain was requested and the
    /// issuer is known. Self-signed certificates end the chain.
    pub issuer_certificate: Option<Box<CertificateInfo>>,
}

impl CertificateInfo {
    /// Parses a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, TlsError> {
        let cert = parse(der)?;

        let subjectaltname = cert
            .subject_alternative_name()
            .ok()
            .flatten()
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(format_general_name)
                    .collect::<Vec<_>>()
                    .join(", ")
            });

        let ext_key_usage = match cert.extended_key_usage() {
            Ok(Some(eku)) => {
                let eku = eku.value;
                let mut oids = Vec::new();
                for (set, oid) in [
                    (eku.server_auth, "1.3.6.1.5.5.7.3.1"),
                    (eku.client_auth, "1.3.6.1.5.5.7.3.2"),
                    (eku.code_signing, "1.3.6.1.5.5.7.3.3"),
                    (eku.email_protection, "1.3.6.1.5.5.7.3.4"),
                    (eku.time_stamping, "1.3.6.1.5.5.7.3.8"),
                    (eku.ocsp_signing, "1.3.6.1.5.5.7.3.9"),
                ] {
                    if set {
                        oids.push(oid.to_string());
                    }
                }
                oids.extend(eku.other.iter().map(|oid| oid.to_id_string()));
                oids
            }
            _ => Vec::new(),
        };

        Ok(Self {
            subject: Name::from_x509(cert.subject()),
            issuer: Name::from_x509(cert.issuer()),
            subjectaltname,
            public_key: public_key_info(&cert),
            valid_from: format_time(cert.validity().not_before),
            valid_to: format_time(cert.validity().not_after),
            fingerprint: fingerprint(DigestAlgorithm::Sha1, der),
            fingerprint256: fingerprint(DigestAlgorithm::Sha256, der),
            ext_key_usage,
            serial_number: serial_hex(cert.raw_serial()),
            ca: cert.is_ca(),
            raw: der.to_vec(),
            issuer_certificate: None,
        })
    }

    /// Whether subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>, TlsError> {
    X509Certificate::from_der(der)
        .map(|(_, cert)| cert)
        .map_err(|_| TlsError::ssl_config("d2i_X509", "wrong tag"))
}

fn public_key_info(cert: &X509Certificate<'_>) -> PublicKeyInfo {
    let spki = cert.public_key();
    let mut info = PublicKeyInfo {
        pubkey: spki.subject_public_key.data.to_vec(),
        ..Default::default()
    };

    if let Ok(PublicKey::RSA(rsa)) = spki.parsed() {
        let modulus = strip_leading_zeros(rsa.modulus);
        info.modulus = Some(hex::encode_upper(modulus));
        let exponent = strip_leading_zeros(rsa.exponent)
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64);
        info.exponent = Some(format!("0x{exponent:x}"));
    }

    if let Ok(key) = KeyObject::create_public_key(&KeyInput::der(spki.raw, KeyEncoding::Spki)) {
        if let Some(details) = key.asymmetric_key_details() {
            info.bits = details.modulus_length;
            if let Some(curve) = details.named_curve {
                info.asn1_curve = Some(curve.to_string());
                let (bits, nist) = match curve {
                    "prime256v1" => (256, Some("P-256")),
                    "secp384r1" => (384, Some("P-384")),
                    "secp256k1" => (256, None),
                    _ => (0, None),
                };
                info.bits = (bits > 0).then_some(bits);
                info.nist_curve = nist.map(str::to_string);
            }
        }
    }

    info
}

fn format_general_name(name: &GeneralName<'_>) -> Option<String> {
    match name {
        GeneralName::DNSName(dns) => Some(format!("DNS:{dns}")),
        GeneralName::RFC822Name(email) => Some(format!("email:{email}")),
        GeneralName::URI(uri) => Some(format!("URI:{uri}")),
        GeneralName::IPAddress(ip) => match ip.len() {
            4 => Some(format!(
                "IP Address:{}",
                std::net::Ipv4Addr::new(ip[0], ip[1], ip[2], ip[3])
            )),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(ip);
                Some(format!("IP Address:{}", std::net::Ipv6Addr::from(octets)))
            }
            _ => None,
        },
        GeneralName::DirectoryName(dn) => Some(format!("DirName:{dn}")),
        _ => None,
    }
}

fn format_time(time: ASN1Time) -> String {
    let formatted = time.to_string();
    match formatted.strip_suffix(" +00:00") {
        Some(utc) => format!("{utc} GMT"),
        None => formatted,
    }
}

fn fingerprint(algorithm: DigestAlgorithm, der: &[u8]) -> String {
    digest(algorithm, der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn serial_hex(raw: &[u8]) -> String {
    let serial = strip_leading_zeros(raw);
    if serial.is_empty() {
        "00".to_string()
    } else {
        hex::encode_upper(serial)
    }
}

/// Parses every certificate in a PEM bundle.
pub(crate) fn parse_pem_chain(pem: &[u8]) -> Result<Vec<Certificate>, TlsError> {
    let certs = rustls_pemfile::certs(&mut Cursor::new(pem))
        .map_err(|_| TlsError::ssl_config("PEM_read_bio_X509", "bad base64 decode"))?;
    if certs.is_empty() {
        return Err(TlsError::ssl_config("PEM_read_bio", "no start line"));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

/// Parses every CRL in a PEM bundle.
pub(crate) fn parse_pem_crls(pem: &[u8]) -> Result<Vec<Vec<u8>>, TlsError> {
    let crls = rustls_pemfile::crls(&mut Cursor::new(pem))
        .map_err(|_| TlsError::ssl_config("PEM_read_bio_X509_CRL", "bad base64 decode"))?;
    if crls.is_empty() {
        return Err(TlsError::ssl_config("PEM_read_bio", "no start line"));
    }
    for crl in &crls {
        x509_parser::parse_x509_crl(crl)
            .map_err(|_| TlsError::ssl_config("d2i_X509_CRL", "wrong tag"))?;
    }
    Ok(crls)
}

/// Whether `issuer` issued `cert`, judged by names.
pub(crate) fn is_issued_by(cert: &[u8], issuer: &[u8]) -> bool {
    match (parse(cert), parse(issuer)) {
        (Ok(cert), Ok(issuer)) => cert.issuer().as_raw() == issuer.subject().as_raw(),
        _ => false,
    }
}

/// Whether the certificate names itself as issuer.
pub(crate) fn is_self_issued(der: &[u8]) -> bool {
    is_issued_by(der, der)
}

/// Whether `serial` issued by `issuer` appears in any of `crls`.
pub(crate) fn is_revoked(der: &[u8], crls: &[Vec<u8>]) -> Result<bool, TlsError> {
    let cert = parse(der)?;
    let serial = strip_leading_zeros(cert.raw_serial());

    for crl in crls {
        let (_, crl) = x509_parser::parse_x509_crl(crl)
            .map_err(|_| TlsError::new(ErrorKind::Config, "ERR_TLS_INVALID_CRL", "invalid CRL"))?;
        if crl.issuer().as_raw() != cert.issuer().as_raw() {
            continue;
        }
        if crl
            .iter_revoked_certificates()
            .any(|revoked| strip_leading_zeros(revoked.raw_serial()) == serial)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The leaf's subject public key info, DER encoded.
pub(crate) fn spki_der(der: &[u8]) -> Result<Vec<u8>, TlsError> {
    Ok(parse(der)?.public_key().raw.to_vec())
}
