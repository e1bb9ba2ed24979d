//! Signatures: RSA (PKCS#1 v1.5 and PSS), ECDSA and Ed25519.
//!
//! [`Sign`] and [`Verify`] hash streamed input and consume themselves on
//! completion. The one-shot [`sign`] and [`verify`] also cover Ed25519,
//! which signs the message itself rather than a digest.

use ed25519_dalek::{Signer as _, Verifier as _};
use rsa::{traits::PublicKeyParts, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use signature::hazmat::{PrehashSigner, PrehashVerifier};

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::{
    curve::{EcPublic, EcSecret},
    decorate,
    hash::{digest, with_digest},
    key::{PrivateKeyData, PssParams, PublicKeyData},
    CryptoError, DigestAlgorithm, Hash, KeyObject, Lib, RsaPadding,
};

/// Salt length of an RSA-PSS signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PssSaltLength {
    /// Same as the digest size.
    Digest,
    /// Largest salt the key allows.
    Max,
    /// Largest salt when signing; any salt when verifying.
    Auto,
    /// Exactly this many bytes.
    Len(usize),
}

/// Encoding of ECDSA signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DsaEncoding {
    /// ASN.1 `SEQUENCE { r, s }`.
    #[default]
    Der,
    /// Fixed width `r || s`.
    IeeeP1363,
}

/// Options for signing and verification.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignOptions {
    /// RSA padding; PSS for RSA-PSS keys and PKCS#1 otherwise.
    pub padding: Option<RsaPadding>,
    /// PSS salt length; `Max` when signing and `Auto` when verifying.
    pub salt_length: Option<PssSaltLength>,
    /// ECDSA signature encoding.
    pub dsa_encoding: DsaEncoding,
}

fn unsupported_key() -> CryptoError {
    decorate(
        Lib::Evp,
        Some("EVP_DigestSignInit"),
        "operation not supported for this keytype",
    )
    .into()
}

fn illegal_padding() -> CryptoError {
    decorate(
        Lib::Rsa,
        Some("pkey_rsa_ctrl"),
        "illegal or unsupported padding mode",
    )
    .into()
}

fn sign_failed<E: std::fmt::Display>(err: E) -> CryptoError {
    CryptoError::engine(Lib::Evp, "EVP_PKEY_sign", err.to_string())
}

/// Largest PSS salt for a modulus of `bits` bits.
fn max_salt_len(bits: usize, hash_len: usize) -> usize {
    let em_len = (bits - 1).div_ceil(8);
    em_len.saturating_sub(hash_len + 2)
}

fn check_pss_digest(
    algorithm: DigestAlgorithm,
    params: Option<&PssParams>,
) -> Result<(), CryptoError> {
    if let Some(params) = params {
        if params.hash != algorithm {
            return Err(decorate(Lib::Rsa, Some("pkey_pss_init"), "digest not allowed").into());
        }
        if params.mgf1_hash != params.hash {
            return Err(decorate(Lib::Rsa, Some("pkey_pss_init"), "unsupported mask parameter").into());
        }
    }
    Ok(())
}

fn resolve_padding(
    options: &SignOptions,
    is_pss_key: bool,
) -> Result<RsaPadding, CryptoError> {
    let padding = options.padding.unwrap_or(if is_pss_key {
        RsaPadding::Pss
    } else {
        RsaPadding::Pkcs1
    });
    match padding {
        RsaPadding::Pss => Ok(padding),
        RsaPadding::Pkcs1 if !is_pss_key => Ok(padding),
        _ => Err(illegal_padding()),
    }
}

fn rsa_sign(
    key: &RsaPrivateKey,
    is_pss_key: bool,
    params: Option<&PssParams>,
    algorithm: DigestAlgorithm,
    hashed: &[u8],
    options: &SignOptions,
) -> Result<Vec<u8>, CryptoError> {
    let invalid_digest = || CryptoError::InvalidDigest(algorithm.name().to_string());

    match resolve_padding(options, is_pss_key)? {
        RsaPadding::Pkcs1 => with_digest!(algorithm, D => {
            key.sign(Pkcs1v15Sign::new::<D>(), hashed).map_err(sign_failed)
        }, xof => Err(invalid_digest())),
        _ => {
            check_pss_digest(algorithm, params)?;
            let hash_len = algorithm.output_size();
            let max = max_salt_len(key.n().bits(), hash_len);
            let salt = match options.salt_length.unwrap_or(PssSaltLength::Max) {
                PssSaltLength::Digest => hash_len,
                PssSaltLength::Max | PssSaltLength::Auto => max,
                PssSaltLength::Len(len) => len,
            };
            if salt > max {
                return Err(decorate(
                    Lib::Rsa,
                    Some("RSA_padding_add_PKCS1_PSS_mgf1"),
                    "data too large for key size",
                )
                .into());
            }
            if params.is_some_and(|params| salt < params.salt_length) {
                return Err(decorate(Lib::Rsa, Some("pkey_rsa_ctrl"), "pss saltlen too small").into());
            }

            trace!("pss signature with {} byte salt", salt);
            let mut rng = ::rand::thread_rng();
            with_digest!(algorithm, D => {
                key.sign_with_rng(&mut rng, Pss::new_with_salt::<D>(salt), hashed)
                    .map_err(sign_failed)
            }, xof => Err(invalid_digest()))
        }
    }
}

fn rsa_verify(
    key: &RsaPublicKey,
    is_pss_key: bool,
    params: Option<&PssParams>,
    algorithm: DigestAlgorithm,
    hashed: &[u8],
    signature: &[u8],
    options: &SignOptions,
) -> Result<bool, CryptoError> {
    let invalid_digest = || CryptoError::InvalidDigest(algorithm.name().to_string());

    match resolve_padding(options, is_pss_key)? {
        RsaPadding::Pkcs1 => with_digest!(algorithm, D => {
            Ok(key.verify(Pkcs1v15Sign::new::<D>(), hashed, signature).is_ok())
        }, xof => Err(invalid_digest())),
        _ => {
            check_pss_digest(algorithm, params)?;
            let hash_len = algorithm.output_size();
            let max = max_salt_len(key.n().bits(), hash_len);
            let min = params.map_or(0, |params| params.salt_length);

            let candidates: Vec<usize> = match options.salt_length.unwrap_or(PssSaltLength::Auto) {
                PssSaltLength::Digest => vec![hash_len],
                PssSaltLength::Max => vec![max],
                PssSaltLength::Len(len) => vec![len],
                // Likely lengths first, then everything else.
                PssSaltLength::Auto => [hash_len, max]
                    .into_iter()
                    .chain((0..=max).filter(|len| *len != hash_len && *len != max))
                    .collect(),
            };

            Ok(candidates
                .into_iter()
                .filter(|len| *len >= min && *len <= max)
                .any(|salt| {
                    with_digest!(algorithm, D => {
                        key.verify(Pss::new_with_salt::<D>(salt), hashed, signature).is_ok()
                    }, xof => false)
                }))
        }
    }
}

macro_rules! ecdsa_sign {
    ($curve:ident, $key:expr, $hashed:expr, $encoding:expr) => {{
        let signer = $curve::ecdsa::SigningKey::from($key);
        let signature: $curve::ecdsa::Signature =
            signer.sign_prehash($hashed).map_err(sign_failed)?;
        match $encoding {
            DsaEncoding::Der => signature.to_der().as_bytes().to_vec(),
            DsaEncoding::IeeeP1363 => signature.to_bytes().to_vec(),
        }
    }};
}

macro_rules! ecdsa_verify {
    ($curve:ident, $key:expr, $hashed:expr, $signature:expr, $encoding:expr) => {{
        let verifier = $curve::ecdsa::VerifyingKey::from($key);
        let parsed = match $encoding {
            DsaEncoding::Der => $curve::ecdsa::Signature::from_der($signature),
            DsaEncoding::IeeeP1363 => $curve::ecdsa::Signature::from_slice($signature),
        };
        match parsed {
            Ok(signature) => verifier.verify_prehash($hashed, &signature).is_ok(),
            Err(_) => false,
        }
    }};
}

fn sign_prehashed(
    key: &PrivateKeyData,
    algorithm: DigestAlgorithm,
    hashed: &[u8],
    options: &SignOptions,
) -> Result<Vec<u8>, CryptoError> {
    match key {
        PrivateKeyData::Rsa(key) => rsa_sign(key, false, None, algorithm, hashed, options),
        PrivateKeyData::RsaPss(key, params) => {
            rsa_sign(key, true, params.as_ref(), algorithm, hashed, options)
        }
        PrivateKeyData::Ec(secret) => Ok(match secret {
            EcSecret::P256(key) => ecdsa_sign!(p256, key, hashed, options.dsa_encoding),
            EcSecret::P384(key) => ecdsa_sign!(p384, key, hashed, options.dsa_encoding),
            EcSecret::K256(key) => ecdsa_sign!(k256, key, hashed, options.dsa_encoding),
        }),
        PrivateKeyData::Ed25519(_) | PrivateKeyData::X25519(_) => Err(unsupported_key()),
    }
}

fn verify_prehashed(
    key: &PublicKeyData,
    algorithm: DigestAlgorithm,
    hashed: &[u8],
    signature: &[u8],
    options: &SignOptions,
) -> Result<bool, CryptoError> {
    match key {
        PublicKeyData::Rsa(key) => {
            rsa_verify(key, false, None, algorithm, hashed, signature, options)
        }
        PublicKeyData::RsaPss(key, params) => {
            rsa_verify(key, true, params.as_ref(), algorithm, hashed, signature, options)
        }
        PublicKeyData::Ec(public) => Ok(match public {
            EcPublic::P256(key) => {
                ecdsa_verify!(p256, key, hashed, signature, options.dsa_encoding)
            }
            EcPublic::P384(key) => {
                ecdsa_verify!(p384, key, hashed, signature, options.dsa_encoding)
            }
            EcPublic::K256(key) => {
                ecdsa_verify!(k256, key, hashed, signature, options.dsa_encoding)
            }
        }),
        PublicKeyData::Ed25519(_) | PublicKeyData::X25519(_) => Err(unsupported_key()),
    }
}

fn private_key_data(key: &KeyObject) -> Result<&PrivateKeyData, CryptoError> {
    match key {
        KeyObject::Private(handle) => handle.private_data().ok_or(CryptoError::InvalidKeyObjectType {
            actual: "public",
            expected: "private",
        }),
        other => Err(CryptoError::InvalidKeyObjectType {
            actual: other.key_type(),
            expected: "private",
        }),
    }
}

fn public_key_data(key: &KeyObject) -> Result<PublicKeyData, CryptoError> {
    key.managed_key()
        .map(|handle| handle.public_data())
        .ok_or(CryptoError::InvalidKeyObjectType {
            actual: "secret",
            expected: "public",
        })
}

fn signing_digest(name: &str) -> Result<DigestAlgorithm, CryptoError> {
    let algorithm = DigestAlgorithm::from_name(name)?;
    if algorithm.is_xof() {
        return Err(CryptoError::InvalidDigest(name.to_string()));
    }
    Ok(algorithm)
}

/// A streaming signer.
#[derive(Debug)]
pub struct Sign {
    hash: Hash,
}

impl Sign {
    /// Creates a signer hashing with the named digest.
    pub fn new(algorithm: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            hash: Hash::with_algorithm(signing_digest(algorithm)?, None)?,
        })
    }

    /// Feeds more data.
    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        self.hash.update(data)
    }

    /// Signs the data fed so far.
    pub fn sign(mut self, key: &KeyObject, options: &SignOptions) -> Result<Vec<u8>, CryptoError> {
        let key = private_key_data(key)?;
        let hashed = self.hash.digest();
        sign_prehashed(key, self.hash.algorithm(), &hashed, options)
    }
}

/// A streaming verifier.
#[derive(Debug)]
pub struct Verify {
    hash: Hash,
}

impl Verify {
    /// Creates a verifier hashing with the named digest.
    pub fn new(algorithm: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            hash: Hash::with_algorithm(signing_digest(algorithm)?, None)?,
        })
    }

    /// Feeds more data.
    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        self.hash.update(data)
    }

    /// Checks `signature` over the data fed so far.
    ///
    /// A malformed signature verifies as `false`.
    pub fn verify(
        mut self,
        key: &KeyObject,
        signature: &[u8],
        options: &SignOptions,
    ) -> Result<bool, CryptoError> {
        let key = public_key_data(key)?;
        let hashed = self.hash.digest();
        verify_prehashed(&key, self.hash.algorithm(), &hashed, signature, options)
    }
}

/// Signs `data` in one shot.
///
/// Ed25519 keys take no digest. Other keys default to SHA-256.
pub fn sign(
    algorithm: Option<&str>,
    data: &[u8],
    key: &KeyObject,
    options: &SignOptions,
) -> Result<Vec<u8>, CryptoError> {
    let key = private_key_data(key)?;
    if let PrivateKeyData::Ed25519(signing_key) = key {
        if let Some(name) = algorithm {
            return Err(CryptoError::InvalidDigest(name.to_string()));
        }
        return Ok(signing_key.sign(data).to_bytes().to_vec());
    }

    let algorithm = signing_digest(algorithm.unwrap_or("sha256"))?;
    sign_prehashed(key, algorithm, &digest(algorithm, data), options)
}

/// Verifies a one-shot signature.
pub fn verify(
    algorithm: Option<&str>,
    data: &[u8],
    key: &KeyObject,
    signature: &[u8],
    options: &SignOptions,
) -> Result<bool, CryptoError> {
    let key = public_key_data(key)?;
    if let PublicKeyData::Ed25519(verifying_key) = &key {
        if let Some(name) = algorithm {
            return Err(CryptoError::InvalidDigest(name.to_string()));
        }
        return Ok(ed25519_dalek::Signature::from_slice(signature)
            .map(|signature| verifying_key.verify(data, &signature).is_ok())
            .unwrap_or(false));
    }

    let algorithm = signing_digest(algorithm.unwrap_or("sha256"))?;
    verify_prehashed(&key, algorithm, &digest(algorithm, data), signature, options)
}
