//! RSA encryption with a public or private key.

use rsa::{
    hazmat::{rsa_decrypt_and_check, rsa_encrypt},
    traits::PublicKeyParts,
    BigUint, Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey,
};

use crate::{
    decorate,
    hash::with_digest,
    key::{PrivateKeyData, PublicKeyData},
    CryptoError, DigestAlgorithm, KeyObject, Lib,
};

/// RSA padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsaPadding {
    /// PKCS#1 v1.5.
    Pkcs1,
    /// OAEP, for encryption only.
    Oaep,
    /// Raw RSA. Input must be exactly the modulus size.
    NoPadding,
    /// PSS, for signatures only.
    Pss,
}

/// Options for the RSA encryption functions.
#[derive(Debug, Clone, Default)]
pub struct PublicCipherOptions {
    /// Padding, defaulting to OAEP for `public_encrypt`/`private_decrypt` and
    /// PKCS#1 for `private_encrypt`/`public_decrypt`.
    pub padding: Option<RsaPadding>,
    /// OAEP and MGF1 digest, `sha1` by default.
    pub oaep_hash: Option<String>,
    /// OAEP label. Must be valid UTF-8.
    pub oaep_label: Option<Vec<u8>>,
}

fn rsa_public(key: &KeyObject) -> Result<RsaPublicKey, CryptoError> {
    let handle = key.managed_key().ok_or(CryptoError::InvalidKeyObjectType {
        actual: "secret",
        expected: "public or private",
    })?;
    match handle.public_data() {
        PublicKeyData::Rsa(key) | PublicKeyData::RsaPss(key, _) => Ok(key),
        _ => Err(operation_not_supported()),
    }
}

fn rsa_private(key: &KeyObject) -> Result<&RsaPrivateKey, CryptoError> {
    let data = match key {
        KeyObject::Private(handle) => handle.private_data(),
        other => {
            return Err(CryptoError::InvalidKeyObjectType {
                actual: other.key_type(),
                expected: "private",
            })
        }
    };
    match data {
        Some(PrivateKeyData::Rsa(key)) | Some(PrivateKeyData::RsaPss(key, _)) => Ok(key),
        _ => Err(operation_not_supported()),
    }
}

fn operation_not_supported() -> CryptoError {
    decorate(
        Lib::Evp,
        Some("EVP_PKEY_encrypt_init"),
        "operation not supported for this keytype",
    )
    .into()
}

fn too_large() -> CryptoError {
    decorate(Lib::Rsa, Some("RSA_padding_add"), "data too large for key size").into()
}

fn oaep(options: &PublicCipherOptions) -> Result<Oaep, CryptoError> {
    let name = options.oaep_hash.as_deref().unwrap_or("sha1");
    let algorithm = DigestAlgorithm::from_name(name)?;
    let label = match &options.oaep_label {
        Some(label) => Some(String::from_utf8(label.clone()).map_err(|_| {
            CryptoError::InvalidArgValue("The OAEP label must be valid UTF-8".to_string())
        })?),
        None => None,
    };

    let padding = with_digest!(algorithm, D => match label {
        Some(label) => Oaep::new_with_label::<D, _>(label),
        None => Oaep::new::<D>(),
    }, xof => return Err(CryptoError::InvalidDigest(name.to_string())));
    Ok(padding)
}

fn left_pad(value: &BigUint, len: usize) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    let mut out = vec![0u8; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

fn raw_public(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() != key.size() {
        return Err(decorate(
            Lib::Rsa,
            Some("RSA_padding_add_none"),
            "data too small for key size",
        )
        .into());
    }
    let m = BigUint::from_bytes_be(data);
    if &m >= key.n() {
        return Err(too_large());
    }
    let c = rsa_encrypt(key, &m)
        .map_err(|err| CryptoError::engine(Lib::Rsa, "RSA_public_encrypt", err.to_string()))?;
    Ok(left_pad(&c, key.size()))
}

fn raw_private(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() != key.size() {
        return Err(decorate(
            Lib::Rsa,
            Some("RSA_padding_add_none"),
            "data too small for key size",
        )
        .into());
    }
    let c = BigUint::from_bytes_be(data);
    if &c >= key.n() {
        return Err(too_large());
    }
    let mut rng = ::rand::thread_rng();
    let m = rsa_decrypt_and_check(key, Some(&mut rng), &c)
        .map_err(|err| CryptoError::engine(Lib::Rsa, "RSA_private_decrypt", err.to_string()))?;
    Ok(left_pad(&m, key.size()))
}

/// Encrypts `data` with the public part of `key`.
pub fn public_encrypt(
    key: &KeyObject,
    data: &[u8],
    options: &PublicCipherOptions,
) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_public(key)?;
    let mut rng = ::rand::thread_rng();

    let result = match options.padding.unwrap_or(RsaPadding::Oaep) {
        RsaPadding::Oaep => key.encrypt(&mut rng, oaep(options)?, data),
        RsaPadding::Pkcs1 => key.encrypt(&mut rng, Pkcs1v15Encrypt, data),
        RsaPadding::NoPadding => return raw_public(&key, data),
        RsaPadding::Pss => return Err(unknown_padding()),
    };
    result.map_err(|_| too_large())
}

/// Decrypts data produced by [`public_encrypt`].
pub fn private_decrypt(
    key: &KeyObject,
    data: &[u8],
    options: &PublicCipherOptions,
) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_private(key)?;

    match options.padding.unwrap_or(RsaPadding::Oaep) {
        RsaPadding::Oaep => key.decrypt(oaep(options)?, data).map_err(|_| {
            decorate(Lib::Rsa, Some("RSA_padding_check_PKCS1_OAEP"), "oaep decoding error").into()
        }),
        RsaPadding::Pkcs1 => key.decrypt(Pkcs1v15Encrypt, data).map_err(|_| {
            decorate(Lib::Rsa, Some("RSA_padding_check_PKCS1_type_2"), "pkcs decoding error")
                .into()
        }),
        RsaPadding::NoPadding => raw_private(key, data),
        RsaPadding::Pss => Err(unknown_padding()),
    }
}

/// Encrypts `data` with the private key, using signature (type 1) padding.
pub fn private_encrypt(
    key: &KeyObject,
    data: &[u8],
    options: &PublicCipherOptions,
) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_private(key)?;

    match options.padding.unwrap_or(RsaPadding::Pkcs1) {
        RsaPadding::Pkcs1 => key
            .sign(Pkcs1v15Sign::new_unprefixed(), data)
            .map_err(|_| too_large()),
        RsaPadding::NoPadding => raw_private(key, data),
        RsaPadding::Oaep | RsaPadding::Pss => Err(unknown_padding()),
    }
}

/// Recovers data produced by [`private_encrypt`].
pub fn public_decrypt(
    key: &KeyObject,
    data: &[u8],
    options: &PublicCipherOptions,
) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_public(key)?;

    match options.padding.unwrap_or(RsaPadding::Pkcs1) {
        RsaPadding::Pkcs1 => {
            let block = raw_public(&key, data)?;
            unpad_type1(&block).ok_or_else(|| {
                decorate(
                    Lib::Rsa,
                    Some("RSA_padding_check_PKCS1_type_1"),
                    "invalid padding",
                )
                .into()
            })
        }
        RsaPadding::NoPadding => raw_public(&key, data),
        RsaPadding::Oaep | RsaPadding::Pss => Err(unknown_padding()),
    }
}

/// Strips `00 01 FF.. 00` and returns the payload.
fn unpad_type1(block: &[u8]) -> Option<Vec<u8>> {
    if block.len() < 11 || block[0] != 0x00 || block[1] != 0x01 {
        return None;
    }
    let separator = block[2..].iter().position(|b| *b != 0xff)? + 2;
    if separator < 10 || block[separator] != 0x00 {
        return None;
    }
    Some(block[separator + 1..].to_vec())
}

fn unknown_padding() -> CryptoError {
    decorate(Lib::Rsa, Some("RSA_padding"), "unknown padding type").into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_key_pair, KeyInput, KeyPairOptions};
    use rstest::rstest;
    use tlswrap_fixtures::SERVER_KEY_PEM;

    fn server_key() -> (KeyObject, KeyObject) {
        let private = KeyObject::create_private_key(&KeyInput::pem(SERVER_KEY_PEM)).unwrap();
        (KeyObject::public_from(&private).unwrap(), private)
    }

    #[rstest]
    #[case::oaep_sha1(PublicCipherOptions::default())]
    #[case::oaep_sha256_label(PublicCipherOptions {
        padding: Some(RsaPadding::Oaep),
        oaep_hash: Some("sha256".into()),
        oaep_label: Some(b"label".to_vec()),
    })]
    #[case::pkcs1(PublicCipherOptions {
        padding: Some(RsaPadding::Pkcs1),
        ..Default::default()
    })]
    fn test_public_encrypt_private_decrypt(#[case] options: PublicCipherOptions) {
        let (public, private) = server_key();
        let ciphertext = public_encrypt(&public, b"attack at dawn", &options).unwrap();
        assert_eq!(ciphertext.len(), 256);
        assert_eq!(
            private_decrypt(&private, &ciphertext, &options).unwrap(),
            b"attack at dawn"
        );
    }

    #[test]
    fn test_oaep_label_mismatch_fails() {
        let (public, private) = server_key();
        let options = PublicCipherOptions {
            oaep_label: Some(b"one".to_vec()),
            ..Default::default()
        };
        let ciphertext = public_encrypt(&public, b"data", &options).unwrap();

        let other = PublicCipherOptions {
            oaep_label: Some(b"two".to_vec()),
            ..Default::default()
        };
        let err = private_decrypt(&private, &ciphertext, &other).unwrap_err();
        assert_eq!(err.code(), "ERR_OSSL_RSA_OAEP_DECODING_ERROR");
    }

    #[test]
    fn test_private_encrypt_public_decrypt() {
        let (public, private) = server_key();
        let options = PublicCipherOptions::default();
        let ciphertext = private_encrypt(&private, b"signed blob", &options).unwrap();
        assert_eq!(
            public_decrypt(&public, &ciphertext, &options).unwrap(),
            b"signed blob"
        );
        // Deterministic padding.
        assert_eq!(
            private_encrypt(&private, b"signed blob", &options).unwrap(),
            ciphertext
        );
    }

    #[test]
    fn test_no_padding_round_trip() {
        let (public, private) = server_key();
        let options = PublicCipherOptions {
            padding: Some(RsaPadding::NoPadding),
            ..Default::default()
        };
        let mut block = vec![0u8; 256];
        block[1..9].copy_from_slice(b"raw data");

        let ciphertext = public_encrypt(&public, &block, &options).unwrap();
        assert_eq!(private_decrypt(&private, &ciphertext, &options).unwrap(), block);

        assert!(public_encrypt(&public, b"short", &options).is_err());
    }

    #[test]
    fn test_decrypt_needs_private_key() {
        let (public, _) = server_key();
        let err = private_decrypt(&public, &[0; 256], &PublicCipherOptions::default()).unwrap_err();
        assert_eq!(err.code(), "ERR_CRYPTO_INVALID_KEY_OBJECT_TYPE");
    }

    #[test]
    fn test_non_rsa_key_rejected() {
        let (public, _) = generate_key_pair(&KeyPairOptions::Ed25519).unwrap();
        let err = public_encrypt(&public, b"x", &PublicCipherOptions::default()).unwrap_err();
        assert_eq!(err.code(), "ERR_OSSL_EVP_OPERATION_NOT_SUPPORTED_FOR_THIS_KEYTYPE");
    }

    #[test]
    fn test_unpad_type1() {
        let mut block = vec![0x00, 0x01];
        block.extend_from_slice(&[0xff; 8]);
        block.push(0x00);
        block.extend_from_slice(b"ok");
        assert_eq!(unpad_type1(&block).unwrap(), b"ok");

        block[1] = 0x02;
        assert!(unpad_type1(&block).is_none());
    }
}
