//! Key derivation functions and constant-time comparison.

use ::digest::Digest;
use ::hmac::SimpleHmac;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{hash::with_digest, CryptoError, DigestAlgorithm};

/// Derives a key and IV from a passphrase the legacy way: MD5, no salt, one
/// iteration.
///
/// Only kept for passphrase based ciphers. Use [`pbkdf2`] or [`scrypt`] for
/// anything new.
pub(crate) fn bytes_to_key(
    passphrase: &[u8],
    key_len: usize,
    iv_len: usize,
) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
    let mut material = Zeroizing::new(Vec::with_capacity(key_len + iv_len + 16));
    let mut prev = Zeroizing::new(Vec::new());

    while material.len() < key_len + iv_len {
        let mut md5 = ::md5::Md5::new();
        md5.update(&*prev);
        md5.update(passphrase);
        *prev = md5.finalize().to_vec();
        material.extend_from_slice(&prev);
    }

    let key = Zeroizing::new(material[..key_len].to_vec());
    let iv = Zeroizing::new(material[key_len..key_len + iv_len].to_vec());
    (key, iv)
}

/// PBKDF2 with HMAC over the named digest.
pub fn pbkdf2(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
    digest: &str,
) -> Result<Vec<u8>, CryptoError> {
    let algorithm = DigestAlgorithm::from_name(digest)?;
    if iterations == 0 {
        return Err(CryptoError::InvalidArgValue(
            "iterations must be at least 1".to_string(),
        ));
    }

    let mut out = vec![0u8; key_len];
    with_digest!(algorithm, D => {
        ::pbkdf2::pbkdf2::<SimpleHmac<D>>(password, salt, iterations, &mut out)
            .map_err(|_| CryptoError::InvalidKeyLength)?
    }, xof => return Err(CryptoError::InvalidDigest(digest.to_string())));

    Ok(out)
}

/// Cost parameters for [`scrypt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptOptions {
    /// CPU/memory cost, a power of two greater than one.
    pub cost: u64,
    /// Block size.
    pub block_size: u32,
    /// Parallelization.
    pub parallelization: u32,
    /// Upper bound on the memory the derivation may use.
    pub max_memory: u64,
}

impl Default for ScryptOptions {
    fn default() -> Self {
        Self {
            cost: 16384,
            block_size: 8,
            parallelization: 1,
            max_memory: 32 << 20,
        }
    }
}

impl ScryptOptions {
    fn params(&self) -> Result<::scrypt::Params, CryptoError> {
        if self.cost < 2 || !self.cost.is_power_of_two() {
            return Err(CryptoError::ScryptInvalidParameter);
        }

        let memory = 128u64
            .checked_mul(self.cost)
            .and_then(|m| m.checked_mul(self.block_size as u64));
        match memory {
            Some(memory) if memory <= self.max_memory => {}
            _ => return Err(CryptoError::ScryptInvalidParameter),
        }

        let log_n = self.cost.trailing_zeros() as u8;
        ::scrypt::Params::new(
            log_n,
            self.block_size,
            self.parallelization,
            ::scrypt::Params::RECOMMENDED_LEN,
        )
        .map_err(|_| CryptoError::ScryptInvalidParameter)
    }
}

/// scrypt key derivation.
pub fn scrypt(
    password: &[u8],
    salt: &[u8],
    key_len: usize,
    options: &ScryptOptions,
) -> Result<Vec<u8>, CryptoError> {
    let params = options.params()?;

    let mut out = vec![0u8; key_len];
    if key_len > 0 {
        ::scrypt::scrypt(password, salt, &params, &mut out)
            .map_err(|_| CryptoError::ScryptInvalidParameter)?;
    }
    Ok(out)
}

/// Compares two buffers in constant time.
///
/// The buffers must have the same length.
pub fn timing_safe_equal(a: &[u8], b: &[u8]) -> Result<bool, CryptoError> {
    if a.len() != b.len() {
        return Err(CryptoError::TimingSafeEqualLength);
    }
    Ok(a.ct_eq(b).into())
}
