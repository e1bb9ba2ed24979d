//! Streaming HMAC over the fixed-output digests.

use ::hmac::{Mac, SimpleHmac};

use crate::{hash::with_digest, CryptoError, DigestAlgorithm};

/// A streaming HMAC.
///
/// Like [`crate::Hash`], the tag is computed once and cached.
pub struct Hmac {
    algorithm: DigestAlgorithm,
    mac: Option<Box<dyn DynMac>>,
    digest: Option<Vec<u8>>,
}

trait DynMac: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

impl<M: Mac + Send + 'static> DynMac for M {
    fn update(&mut self, data: &[u8]) {
        Mac::update(self, data)
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        Mac::finalize(*self).into_bytes().to_vec()
    }
}

impl std::fmt::Debug for Hmac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hmac")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Hmac {
    /// Creates an HMAC for the named digest. Keys of any length are accepted.
    pub fn new(name: &str, key: &[u8]) -> Result<Self, CryptoError> {
        let algorithm = DigestAlgorithm::from_name(name)?;
        let mac: Box<dyn DynMac> = with_digest!(algorithm, D => {
            Box::new(
                <SimpleHmac<D> as Mac>::new_from_slice(key)
                    .map_err(|_| CryptoError::InvalidKeyLength)?,
            )
        }, xof => return Err(CryptoError::InvalidDigest(name.to_string())));

        Ok(Self {
            algorithm,
            mac: Some(mac),
            digest: None,
        })
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Feeds more data.
    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        match self.mac.as_mut() {
            Some(mac) => {
                mac.update(data);
                Ok(())
            }
            None => Err(CryptoError::InvalidState("Digest already called")),
        }
    }

    /// Returns the tag, computing it on the first call.
    pub fn digest(&mut self) -> Vec<u8> {
        if let Some(mac) = self.mac.take() {
            self.digest = Some(mac.finalize());
        }
        self.digest.clone().unwrap_or_default()
    }
}
