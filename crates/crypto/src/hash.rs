//! Message digests, including the SHAKE extendable-output functions.

use ::digest::{Digest as _, ExtendableOutput, Update};

use crate::{decorate, CryptoError, Lib};

/// A digest algorithm known to this crate.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Shake128,
    Shake256,
}

const ALL: &[DigestAlgorithm] = &[
    DigestAlgorithm::Md5,
    DigestAlgorithm::Sha1,
    DigestAlgorithm::Sha224,
    DigestAlgorithm::Sha256,
    DigestAlgorithm::Sha384,
    DigestAlgorithm::Sha512,
    DigestAlgorithm::Sha512_224,
    DigestAlgorithm::Sha512_256,
    DigestAlgorithm::Sha3_224,
    DigestAlgorithm::Sha3_256,
    DigestAlgorithm::Sha3_384,
    DigestAlgorithm::Sha3_512,
    DigestAlgorithm::Shake128,
    DigestAlgorithm::Shake256,
];

impl DigestAlgorithm {
    /// Looks up a digest by name, ignoring case.
    ///
    /// Accepts the dashed (`sha-256`) and `RSA-` prefixed spellings as well.
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        let lower = name.to_ascii_lowercase();
        let lower = lower.strip_prefix("rsa-").unwrap_or(&lower);
        let alg = match lower {
            "md5" => Self::Md5,
            "sha1" | "sha-1" => Self::Sha1,
            "sha224" | "sha-224" => Self::Sha224,
            "sha256" | "sha-256" => Self::Sha256,
            "sha384" | "sha-384" => Self::Sha384,
            "sha512" | "sha-512" => Self::Sha512,
            "sha512-224" | "sha-512/224" => Self::Sha512_224,
            "sha512-256" | "sha-512/256" => Self::Sha512_256,
            "sha3-224" => Self::Sha3_224,
            "sha3-256" => Self::Sha3_256,
            "sha3-384" => Self::Sha3_384,
            "sha3-512" => Self::Sha3_512,
            "shake128" => Self::Shake128,
            "shake256" => Self::Shake256,
            _ => return Err(CryptoError::InvalidDigest(name.to_string())),
        };
        Ok(alg)
    }

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Sha512_224 => "sha512-224",
            Self::Sha512_256 => "sha512-256",
            Self::Sha3_224 => "sha3-224",
            Self::Sha3_256 => "sha3-256",
            Self::Sha3_384 => "sha3-384",
            Self::Sha3_512 => "sha3-512",
            Self::Shake128 => "shake128",
            Self::Shake256 => "shake256",
        }
    }

    /// Default output size in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha224 | Self::Sha512_224 | Self::Sha3_224 => 28,
            Self::Sha256 | Self::Sha512_256 | Self::Sha3_256 | Self::Shake256 => 32,
            Self::Sha384 | Self::Sha3_384 => 48,
            Self::Sha512 | Self::Sha3_512 => 64,
            Self::Shake128 => 16,
        }
    }

    /// Returns true for extendable-output functions.
    pub fn is_xof(&self) -> bool {
        matches!(self, Self::Shake128 | Self::Shake256)
    }
}

/// Runs `$body` with `$d` bound to the concrete digest type of `$alg`.
///
/// Extendable-output algorithms evaluate `$xof` instead.
macro_rules! with_digest {
    ($alg:expr, $d:ident => $body:expr, xof => $xof:expr) => {
        match $alg {
            $crate::hash::DigestAlgorithm::Md5 => {
                type $d = ::md5::Md5;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha1 => {
                type $d = ::sha1::Sha1;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha224 => {
                type $d = ::sha2::Sha224;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha256 => {
                type $d = ::sha2::Sha256;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha384 => {
                type $d = ::sha2::Sha384;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha512 => {
                type $d = ::sha2::Sha512;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha512_224 => {
                type $d = ::sha2::Sha512_224;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha512_256 => {
                type $d = ::sha2::Sha512_256;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha3_224 => {
                type $d = ::sha3::Sha3_224;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha3_256 => {
                type $d = ::sha3::Sha3_256;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha3_384 => {
                type $d = ::sha3::Sha3_384;
                $body
            }
            $crate::hash::DigestAlgorithm::Sha3_512 => {
                type $d = ::sha3::Sha3_512;
                $body
            }
            $crate::hash::DigestAlgorithm::Shake128 | $crate::hash::DigestAlgorithm::Shake256 => {
                $xof
            }
        }
    };
}

pub(crate) use with_digest;

/// Names of all supported digests.
pub fn get_hashes() -> Vec<&'static str> {
    ALL.iter().map(|alg| alg.name()).collect()
}

#[derive(Clone)]
enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
    Sha512_224(sha2::Sha512_224),
    Sha512_256(sha2::Sha512_256),
    Sha3_224(sha3::Sha3_224),
    Sha3_256(sha3::Sha3_256),
    Sha3_384(sha3::Sha3_384),
    Sha3_512(sha3::Sha3_512),
    Shake128(sha3::Shake128),
    Shake256(sha3::Shake256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(Default::default()),
            DigestAlgorithm::Sha1 => Self::Sha1(Default::default()),
            DigestAlgorithm::Sha224 => Self::Sha224(Default::default()),
            DigestAlgorithm::Sha256 => Self::Sha256(Default::default()),
            DigestAlgorithm::Sha384 => Self::Sha384(Default::default()),
            DigestAlgorithm::Sha512 => Self::Sha512(Default::default()),
            DigestAlgorithm::Sha512_224 => Self::Sha512_224(Default::default()),
            DigestAlgorithm::Sha512_256 => Self::Sha512_256(Default::default()),
            DigestAlgorithm::Sha3_224 => Self::Sha3_224(Default::default()),
            DigestAlgorithm::Sha3_256 => Self::Sha3_256(Default::default()),
            DigestAlgorithm::Sha3_384 => Self::Sha3_384(Default::default()),
            DigestAlgorithm::Sha3_512 => Self::Sha3_512(Default::default()),
            DigestAlgorithm::Shake128 => Self::Shake128(Default::default()),
            DigestAlgorithm::Shake256 => Self::Shake256(Default::default()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(hasher) => Update::update(hasher, data),
            Self::Sha1(hasher) => Update::update(hasher, data),
            Self::Sha224(hasher) => Update::update(hasher, data),
            Self::Sha256(hasher) => Update::update(hasher, data),
            Self::Sha384(hasher) => Update::update(hasher, data),
            Self::Sha512(hasher) => Update::update(hasher, data),
            Self::Sha512_224(hasher) => Update::update(hasher, data),
            Self::Sha512_256(hasher) => Update::update(hasher, data),
            Self::Sha3_224(hasher) => Update::update(hasher, data),
            Self::Sha3_256(hasher) => Update::update(hasher, data),
            Self::Sha3_384(hasher) => Update::update(hasher, data),
            Self::Sha3_512(hasher) => Update::update(hasher, data),
            Self::Shake128(hasher) => Update::update(hasher, data),
            Self::Shake256(hasher) => Update::update(hasher, data),
        }
    }

    fn finalize(self, output_len: usize) -> Vec<u8> {
        match self {
            Self::Md5(hasher) => hasher.finalize().to_vec(),
            Self::Sha1(hasher) => hasher.finalize().to_vec(),
            Self::Sha224(hasher) => hasher.finalize().to_vec(),
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            Self::Sha384(hasher) => hasher.finalize().to_vec(),
            Self::Sha512(hasher) => hasher.finalize().to_vec(),
            Self::Sha512_224(hasher) => hasher.finalize().to_vec(),
            Self::Sha512_256(hasher) => hasher.finalize().to_vec(),
            Self::Sha3_224(hasher) => hasher.finalize().to_vec(),
            Self::Sha3_256(hasher) => hasher.finalize().to_vec(),
            Self::Sha3_384(hasher) => hasher.finalize().to_vec(),
            Self::Sha3_512(hasher) => hasher.finalize().to_vec(),
            Self::Shake128(hasher) => {
                let mut out = vec![0; output_len];
                hasher.finalize_xof_into(&mut out);
                out
            }
            Self::Shake256(hasher) => {
                let mut out = vec![0; output_len];
                hasher.finalize_xof_into(&mut out);
                out
            }
        }
    }
}

/// A streaming digest.
///
/// The digest is computed once; later calls to [`Hash::digest`] return the
/// cached value and further updates fail.
#[derive(Clone)]
pub struct Hash {
    algorithm: DigestAlgorithm,
    output_len: usize,
    hasher: Option<Hasher>,
    digest: Option<Vec<u8>>,
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hash")
            .field("algorithm", &self.algorithm)
            .field("output_len", &self.output_len)
            .field("finalized", &self.digest.is_some())
            .finish()
    }
}

impl Hash {
    /// Creates a digest by name with an optional output length.
    ///
    /// A custom length other than the default is only accepted for
    /// extendable-output functions.
    pub fn new(name: &str, output_len: Option<usize>) -> Result<Self, CryptoError> {
        Self::with_algorithm(DigestAlgorithm::from_name(name)?, output_len)
    }

    /// Creates a digest for a known algorithm.
    pub fn with_algorithm(
        algorithm: DigestAlgorithm,
        output_len: Option<usize>,
    ) -> Result<Self, CryptoError> {
        let output_len = match output_len {
            Some(len) if len != algorithm.output_size() && !algorithm.is_xof() => {
                return Err(decorate(
                    Lib::Evp,
                    Some("EVP_DigestFinalXOF"),
                    "not XOF or invalid length",
                )
                .into())
            }
            Some(len) => len,
            None => algorithm.output_size(),
        };

        Ok(Self {
            algorithm,
            output_len,
            hasher: Some(Hasher::new(algorithm)),
            digest: None,
        })
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Feeds more data.
    pub fn update(&mut self, data: &[u8]) -> Result<(), CryptoError> {
        match self.hasher.as_mut() {
            Some(hasher) => {
                hasher.update(data);
                Ok(())
            }
            None => Err(CryptoError::InvalidState("Digest already called")),
        }
    }

    /// Returns the digest, computing it on the first call.
    pub fn digest(&mut self) -> Vec<u8> {
        if let Some(hasher) = self.hasher.take() {
            self.digest = Some(hasher.finalize(self.output_len));
        }
        self.digest.clone().unwrap_or_default()
    }
}

/// One-shot digest of `data`.
pub fn digest(algorithm: DigestAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize(algorithm.output_size())
}
