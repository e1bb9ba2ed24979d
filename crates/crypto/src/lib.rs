//! Cryptographic building blocks used by the TLS session wrap.
//!
//! This crate holds everything that is not the protocol state machine itself:
//! zero-on-drop byte sources, reference-counted asymmetric key handles and
//! key objects, streaming cipher, hash, HMAC and signature engines, classic and
//! elliptic-curve Diffie-Hellman, key derivation and a worker-pool job runner
//! for CPU heavy operations.
//!
//! Every failure carries a stable code (see [`CryptoError::code`]) so callers
//! can match on errors without parsing messages.

#![deny(missing_docs, unreachable_pub, unused_must_use)]
#![deny(clippy::all)]
#![forbid(unsafe_code)]

// tracing for logging (optional).
#[cfg(feature = "logging")]
use tracing as log;

#[cfg(not(feature = "logging"))]
#[allow(unused_macros)]
#[macro_use]
mod log {
    macro_rules! trace    ( ($($tt:tt)*) => {{}} );
    macro_rules! debug    ( ($($tt:tt)*) => {{}} );
    macro_rules! warn     ( ($($tt:tt)*) => {{}} );
}

mod byte_source;
pub mod cipher;
mod curve;
pub mod dh;
pub mod ecdh;
mod error;
pub mod hash;
pub mod hmac;
pub mod job;
pub mod kdf;
pub mod key;
pub mod public_cipher;
pub mod rand;
pub mod sign;

pub use crate::byte_source::ByteSource;
pub use crate::cipher::{get_cipher_info, get_ciphers, Cipher, CipherInfo, Direction};
pub use crate::curve::{get_curves, Curve, PointFormat};
pub use crate::dh::{DhKeyCheck, DiffieHellman};
pub use crate::ecdh::Ecdh;
pub use crate::error::{decorate, error_code, CryptoError, DecoratedError, Lib};
pub use crate::hash::{get_hashes, DigestAlgorithm, Hash};
pub use crate::hmac::Hmac;
pub use crate::job::{
    CryptoJob, JobHandle, JobRunner, KeyPairJob, Pbkdf2Job, RandomBytesJob, ScryptJob,
};
pub use crate::kdf::{pbkdf2, scrypt, timing_safe_equal, ScryptOptions};
pub use crate::key::{
    generate_key_pair, generate_secret_key, AsymmetricKeyDetails, ExportOptions, KeyEncoding,
    KeyFormat, KeyInput, KeyObject, KeyPairOptions, KeyType, ManagedKey,
};
pub use crate::public_cipher::{
    private_decrypt, private_encrypt, public_decrypt, public_encrypt, PublicCipherOptions,
    RsaPadding,
};
pub use crate::sign::{sign, verify, DsaEncoding, PssSaltLength, Sign, SignOptions, Verify};
