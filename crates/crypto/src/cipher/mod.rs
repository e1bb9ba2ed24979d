//! Symmetric cipher engines.
//!
//! [`Cipher`] drives one encryption or decryption through `update`/`finalize`
//! calls. Block modes buffer partial blocks and apply PKCS#7 padding; the
//! AEAD modes (GCM, CCM, OCB and ChaCha20-Poly1305) additionally track the
//! authentication tag, which must be set before finalizing a decryption and
//! can only be read after finalizing an encryption.

mod block;
mod ccm;
mod chacha;
mod gcm;
mod ocb;

use ::cipher::{consts::U16, generic_array::GenericArray, BlockEncrypt, BlockSizeUser};
use ghash::universal_hash::UniversalHash;
use subtle::ConstantTimeEq;

#[cfg(feature = "logging")]
use crate::log::{debug, warn};
use crate::{kdf::bytes_to_key, CryptoError};

/// Whether a [`Cipher`] encrypts or decrypts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Cipher.
    Encrypt,
    /// Decipher.
    Decrypt,
}

/// Mode of operation of a cipher.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ecb,
    Cbc,
    Ctr,
    Gcm,
    Ccm,
    Ocb,
    ChaCha20Poly1305,
}

impl Mode {
    /// Returns true for authenticated modes.
    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            Mode::Gcm | Mode::Ccm | Mode::Ocb | Mode::ChaCha20Poly1305
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Mode::Ecb => "ecb",
            Mode::Cbc => "cbc",
            Mode::Ctr => "ctr",
            Mode::Gcm => "gcm",
            Mode::Ccm => "ccm",
            Mode::Ocb => "ocb",
            Mode::ChaCha20Poly1305 => "stream",
        }
    }
}

/// Static description of a supported cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherInfo {
    /// Canonical name, e.g. `aes-128-gcm`.
    pub name: &'static str,
    /// Numeric identifier.
    pub nid: u32,
    /// Mode name, e.g. `cbc` or `stream`.
    pub mode: &'static str,
    /// Key length in bytes.
    pub key_length: usize,
    /// Default IV length in bytes, `None` for modes without an IV.
    pub iv_length: Option<usize>,
    /// Block size in bytes.
    pub block_size: usize,
}

struct Algorithm {
    name: &'static str,
    nid: u32,
    mode: Mode,
    key_len: usize,
    iv_len: usize,
    block_size: usize,
}

macro_rules! aes_algorithms {
    ($($name:literal, $nid:literal, $mode:ident, $key:literal, $iv:literal, $block:literal;)*) => {
        &[$(Algorithm {
            name: $name,
            nid: $nid,
            mode: Mode::$mode,
            key_len: $key,
            iv_len: $iv,
            block_size: $block,
        },)*]
    };
}

static ALGORITHMS: &[Algorithm] = aes_algorithms! {
    "aes-128-cbc", 419, Cbc, 16, 16, 16;
    "aes-128-ccm", 896, Ccm, 16, 12, 1;
    "aes-128-ctr", 904, Ctr, 16, 16, 1;
    "aes-128-ecb", 418, Ecb, 16, 0, 16;
    "aes-128-gcm", 895, Gcm, 16, 12, 1;
    "aes-128-ocb", 958, Ocb, 16, 12, 16;
    "aes-192-cbc", 423, Cbc, 24, 16, 16;
    "aes-192-ccm", 899, Ccm, 24, 12, 1;
    "aes-192-ctr", 905, Ctr, 24, 16, 1;
    "aes-192-ecb", 422, Ecb, 24, 0, 16;
    "aes-192-gcm", 898, Gcm, 24, 12, 1;
    "aes-192-ocb", 959, Ocb, 24, 12, 16;
    "aes-256-cbc", 427, Cbc, 32, 16, 16;
    "aes-256-ccm", 902, Ccm, 32, 12, 1;
    "aes-256-ctr", 906, Ctr, 32, 16, 1;
    "aes-256-ecb", 426, Ecb, 32, 0, 16;
    "aes-256-gcm", 901, Gcm, 32, 12, 1;
    "aes-256-ocb", 960, Ocb, 32, 12, 16;
    "chacha20-poly1305", 1018, ChaCha20Poly1305, 32, 12, 1;
};

fn lookup(name: &str) -> Option<&'static Algorithm> {
    let lower = name.to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "aes128" => "aes-128-cbc",
        "aes192" => "aes-192-cbc",
        "aes256" => "aes-256-cbc",
        "id-aes128-gcm" => "aes-128-gcm",
        "id-aes192-gcm" => "aes-192-gcm",
        "id-aes256-gcm" => "aes-256-gcm",
        other => other,
    };
    ALGORITHMS.iter().find(|alg| alg.name == canonical)
}

/// Names of all supported ciphers.
pub fn get_ciphers() -> Vec<&'static str> {
    ALGORITHMS.iter().map(|alg| alg.name).collect()
}

/// Describes a cipher by name, or `None` if it is not supported.
pub fn get_cipher_info(name: &str) -> Option<CipherInfo> {
    lookup(name).map(|alg| CipherInfo {
        name: alg.name,
        nid: alg.nid,
        mode: alg.mode.name(),
        key_length: alg.key_len,
        iv_length: (alg.iv_len != 0).then_some(alg.iv_len),
        block_size: alg.block_size,
    })
}

/// Runs `$body` with `$c` bound to the AES variant for a key of `$len` bytes.
macro_rules! with_aes {
    ($len:expr, $c:ident => $body:expr) => {
        match $len {
            16 => {
                type $c = ::aes::Aes128;
                $body
            }
            24 => {
                type $c = ::aes::Aes192;
                $body
            }
            32 => {
                type $c = ::aes::Aes256;
                $body
            }
            _ => return Err(CryptoError::InvalidKeyLength),
        }
    };
}

/// Encrypts a single block in place.
fn encrypt_block<C>(cipher: &C, block: &mut [u8; 16])
where
    C: BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

fn xor_in_place(dst: &mut [u8], src: &[u8]) {
    dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s);
}

/// Buffers input for a universal hash so arbitrary chunks can be absorbed.
struct Absorb<U> {
    mac: U,
    partial: Vec<u8>,
}

impl<U: UniversalHash<BlockSize = U16>> Absorb<U> {
    fn new(mac: U) -> Self {
        Self {
            mac,
            partial: Vec::with_capacity(16),
        }
    }

    fn absorb(&mut self, mut data: &[u8]) {
        if !self.partial.is_empty() {
            let take = (16 - self.partial.len()).min(data.len());
            self.partial.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.partial.len() < 16 {
                return;
            }
            self.mac.update_padded(&self.partial);
            self.partial.clear();
        }

        let full = data.len() / 16 * 16;
        if full > 0 {
            self.mac.update_padded(&data[..full]);
        }
        self.partial.extend_from_slice(&data[full..]);
    }

    /// Zero-pads the pending partial block.
    fn pad(&mut self) {
        if !self.partial.is_empty() {
            self.mac.update_padded(&self.partial);
            self.partial.clear();
        }
    }

    fn finalize(mut self) -> [u8; 16] {
        self.pad();
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&self.mac.finalize());
        tag
    }
}

/// An unauthenticated mode.
trait PlainMode: Send {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>);

    fn finish(&mut self, padding: bool, out: &mut Vec<u8>) -> Result<(), CryptoError>;
}

/// An authenticated mode that accepts data incrementally.
trait AeadMode: Send {
    fn aad(&mut self, aad: &[u8]);

    fn update(&mut self, input: &[u8], out: &mut Vec<u8>);

    /// Finishes the message and returns the full-length tag.
    fn finish(self: Box<Self>, out: &mut Vec<u8>) -> [u8; 16];
}

/// CCM processes the whole message in one step and needs the tag up front.
trait OneShotAead: Send {
    fn aad(&mut self, aad: &[u8]);

    fn seal(&mut self, input: &[u8]) -> (Vec<u8>, [u8; 16]);

    fn open(&mut self, input: &[u8], tag: &[u8]) -> Option<Vec<u8>>;
}

enum Engine {
    Plain(Box<dyn PlainMode>),
    Aead(Box<dyn AeadMode>),
    OneShot(Box<dyn OneShotAead>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthTagState {
    Unknown,
    Known,
    PassedToEngine,
}

/// A symmetric encryption or decryption in progress.
pub struct Cipher {
    alg: &'static Algorithm,
    direction: Direction,
    engine: Option<Engine>,
    auto_padding: bool,
    auth_tag: [u8; 16],
    auth_tag_len: Option<usize>,
    auth_tag_state: AuthTagState,
    max_message_size: u64,
    pending_auth_failed: bool,
    started: bool,
    ccm_plaintext_len: Option<usize>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("name", &self.alg.name)
            .field("direction", &self.direction)
            .field("finalized", &self.engine.is_none())
            .finish_non_exhaustive()
    }
}

fn is_valid_gcm_tag_len(len: usize) -> bool {
    len == 4 || len == 8 || (12..=16).contains(&len)
}

impl Cipher {
    /// Creates a cipher from an explicit key and IV.
    ///
    /// `iv` may be `None` only for modes without an IV. For the AEAD modes
    /// `auth_tag_len` selects the tag length; it is mandatory for CCM, OCB
    /// and ChaCha20-Poly1305.
    pub fn new(
        name: &str,
        direction: Direction,
        key: &[u8],
        iv: Option<&[u8]>,
        auth_tag_len: Option<usize>,
    ) -> Result<Self, CryptoError> {
        let alg = lookup(name).ok_or_else(|| CryptoError::UnknownCipher(name.to_string()))?;

        let iv = match iv {
            Some(iv) => iv,
            None if alg.iv_len == 0 => &[],
            None => {
                return Err(CryptoError::InvalidArgValue(format!(
                    "Missing IV for cipher {}",
                    alg.name
                )))
            }
        };

        let iv_ok = match alg.mode {
            Mode::Gcm => !iv.is_empty(),
            Mode::Ccm => (7..=13).contains(&iv.len()),
            Mode::Ocb => (1..=15).contains(&iv.len()),
            Mode::ChaCha20Poly1305 => (1..=12).contains(&iv.len()),
            _ => iv.len() == alg.iv_len,
        };
        if !iv_ok {
            return Err(CryptoError::InvalidIv);
        }

        if key.len() != alg.key_len {
            return Err(CryptoError::InvalidKeyLength);
        }

        let mut max_message_size = i32::MAX as u64;
        let auth_tag_len = match alg.mode {
            Mode::Gcm => match auth_tag_len {
                Some(len) if !is_valid_gcm_tag_len(len) => {
                    return Err(CryptoError::InvalidAuthTagLength(len))
                }
                other => other,
            },
            Mode::Ccm | Mode::Ocb | Mode::ChaCha20Poly1305 => {
                let len = auth_tag_len.ok_or_else(|| {
                    CryptoError::InvalidAuthTag(format!("authTagLength required for {name}"))
                })?;
                let valid = match alg.mode {
                    Mode::Ccm => (4..=16).contains(&len) && len % 2 == 0,
                    _ => (1..=16).contains(&len),
                };
                if !valid {
                    return Err(CryptoError::InvalidAuthTagLength(len));
                }
                if alg.mode == Mode::Ccm {
                    let l = 15 - iv.len();
                    if l < 4 {
                        max_message_size = max_message_size.min((1u64 << (8 * l)) - 1);
                    }
                }
                Some(len)
            }
            _ => None,
        };

        let encrypting = direction == Direction::Encrypt;
        let engine = match alg.mode {
            Mode::Ecb => with_aes!(key.len(), C => block::ecb::<C>(key, encrypting)?),
            Mode::Cbc => with_aes!(key.len(), C => block::cbc::<C>(key, iv, encrypting)?),
            Mode::Ctr => with_aes!(key.len(), C => block::ctr::<C>(key, iv)?),
            Mode::Gcm => with_aes!(key.len(), C => {
                Engine::Aead(Box::new(gcm::Gcm::<C>::new(key, iv, encrypting)?))
            }),
            Mode::Ocb => with_aes!(key.len(), C => {
                Engine::Aead(Box::new(ocb::Ocb::<C>::new(key, iv, auth_tag_len.unwrap_or(16), encrypting)?))
            }),
            Mode::Ccm => with_aes!(key.len(), C => {
                Engine::OneShot(Box::new(ccm::Ccm::<C>::new(key, iv, auth_tag_len.unwrap_or(16))?))
            }),
            Mode::ChaCha20Poly1305 => {
                Engine::Aead(Box::new(chacha::ChaChaPoly::new(key, iv, encrypting)?))
            }
        };

        debug!("initialized {} for {:?}", alg.name, direction);

        Ok(Self {
            alg,
            direction,
            engine: Some(engine),
            auto_padding: true,
            auth_tag: [0; 16],
            auth_tag_len,
            auth_tag_state: AuthTagState::Unknown,
            max_message_size,
            pending_auth_failed: false,
            started: false,
            ccm_plaintext_len: None,
        })
    }

    /// Creates a cipher from a passphrase.
    ///
    /// Key and IV are derived with the legacy MD5 based derivation. The
    /// resulting IV is fixed per passphrase, which is unsafe for counter
    /// and authenticated modes.
    pub fn with_passphrase(
        name: &str,
        direction: Direction,
        passphrase: &[u8],
        auth_tag_len: Option<usize>,
    ) -> Result<Self, CryptoError> {
        let alg = lookup(name).ok_or_else(|| CryptoError::UnknownCipher(name.to_string()))?;

        if direction == Direction::Encrypt
            && matches!(alg.mode, Mode::Ctr | Mode::Gcm | Mode::Ccm)
        {
            warn!("Use Cipheriv for counter mode of {}", alg.name);
        }

        let (key, iv) = bytes_to_key(passphrase, alg.key_len, alg.iv_len);
        let iv = (alg.iv_len != 0).then_some(iv.as_slice());

        Self::new(alg.name, direction, &key, iv, auth_tag_len)
    }

    /// The canonical cipher name.
    pub fn name(&self) -> &'static str {
        self.alg.name
    }

    /// The mode of operation.
    pub fn mode(&self) -> Mode {
        self.alg.mode
    }

    /// Enables or disables PKCS#7 padding for block modes.
    pub fn set_auto_padding(&mut self, auto_padding: bool) -> Result<(), CryptoError> {
        if self.engine.is_none() {
            return Err(CryptoError::InvalidState(
                "Invalid state for operation setAutoPadding",
            ));
        }
        self.auto_padding = auto_padding;
        Ok(())
    }

    /// Supplies the expected tag of a decryption.
    pub fn set_auth_tag(&mut self, tag: &[u8]) -> Result<(), CryptoError> {
        if self.engine.is_none()
            || !self.alg.mode.is_aead()
            || self.direction != Direction::Decrypt
            || self.auth_tag_state != AuthTagState::Unknown
        {
            return Err(CryptoError::InvalidState(
                "Invalid state for operation setAuthTag",
            ));
        }

        let is_valid = match self.alg.mode {
            Mode::Gcm => {
                self.auth_tag_len.map_or(true, |len| len == tag.len())
                    && is_valid_gcm_tag_len(tag.len())
            }
            _ => self.auth_tag_len == Some(tag.len()),
        };
        if !is_valid {
            return Err(CryptoError::InvalidAuthTagLength(tag.len()));
        }

        self.auth_tag_len = Some(tag.len());
        self.auth_tag = [0; 16];
        self.auth_tag[..tag.len()].copy_from_slice(tag);
        self.auth_tag_state = AuthTagState::Known;
        Ok(())
    }

    /// Returns the tag of a finished encryption.
    pub fn auth_tag(&self) -> Result<Vec<u8>, CryptoError> {
        match (self.engine.is_none(), self.direction, self.auth_tag_len) {
            (true, Direction::Encrypt, Some(len)) => Ok(self.auth_tag[..len].to_vec()),
            _ => Err(CryptoError::InvalidState(
                "Invalid state for operation getAuthTag",
            )),
        }
    }

    /// Feeds additional authenticated data.
    ///
    /// In CCM mode the total plaintext length must be announced first.
    pub fn set_aad(&mut self, aad: &[u8], plaintext_len: Option<usize>) -> Result<(), CryptoError> {
        if !self.alg.mode.is_aead() || self.started {
            return Err(CryptoError::InvalidState("Invalid state for operation setAAD"));
        }

        if self.alg.mode == Mode::Ccm {
            let plaintext_len = plaintext_len.ok_or_else(|| {
                CryptoError::InvalidArgValue(
                    "plaintextLength required for CCM mode with AAD".to_string(),
                )
            })?;
            self.check_ccm_message_len(plaintext_len)?;
            if self.direction == Direction::Decrypt {
                self.maybe_pass_auth_tag();
            }
            self.ccm_plaintext_len = Some(plaintext_len);
        }

        match self.engine.as_mut() {
            Some(Engine::Aead(engine)) => engine.aad(aad),
            Some(Engine::OneShot(engine)) => engine.aad(aad),
            _ => return Err(CryptoError::InvalidState("Invalid state for operation setAAD")),
        }
        Ok(())
    }

    fn check_ccm_message_len(&self, len: usize) -> Result<(), CryptoError> {
        if len as u64 > self.max_message_size {
            return Err(CryptoError::InvalidMessageLength);
        }
        Ok(())
    }

    fn maybe_pass_auth_tag(&mut self) -> Option<&[u8]> {
        if self.auth_tag_state == AuthTagState::Known {
            self.auth_tag_state = AuthTagState::PassedToEngine;
        }
        match (self.auth_tag_state, self.auth_tag_len) {
            (AuthTagState::PassedToEngine, Some(len)) => Some(&self.auth_tag[..len]),
            _ => None,
        }
    }

    /// Processes more data and returns whatever output is ready.
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if self.engine.is_none() {
            return Err(CryptoError::InvalidState(
                "Trying to add data in unsupported state",
            ));
        }

        if self.alg.mode == Mode::Ccm {
            self.check_ccm_message_len(data.len())?;
            if self.started || self.ccm_plaintext_len.map_or(false, |len| len != data.len()) {
                return Err(CryptoError::InvalidState(
                    "Trying to add data in unsupported state",
                ));
            }
        }

        let expected_tag = if self.direction == Direction::Decrypt && self.alg.mode.is_aead() {
            self.maybe_pass_auth_tag().map(<[u8]>::to_vec)
        } else {
            None
        };
        self.started = true;

        let mut out = Vec::with_capacity(data.len() + self.alg.block_size);
        match self.engine.as_mut() {
            Some(Engine::Plain(engine)) => engine.update(data, &mut out),
            Some(Engine::Aead(engine)) => engine.update(data, &mut out),
            Some(Engine::OneShot(engine)) => match self.direction {
                Direction::Encrypt => {
                    let (ciphertext, tag) = engine.seal(data);
                    self.auth_tag = tag;
                    out = ciphertext;
                }
                Direction::Decrypt => {
                    match expected_tag.and_then(|tag| engine.open(data, &tag)) {
                        Some(plaintext) => out = plaintext,
                        None => self.pending_auth_failed = true,
                    }
                }
            },
            None => {}
        }

        Ok(out)
    }

    /// Finishes the operation and returns the remaining output.
    ///
    /// For authenticated decryption this is where a tag mismatch surfaces.
    pub fn finalize(&mut self) -> Result<Vec<u8>, CryptoError> {
        let engine = self
            .engine
            .take()
            .ok_or(CryptoError::InvalidState("Unsupported state"))?;

        let decrypting = self.direction == Direction::Decrypt;
        if decrypting && self.alg.mode.is_aead() {
            self.maybe_pass_auth_tag();
        }

        let mut out = Vec::new();
        match engine {
            Engine::Plain(mut mode) => mode.finish(self.auto_padding, &mut out)?,
            Engine::Aead(mode) => {
                let tag = mode.finish(&mut out);
                if decrypting {
                    let len = match (self.auth_tag_state, self.auth_tag_len) {
                        (AuthTagState::PassedToEngine, Some(len)) => len,
                        _ => return Err(CryptoError::AuthFailed),
                    };
                    if !bool::from(tag[..len].ct_eq(&self.auth_tag[..len])) {
                        return Err(CryptoError::AuthFailed);
                    }
                } else {
                    self.auth_tag = tag;
                    if self.auth_tag_len.is_none() {
                        self.auth_tag_len = Some(16);
                    }
                }
            }
            Engine::OneShot(mut mode) => {
                if decrypting {
                    if !self.started {
                        // Nothing was processed, so the tag still has to be checked.
                        let tag = self.maybe_pass_auth_tag().map(<[u8]>::to_vec);
                        self.pending_auth_failed =
                            tag.and_then(|tag| mode.open(&[], &tag)).is_none();
                    }
                    if self.pending_auth_failed {
                        return Err(CryptoError::AuthFailed);
                    }
                } else if !self.started {
                    let (_, tag) = mode.seal(&[]);
                    self.auth_tag = tag;
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn run(cipher: &mut Cipher, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = cipher.update(data)?;
        out.extend(cipher.finalize()?);
        Ok(out)
    }

    #[test]
    fn test_ecb_hello_world() {
        let key = [0x42u8; 32];
        let mut enc = Cipher::new("aes-256-ecb", Direction::Encrypt, &key, None, None).unwrap();
        let ciphertext = run(&mut enc, b"Hello world").unwrap();
        assert_eq!(ciphertext.len(), 16);

        let mut dec = Cipher::new("aes-256-ecb", Direction::Decrypt, &key, None, None).unwrap();
        assert_eq!(run(&mut dec, &ciphertext).unwrap(), b"Hello world");
    }

    #[test]
    fn test_cbc_nist_vector() {
        // SP 800-38A F.2.1
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let mut enc =
            Cipher::new("aes-128-cbc", Direction::Encrypt, &key, Some(&iv), None).unwrap();
        enc.set_auto_padding(false).unwrap();
        assert_eq!(
            hex::encode(run(&mut enc, &plaintext).unwrap()),
            "7649abac8119b246cee98e9b12e9197d"
        );
    }

    #[test]
    fn test_ctr_nist_vector() {
        // SP 800-38A F.5.1
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();

        let mut enc =
            Cipher::new("aes-128-ctr", Direction::Encrypt, &key, Some(&iv), None).unwrap();
        let mut out = enc.update(&plaintext[..5]).unwrap();
        out.extend(enc.update(&plaintext[5..]).unwrap());
        out.extend(enc.finalize().unwrap());
        assert_eq!(hex::encode(out), "874d6191b620e3261bef6864990db6ce");
    }

    #[test]
    fn test_bad_padding_is_engine_error() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let mut dec =
            Cipher::new("aes-128-cbc", Direction::Decrypt, &key, Some(&iv), None).unwrap();
        let err = run(&mut dec, &[0u8; 16]).unwrap_err();
        assert_eq!(err.code(), "ERR_OSSL_EVP_BAD_DECRYPT");
    }

    #[test]
    fn test_unpadded_partial_block_fails() {
        let key = [7u8; 16];
        let mut enc = Cipher::new("aes-128-ecb", Direction::Encrypt, &key, None, None).unwrap();
        enc.set_auto_padding(false).unwrap();
        assert!(run(&mut enc, b"short").is_err());
    }

    #[rstest]
    #[case(4, true)]
    #[case(8, true)]
    #[case(12, true)]
    #[case(13, true)]
    #[case(14, true)]
    #[case(15, true)]
    #[case(16, true)]
    #[case(0, false)]
    #[case(1, false)]
    #[case(5, false)]
    #[case(10, false)]
    #[case(11, false)]
    #[case(17, false)]
    fn test_gcm_tag_lengths(#[case] len: usize, #[case] valid: bool) {
        let result = Cipher::new(
            "aes-128-gcm",
            Direction::Encrypt,
            &[0; 16],
            Some(&[0; 12]),
            Some(len),
        );
        assert_eq!(result.is_ok(), valid);
        if !valid {
            assert_eq!(result.unwrap_err().code(), "ERR_CRYPTO_INVALID_AUTH_TAG");
        }
    }

    #[rstest]
    #[case("aes-128-ccm")]
    #[case("aes-256-ocb")]
    #[case("chacha20-poly1305")]
    fn test_tag_length_required(#[case] name: &str) {
        let info = get_cipher_info(name).unwrap();
        let err = Cipher::new(
            name,
            Direction::Encrypt,
            &vec![0; info.key_length],
            Some(&[1; 12]),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("authTagLength required for {name}")
        );
    }

    #[test]
    fn test_chacha_iv_limit() {
        let err = Cipher::new(
            "chacha20-poly1305",
            Direction::Encrypt,
            &[0; 32],
            Some(&[0; 13]),
            Some(16),
        )
        .unwrap_err();
        assert_eq!(err.code(), "ERR_CRYPTO_INVALID_IV");
    }

    #[test]
    fn test_update_after_final() {
        let mut enc =
            Cipher::new("aes-128-gcm", Direction::Encrypt, &[1; 16], Some(&[2; 12]), None)
                .unwrap();
        enc.update(b"data").unwrap();
        enc.finalize().unwrap();
        assert_eq!(enc.auth_tag().unwrap().len(), 16);
        assert!(matches!(
            enc.update(b"more"),
            Err(CryptoError::InvalidState(_))
        ));
        assert!(matches!(enc.finalize(), Err(CryptoError::InvalidState(_))));
    }

    #[test]
    fn test_auth_tag_before_final() {
        let enc = Cipher::new("aes-128-gcm", Direction::Encrypt, &[1; 16], Some(&[2; 12]), None)
            .unwrap();
        assert!(enc.auth_tag().is_err());
    }

    #[test]
    fn test_gcm_decrypt_without_tag() {
        let mut dec =
            Cipher::new("aes-128-gcm", Direction::Decrypt, &[1; 16], Some(&[2; 12]), None)
                .unwrap();
        dec.update(b"ciphertext").unwrap();
        assert!(matches!(dec.finalize(), Err(CryptoError::AuthFailed)));
    }

    #[test]
    fn test_set_auth_tag_once() {
        let mut dec =
            Cipher::new("aes-128-gcm", Direction::Decrypt, &[1; 16], Some(&[2; 12]), None)
                .unwrap();
        dec.set_auth_tag(&[0; 16]).unwrap();
        assert!(matches!(
            dec.set_auth_tag(&[0; 16]),
            Err(CryptoError::InvalidState(_))
        ));
    }

    #[test]
    fn test_ccm_message_limit() {
        let mut enc = Cipher::new(
            "aes-128-ccm",
            Direction::Encrypt,
            &[0; 16],
            Some(&[0; 13]),
            Some(16),
        )
        .unwrap();
        let err = enc.set_aad(b"", Some(65536)).unwrap_err();
        assert_eq!(err.code(), "ERR_CRYPTO_INVALID_MESSAGELEN");
        assert!(enc.update(&vec![0; 65536]).is_err());
    }

    #[test]
    fn test_ccm_aad_requires_length() {
        let mut enc = Cipher::new(
            "aes-128-ccm",
            Direction::Encrypt,
            &[0; 16],
            Some(&[0; 12]),
            Some(8),
        )
        .unwrap();
        assert!(enc.set_aad(b"header", None).is_err());
    }

    #[test]
    fn test_passphrase_matches_derived_key() {
        let (key, iv) = bytes_to_key(b"secret", 16, 16);
        let mut a = Cipher::with_passphrase("aes-128-cbc", Direction::Encrypt, b"secret", None)
            .unwrap();
        let mut b =
            Cipher::new("aes-128-cbc", Direction::Encrypt, &key, Some(&iv), None).unwrap();
        assert_eq!(run(&mut a, b"payload").unwrap(), run(&mut b, b"payload").unwrap());
    }

    #[test]
    fn test_cipher_info() {
        let info = get_cipher_info("AES-256-GCM").unwrap();
        assert_eq!(info.name, "aes-256-gcm");
        assert_eq!(info.key_length, 32);
        assert_eq!(info.iv_length, Some(12));
        assert_eq!(info.mode, "gcm");
        assert_eq!(get_cipher_info("aes-128-ecb").unwrap().iv_length, None);
        assert!(get_cipher_info("des-ede3").is_none());
        assert!(get_ciphers().contains(&"chacha20-poly1305"));
    }
}
