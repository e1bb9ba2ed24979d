//! ChaCha20-Poly1305 (RFC 8439) with support for short nonces.

use ::cipher::{KeyInit, KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use poly1305::Poly1305;
use zeroize::Zeroize;

use super::{Absorb, AeadMode};
use crate::CryptoError;

pub(super) struct ChaChaPoly {
    keystream: ChaCha20,
    mac: Absorb<Poly1305>,
    aad_len: u64,
    text_len: u64,
    encrypting: bool,
    in_text: bool,
}

impl ChaChaPoly {
    pub(super) fn new(key: &[u8], iv: &[u8], encrypting: bool) -> Result<Self, CryptoError> {
        if iv.is_empty() || iv.len() > 12 {
            return Err(CryptoError::InvalidIv);
        }
        let mut nonce = [0u8; 12];
        nonce[12 - iv.len()..].copy_from_slice(iv);

        let mut keystream =
            ChaCha20::new_from_slices(key, &nonce).map_err(|_| CryptoError::InvalidKeyLength)?;

        // Block 0 keys the MAC; the message starts at block 1.
        let mut block0 = [0u8; 64];
        keystream.apply_keystream(&mut block0);
        let mac = Poly1305::new_from_slice(&block0[..32]);
        block0.zeroize();

        Ok(Self {
            keystream,
            mac: Absorb::new(mac.map_err(|_| CryptoError::InvalidKeyLength)?),
            aad_len: 0,
            text_len: 0,
            encrypting,
            in_text: false,
        })
    }
}

impl AeadMode for ChaChaPoly {
    fn aad(&mut self, aad: &[u8]) {
        self.aad_len += aad.len() as u64;
        self.mac.absorb(aad);
    }

    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if !self.in_text {
            self.mac.pad();
            self.in_text = true;
        }
        self.text_len += input.len() as u64;

        let start = out.len();
        out.extend_from_slice(input);
        if self.encrypting {
            self.keystream.apply_keystream(&mut out[start..]);
            self.mac.absorb(&out[start..]);
        } else {
            self.mac.absorb(input);
            self.keystream.apply_keystream(&mut out[start..]);
        }
    }

    fn finish(self: Box<Self>, _out: &mut Vec<u8>) -> [u8; 16] {
        let mut mac = self.mac;
        mac.pad();

        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&self.aad_len.to_le_bytes());
        lengths[8..].copy_from_slice(&self.text_len.to_le_bytes());
        mac.absorb(&lengths);
        mac.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 8439 section 2.8.2.
    #[test]
    fn test_rfc8439_sample() {
        let key = hex::decode("808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f")
            .unwrap();
        let iv = hex::decode("070000004041424344454647").unwrap();
        let aad = hex::decode("50515253c0c1c2c3c4c5c6c7").unwrap();
        let msg = b"Ladies and Gentlemen of the class of '99: If I could offer you \
                    only one tip for the future, sunscreen would be it.";

        let mut engine = Box::new(ChaChaPoly::new(&key, &iv, true).unwrap());
        engine.aad(&aad);
        let mut out = Vec::new();
        for chunk in msg.chunks(13) {
            engine.update(chunk, &mut out);
        }
        let tag = engine.finish(&mut out);

        assert_eq!(
            hex::encode(&out[..16]),
            "d31a8d34648e60db7b86afbc53ef7ec2"
        );
        assert_eq!(hex::encode(tag), "1ae10b594f09e26a7e902ecbd0600691");
    }

    #[test]
    fn test_short_nonce_is_left_padded() {
        use chacha20poly1305::{aead::AeadInPlace, ChaCha20Poly1305, KeyInit as _, Nonce};

        let key = [7u8; 32];
        let mut full = [0u8; 12];
        full[4..].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let mut engine = Box::new(ChaChaPoly::new(&key, &full[4..], true).unwrap());
        let mut out = Vec::new();
        engine.update(b"short nonce", &mut out);
        let tag = engine.finish(&mut out);

        let reference = ChaCha20Poly1305::new(&key.into());
        let mut buf = b"short nonce".to_vec();
        let expected = reference
            .encrypt_in_place_detached(Nonce::from_slice(&full), b"", &mut buf)
            .unwrap();
        assert_eq!(out, buf);
        assert_eq!(&tag[..], expected.as_slice());
    }
}
