//! CCM (counter with CBC-MAC).
//!
//! The MAC covers the message length, so the whole message has to be
//! available at once.

use ::cipher::{consts::U16, BlockCipher, BlockEncrypt, BlockSizeUser, KeyInit};
use subtle::ConstantTimeEq;

use super::{encrypt_block, xor_in_place, OneShotAead};
use crate::CryptoError;

pub(super) struct Ccm<C> {
    cipher: C,
    nonce: Vec<u8>,
    tag_len: usize,
    aad: Vec<u8>,
}

impl<C> Ccm<C>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
{
    pub(super) fn new(key: &[u8], nonce: &[u8], tag_len: usize) -> Result<Self, CryptoError> {
        if !(7..=13).contains(&nonce.len()) {
            return Err(CryptoError::InvalidIv);
        }
        if !(4..=16).contains(&tag_len) || tag_len % 2 != 0 {
            return Err(CryptoError::InvalidAuthTagLength(tag_len));
        }

        Ok(Self {
            cipher: C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?,
            nonce: nonce.to_vec(),
            tag_len,
            aad: Vec::new(),
        })
    }

    /// Width of the length and counter fields.
    fn q(&self) -> usize {
        15 - self.nonce.len()
    }

    fn counter_block(&self, index: u64) -> [u8; 16] {
        let q = self.q();
        let mut block = [0u8; 16];
        block[0] = (q - 1) as u8;
        block[1..1 + self.nonce.len()].copy_from_slice(&self.nonce);
        let index = index.to_be_bytes();
        let width = q.min(8);
        block[16 - width..].copy_from_slice(&index[8 - width..]);
        block
    }

    fn apply_keystream(&self, data: &mut [u8]) {
        for (i, chunk) in data.chunks_mut(16).enumerate() {
            let mut pad = self.counter_block(i as u64 + 1);
            encrypt_block(&self.cipher, &mut pad);
            xor_in_place(chunk, &pad[..chunk.len()]);
        }
    }

    fn mac_block(&self, state: &mut [u8; 16], block: &[u8]) {
        xor_in_place(state, block);
        encrypt_block(&self.cipher, state);
    }

    fn mac_padded(&self, state: &mut [u8; 16], data: &[u8]) {
        for chunk in data.chunks(16) {
            let mut block = [0u8; 16];
            block[..chunk.len()].copy_from_slice(chunk);
            self.mac_block(state, &block);
        }
    }

    /// Computes the encrypted tag over `plaintext`.
    fn tag(&self, plaintext: &[u8]) -> [u8; 16] {
        let q = self.q();

        let mut b0 = [0u8; 16];
        b0[0] = (((self.tag_len - 2) / 2) << 3) as u8 | (q - 1) as u8;
        if !self.aad.is_empty() {
            b0[0] |= 0x40;
        }
        b0[1..1 + self.nonce.len()].copy_from_slice(&self.nonce);
        let len = (plaintext.len() as u64).to_be_bytes();
        let width = q.min(8);
        b0[16 - width..].copy_from_slice(&len[8 - width..]);

        let mut state = [0u8; 16];
        self.mac_block(&mut state, &b0);

        if !self.aad.is_empty() {
            let mut header = Vec::with_capacity(self.aad.len() + 6);
            if self.aad.len() < 0xff00 {
                header.extend_from_slice(&(self.aad.len() as u16).to_be_bytes());
            } else {
                header.extend_from_slice(&[0xff, 0xfe]);
                header.extend_from_slice(&(self.aad.len() as u32).to_be_bytes());
            }
            header.extend_from_slice(&self.aad);
            self.mac_padded(&mut state, &header);
        }
        self.mac_padded(&mut state, plaintext);

        let mut s0 = self.counter_block(0);
        encrypt_block(&self.cipher, &mut s0);
        xor_in_place(&mut state, &s0);

        let mut tag = [0u8; 16];
        tag[..self.tag_len].copy_from_slice(&state[..self.tag_len]);
        tag
    }
}

impl<C> OneShotAead for Ccm<C>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16> + KeyInit + Send,
{
    fn aad(&mut self, aad: &[u8]) {
        self.aad.extend_from_slice(aad);
    }

    fn seal(&mut self, input: &[u8]) -> (Vec<u8>, [u8; 16]) {
        let tag = self.tag(input);
        let mut out = input.to_vec();
        self.apply_keystream(&mut out);
        (out, tag)
    }

    fn open(&mut self, input: &[u8], tag: &[u8]) -> Option<Vec<u8>> {
        if tag.len() != self.tag_len {
            return None;
        }

        let mut out = input.to_vec();
        self.apply_keystream(&mut out);

        let expected = self.tag(&out);
        if bool::from(expected[..self.tag_len].ct_eq(tag)) {
            Some(out)
        } else {
            None
        }
    }
}
