//! OCB3 as described in RFC 7253.
//!
//! Full blocks are processed as soon as they arrive; only the trailing
//! partial block waits for `finish`.

use ::cipher::{
    consts::U16, generic_array::GenericArray, BlockCipher, BlockDecrypt, BlockEncrypt,
    BlockSizeUser, KeyInit,
};

use super::{encrypt_block, xor_in_place, AeadMode};
use crate::CryptoError;

fn double(block: &[u8; 16]) -> [u8; 16] {
    let value = u128::from_be_bytes(*block);
    let mut doubled = value << 1;
    if value >> 127 == 1 {
        doubled ^= 0x87;
    }
    doubled.to_be_bytes()
}

pub(super) struct Ocb<C> {
    cipher: C,
    encrypting: bool,
    l_star: [u8; 16],
    l_dollar: [u8; 16],
    /// `L_0`, `L_1`, ..., extended on demand.
    l: Vec<[u8; 16]>,

    offset: [u8; 16],
    checksum: [u8; 16],
    blocks: u64,
    pending: Vec<u8>,

    aad_offset: [u8; 16],
    aad_sum: [u8; 16],
    aad_blocks: u64,
    aad_pending: Vec<u8>,
}

impl<C> Ocb<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
{
    pub(super) fn new(
        key: &[u8],
        nonce: &[u8],
        tag_len: usize,
        encrypting: bool,
    ) -> Result<Self, CryptoError> {
        if nonce.is_empty() || nonce.len() > 15 {
            return Err(CryptoError::InvalidIv);
        }
        if !(1..=16).contains(&tag_len) {
            return Err(CryptoError::InvalidAuthTagLength(tag_len));
        }

        let cipher = C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;

        let mut l_star = [0u8; 16];
        encrypt_block(&cipher, &mut l_star);
        let l_dollar = double(&l_star);
        let l0 = double(&l_dollar);

        let mut formatted = [0u8; 16];
        formatted[16 - nonce.len()..].copy_from_slice(nonce);
        formatted[15 - nonce.len()] |= 1;
        formatted[0] |= (((tag_len * 8) % 128) << 1) as u8;

        let bottom = (formatted[15] & 0x3f) as usize;
        formatted[15] &= 0xc0;
        let mut ktop = formatted;
        encrypt_block(&cipher, &mut ktop);

        let mut stretch = [0u8; 24];
        stretch[..16].copy_from_slice(&ktop);
        for i in 0..8 {
            stretch[16 + i] = ktop[i] ^ ktop[i + 1];
        }

        let (bytes, bits) = (bottom / 8, bottom % 8);
        let mut offset = [0u8; 16];
        for (i, byte) in offset.iter_mut().enumerate() {
            *byte = stretch[i + bytes] << bits;
            if bits > 0 {
                *byte |= stretch[i + bytes + 1] >> (8 - bits);
            }
        }

        Ok(Self {
            cipher,
            encrypting,
            l_star,
            l_dollar,
            l: vec![l0],
            offset,
            checksum: [0; 16],
            blocks: 0,
            pending: Vec::with_capacity(16),
            aad_offset: [0; 16],
            aad_sum: [0; 16],
            aad_blocks: 0,
            aad_pending: Vec::with_capacity(16),
        })
    }

    /// Returns `L_ntz(i)`.
    fn l_for(&mut self, i: u64) -> [u8; 16] {
        let index = i.trailing_zeros() as usize;
        while self.l.len() <= index {
            let next = double(&self.l[self.l.len() - 1]);
            self.l.push(next);
        }
        self.l[index]
    }

    fn hash_block(&mut self, block: &[u8]) {
        self.aad_blocks += 1;
        let l = self.l_for(self.aad_blocks);
        xor_in_place(&mut self.aad_offset, &l);

        let mut input = self.aad_offset;
        xor_in_place(&mut input, block);
        encrypt_block(&self.cipher, &mut input);
        xor_in_place(&mut self.aad_sum, &input);
    }

    fn hash_tail(&mut self) {
        if self.aad_pending.is_empty() {
            return;
        }
        let mut padded = [0u8; 16];
        padded[..self.aad_pending.len()].copy_from_slice(&self.aad_pending);
        padded[self.aad_pending.len()] = 0x80;
        self.aad_pending.clear();

        xor_in_place(&mut self.aad_offset, &self.l_star);
        xor_in_place(&mut padded, &self.aad_offset);
        encrypt_block(&self.cipher, &mut padded);
        xor_in_place(&mut self.aad_sum, &padded);
    }

    fn process_block(&mut self, block: &[u8], out: &mut Vec<u8>) {
        self.blocks += 1;
        let l = self.l_for(self.blocks);
        xor_in_place(&mut self.offset, &l);

        let mut buf = GenericArray::clone_from_slice(block);
        xor_in_place(&mut buf, &self.offset);
        if self.encrypting {
            xor_in_place(&mut self.checksum, block);
            self.cipher.encrypt_block(&mut buf);
        } else {
            self.cipher.decrypt_block(&mut buf);
        }
        xor_in_place(&mut buf, &self.offset);
        if !self.encrypting {
            xor_in_place(&mut self.checksum, &buf);
        }
        out.extend_from_slice(&buf);
    }
}

impl<C> AeadMode for Ocb<C>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
    C: Send,
{
    fn aad(&mut self, mut aad: &[u8]) {
        if !self.aad_pending.is_empty() {
            let take = (16 - self.aad_pending.len()).min(aad.len());
            self.aad_pending.extend_from_slice(&aad[..take]);
            aad = &aad[take..];
            if self.aad_pending.len() < 16 || aad.is_empty() {
                return;
            }
            let block = std::mem::take(&mut self.aad_pending);
            self.hash_block(&block);
        }

        // A full final block stays in AAD_pending so later calls can extend it.
        let mut chunks = aad.chunks(16).peekable();
        while let Some(chunk) = chunks.next() {
            if chunks.peek().is_none() {
                self.aad_pending.extend_from_slice(chunk);
            } else {
                self.hash_block(chunk);
            }
        }
    }

    fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let take = (16 - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < 16 {
                return;
            }
            let block = std::mem::take(&mut self.pending);
            self.process_block(&block, out);
        }

        let full = input.len() / 16 * 16;
        for block in input[..full].chunks_exact(16) {
            self.process_block(block, out);
        }
        self.pending.extend_from_slice(&input[full..]);
    }

    fn finish(mut self: Box<Self>, out: &mut Vec<u8>) -> [u8; 16] {
        if self.aad_pending.len() == 16 {
            let block = std::mem::take(&mut self.aad_pending);
            self.hash_block(&block);
        }
        self.hash_tail();

        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let l_star = self.l_star;
            xor_in_place(&mut self.offset, &l_star);

            let mut pad = self.offset;
            encrypt_block(&self.cipher, &mut pad);

            let mut text = tail.clone();
            xor_in_place(&mut text, &pad[..tail.len()]);

            let plaintext = if self.encrypting { &tail } else { &text };
            let mut padded = [0u8; 16];
            padded[..plaintext.len()].copy_from_slice(plaintext);
            padded[plaintext.len()] = 0x80;
            xor_in_place(&mut self.checksum, &padded);

            out.extend_from_slice(&text);
        }

        let mut tag = self.checksum;
        xor_in_place(&mut tag, &self.offset);
        xor_in_place(&mut tag, &self.l_dollar);
        encrypt_block(&self.cipher, &mut tag);
        xor_in_place(&mut tag, &self.aad_sum);
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::{Aes128, Aes256};

    fn seal<C>(key: &[u8], nonce: &[u8], tag_len: usize, aad: &[u8], msg: &[u8]) -> Vec<u8>
    where
        C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16>,
        C: KeyInit + Send,
    {
        let mut ocb = Box::new(Ocb::<C>::new(key, nonce, tag_len, true).unwrap());
        let mut out = Vec::new();
        for chunk in aad.chunks(5) {
            ocb.aad(chunk);
        }
        for chunk in msg.chunks(11) {
            ocb.update(chunk, &mut out);
        }
        let tag = ocb.finish(&mut out);
        out.extend_from_slice(&tag[..tag_len]);
        out
    }

    #[test]
    fn test_empty_message() {
        let nonce = hex::decode("bbaa99887766554433221100").unwrap();
        let sealed = seal::<Aes128>(&(0..16).collect::<Vec<u8>>(), &nonce, 16, b"", b"");
        assert_eq!(hex::encode(sealed), "785407bfffc8ad9edcc5520ac9111ee6");
    }

    #[test]
    fn test_rfc7253_40_byte_sample() {
        let data: Vec<u8> = (0..40).collect();
        let nonce = hex::decode("bbaa9988776655443322110d").unwrap();
        let sealed = seal::<Aes128>(&(0..16).collect::<Vec<u8>>(), &nonce, 16, &data, &data);
        assert_eq!(
            hex::encode(sealed),
            "d5ca91748410c1751ff8a2f618255b68a0a12e093ff454606e59f9c1d0ddc54b\
             65e8628e568bad7aed07ba06a4a69483a7035490c5769e60"
        );
    }

    #[test]
    fn test_rfc7253_96_bit_tag() {
        let data: Vec<u8> = (0..40).collect();
        let key = hex::decode("0f0e0d0c0b0a09080706050403020100").unwrap();
        let nonce = hex::decode("bbaa9988776655443322110d").unwrap();
        let sealed = seal::<Aes128>(&key, &nonce, 12, &data, &data);
        assert_eq!(
            hex::encode(sealed),
            "1792a4e31e0755fb03e31b22116e6c2ddf9efd6e33d536f1a0124b0a55bae884\
             ed93481529c76b6ad0c515f4d1cdd4fdac4f02aa"
        );
    }

    #[test]
    fn test_decrypt_recovers_plaintext() {
        let key = [9u8; 32];
        let nonce = [4u8; 15];
        let msg: Vec<u8> = (0..50).collect();
        let sealed = seal::<Aes256>(&key, &nonce, 16, b"hdr", &msg);
        assert_eq!(
            hex::encode(&sealed),
            "018b7f14b9d2fe06cdfac7a951d403dc332dddba94ca1075ccc959ccad1db8cb\
             085486fe239e1724749705c92c235a67a394b8495272edd60797486e1486c40c9364"
        );

        let (ciphertext, tag) = sealed.split_at(msg.len());
        let mut ocb = Box::new(Ocb::<Aes256>::new(&key, &nonce, 16, false).unwrap());
        let mut out = Vec::new();
        ocb.aad(b"hdr");
        ocb.update(ciphertext, &mut out);
        let computed = ocb.finish(&mut out);
        assert_eq!(out, msg);
        assert_eq!(&computed[..], tag);
    }

    #[test]
    fn test_double() {
        let mut block = [0u8; 16];
        block[0] = 0x80;
        let mut expected = [0u8; 16];
        expected[15] = 0x87;
        assert_eq!(double(&block), expected);
    }
}
