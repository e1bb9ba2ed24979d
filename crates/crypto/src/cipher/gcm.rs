//! Streaming GCM built from a CTR keystream and GHASH.

use ::cipher::{
    consts::U16, BlockCipher, BlockEncrypt, BlockSizeUser, KeyInit, KeyIvInit, StreamCipher,
};
use ghash::GHash;

use super::{encrypt_block, xor_in_place, Absorb, AeadMode};
use crate::CryptoError;

pub(super) struct Gcm<C>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    keystream: ctr::Ctr32BE<C>,
    ghash: Absorb<GHash>,
    tag_mask: [u8; 16],
    aad_len: u64,
    text_len: u64,
    encrypting: bool,
    in_text: bool,
}

impl<C> Gcm<C>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
{
    pub(super) fn new(key: &[u8], iv: &[u8], encrypting: bool) -> Result<Self, CryptoError> {
        let cipher = C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;

        let mut h = [0u8; 16];
        encrypt_block(&cipher, &mut h);

        let j0 = if iv.len() == 12 {
            let mut j0 = [0u8; 16];
            j0[..12].copy_from_slice(iv);
            j0[15] = 1;
            j0
        } else {
            let mut lengths = [0u8; 16];
            lengths[8..].copy_from_slice(&((iv.len() as u64) * 8).to_be_bytes());
            let mut ghash = Absorb::new(GHash::new(&h.into()));
            ghash.absorb(iv);
            ghash.pad();
            ghash.absorb(&lengths);
            ghash.finalize()
        };

        let mut tag_mask = j0;
        encrypt_block(&cipher, &mut tag_mask);

        let mut counter = j0;
        let low = u32::from_be_bytes([counter[12], counter[13], counter[14], counter[15]]);
        counter[12..].copy_from_slice(&low.wrapping_add(1).to_be_bytes());

        let keystream = ctr::Ctr32BE::<C>::new_from_slices(key, &counter)
            .map_err(|_| CryptoError::InvalidKeyLength)?;

        Ok(Self {
            keystream,
            ghash: Absorb::new(GHash::new(&h.into())),
            tag_mask,
            aad_len: 0,
            text_len: 0,
            encrypting,
            in_text: false,
        })
    }
}

impl<C> AeadMode for Gcm<C>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16> + Send,
{
    fn aad(&mut self, aad: &[u8]) {
        self.aad_len += aad.len() as u64;
        self.ghash.absorb(aad);
    }

    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        if !self.in_text {
            self.ghash.pad();
            self.in_text = true;
        }
        self.text_len += input.len() as u64;

        let start = out.len();
        out.extend_from_slice(input);
        if self.encrypting {
            self.keystream.apply_keystream(&mut out[start..]);
            self.ghash.absorb(&out[start..]);
        } else {
            self.ghash.absorb(input);
            self.keystream.apply_keystream(&mut out[start..]);
        }
    }

    fn finish(self: Box<Self>, _out: &mut Vec<u8>) -> [u8; 16] {
        let mut ghash = self.ghash;
        ghash.pad();

        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&(self.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.text_len * 8).to_be_bytes());
        ghash.absorb(&lengths);

        let mut tag = ghash.finalize();
        xor_in_place(&mut tag, &self.tag_mask);
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::Aes128;

    fn seal(key: &[u8], iv: &[u8], aad: &[u8], msg: &[u8]) -> (Vec<u8>, [u8; 16]) {
        let mut gcm = Box::new(Gcm::<Aes128>::new(key, iv, true).unwrap());
        let mut out = Vec::new();
        gcm.aad(aad);
        for chunk in msg.chunks(7) {
            gcm.update(chunk, &mut out);
        }
        let tag = gcm.finish(&mut out);
        (out, tag)
    }

    // Test case 4 of the original GCM submission.
    #[test]
    fn test_known_vector() {
        let key = hex::decode("feffe9928665731c6d6a8f9467308308").unwrap();
        let iv = hex::decode("cafebabefacedbaddecaf888").unwrap();
        let aad = hex::decode("feedfacedeadbeeffeedfacedeadbeefabaddad2").unwrap();
        let msg = hex::decode(
            "d9313225f88406e5a55909c5aff5269a86a7a9531534f7da2e4c303d8a318a72\
             1c3c0c95956809532fcf0e2449a6b525b16aedf5aa0de657ba637b39",
        )
        .unwrap();

        let (ciphertext, tag) = seal(&key, &iv, &aad, &msg);
        assert_eq!(
            hex::encode(ciphertext),
            "42831ec2217774244b7221b784d0d49ce3aa212f2c02a4e035c17e2329aca12e\
             21d514b25466931c7d8f6a5aac84aa051ba30b396a0aac973d58e091"
        );
        assert_eq!(hex::encode(tag), "5bc94fbc3221a5db94fae95ae7121a47");
    }

    #[test]
    fn test_matches_reference_with_long_iv() {
        use aes_gcm::{
            aead::{consts::U16 as NonceSize, generic_array::GenericArray, AeadInPlace, KeyInit},
            AesGcm,
        };

        let key = [3u8; 16];
        let iv = [5u8; 16];
        let msg = b"a message that spans more than one block";

        let (ciphertext, tag) = seal(&key, &iv, b"header", msg);

        let reference = AesGcm::<Aes128, NonceSize>::new(
            GenericArray::from_slice(&key),
        );
        let mut buf = msg.to_vec();
        let expected_tag = reference
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"header", &mut buf)
            .unwrap();
        assert_eq!(ciphertext, buf);
        assert_eq!(&tag[..], expected_tag.as_slice());
    }
}
