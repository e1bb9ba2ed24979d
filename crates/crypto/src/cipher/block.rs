use ::cipher::{
    consts::U16, generic_array::GenericArray, BlockCipher, BlockDecrypt, BlockDecryptMut,
    BlockEncrypt, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit, StreamCipher,
};

use super::{Engine, PlainMode};
use crate::{decorate, CryptoError, Lib};

const BLOCK: usize = 16;

pub(super) fn ecb<C>(key: &[u8], encrypting: bool) -> Result<Engine, CryptoError>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
    C: Send + 'static,
{
    let engine: Box<dyn PlainMode> = if encrypting {
        Box::new(Encryptor::new(
            ecb::Encryptor::<C>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?,
        ))
    } else {
        Box::new(Decryptor::new(
            ecb::Decryptor::<C>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?,
        ))
    };
    Ok(Engine::Plain(engine))
}

pub(super) fn cbc<C>(key: &[u8], iv: &[u8], encrypting: bool) -> Result<Engine, CryptoError>
where
    C: BlockCipher + BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
    C: Send + 'static,
{
    let engine: Box<dyn PlainMode> = if encrypting {
        Box::new(Encryptor::new(
            cbc::Encryptor::<C>::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidIv)?,
        ))
    } else {
        Box::new(Decryptor::new(
            cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidIv)?,
        ))
    };
    Ok(Engine::Plain(engine))
}

pub(super) fn ctr<C>(key: &[u8], iv: &[u8]) -> Result<Engine, CryptoError>
where
    C: BlockCipher + BlockEncrypt + BlockSizeUser<BlockSize = U16> + KeyInit,
    C: Send + 'static,
{
    let stream =
        ctr::Ctr128BE::<C>::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidIv)?;
    Ok(Engine::Plain(Box::new(Ctr(stream))))
}

/// Splits off the prefix of `buf` that can be processed now.
///
/// A decryptor holds back one full block so padding can be stripped in
/// `finish`.
fn ready_len(buf: &[u8], hold_back: bool) -> usize {
    let full = buf.len() / BLOCK * BLOCK;
    if hold_back && full == buf.len() {
        full.saturating_sub(BLOCK)
    } else {
        full
    }
}

struct Encryptor<M> {
    mode: M,
    buf: Vec<u8>,
}

impl<M> Encryptor<M> {
    fn new(mode: M) -> Self {
        Self {
            mode,
            buf: Vec::with_capacity(BLOCK),
        }
    }
}

impl<M> Encryptor<M>
where
    M: BlockEncryptMut + BlockSizeUser<BlockSize = U16>,
{
    fn encrypt_blocks(&mut self, len: usize, out: &mut Vec<u8>) {
        for chunk in self.buf[..len].chunks_exact(BLOCK) {
            let mut block = GenericArray::clone_from_slice(chunk);
            self.mode.encrypt_block_mut(&mut block);
            out.extend_from_slice(&block);
        }
        self.buf.drain(..len);
    }
}

impl<M> PlainMode for Encryptor<M>
where
    M: BlockEncryptMut + BlockSizeUser<BlockSize = U16> + Send,
{
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.buf.extend_from_slice(input);
        let len = ready_len(&self.buf, false);
        self.encrypt_blocks(len, out);
    }

    fn finish(&mut self, padding: bool, out: &mut Vec<u8>) -> Result<(), CryptoError> {
        if padding {
            let pad = BLOCK - self.buf.len();
            self.buf.resize(BLOCK, pad as u8);
            self.encrypt_blocks(BLOCK, out);
        } else if !self.buf.is_empty() {
            return Err(decorate(
                Lib::Evp,
                Some("EVP_EncryptFinal_ex"),
                "data not multiple of block length",
            )
            .into());
        }
        Ok(())
    }
}

struct Decryptor<M> {
    mode: M,
    buf: Vec<u8>,
}

impl<M> Decryptor<M> {
    fn new(mode: M) -> Self {
        Self {
            mode,
            buf: Vec::with_capacity(2 * BLOCK),
        }
    }
}

impl<M> Decryptor<M>
where
    M: BlockDecryptMut + BlockSizeUser<BlockSize = U16>,
{
    fn decrypt_blocks(&mut self, len: usize, out: &mut Vec<u8>) {
        for chunk in self.buf[..len].chunks_exact(BLOCK) {
            let mut block = GenericArray::clone_from_slice(chunk);
            self.mode.decrypt_block_mut(&mut block);
            out.extend_from_slice(&block);
        }
        self.buf.drain(..len);
    }
}

impl<M> PlainMode for Decryptor<M>
where
    M: BlockDecryptMut + BlockSizeUser<BlockSize = U16> + Send,
{
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        self.buf.extend_from_slice(input);
        let len = ready_len(&self.buf, true);
        self.decrypt_blocks(len, out);
    }

    fn finish(&mut self, padding: bool, out: &mut Vec<u8>) -> Result<(), CryptoError> {
        let wrong_length = || {
            decorate(
                Lib::Evp,
                Some("EVP_DecryptFinal_ex"),
                "wrong final block length",
            )
        };

        if !padding {
            if self.buf.len() % BLOCK != 0 {
                return Err(wrong_length().into());
            }
            let len = self.buf.len();
            self.decrypt_blocks(len, out);
            return Ok(());
        }

        if self.buf.len() != BLOCK {
            return Err(wrong_length().into());
        }

        let mut last = Vec::with_capacity(BLOCK);
        self.decrypt_blocks(BLOCK, &mut last);

        let pad = last[BLOCK - 1] as usize;
        if pad == 0 || pad > BLOCK || last[BLOCK - pad..].iter().any(|b| *b as usize != pad) {
            return Err(decorate(Lib::Evp, Some("EVP_DecryptFinal_ex"), "bad decrypt").into());
        }

        out.extend_from_slice(&last[..BLOCK - pad]);
        Ok(())
    }
}

struct Ctr<S>(S);

impl<S: StreamCipher + Send> PlainMode for Ctr<S> {
    fn update(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(input);
        self.0.apply_keystream(&mut out[start..]);
    }

    fn finish(&mut self, _padding: bool, _out: &mut Vec<u8>) -> Result<(), CryptoError> {
        Ok(())
    }
}
