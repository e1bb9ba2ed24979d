//! Random bytes and integers from the thread-local generator.

use rand::{thread_rng, Rng};

use crate::CryptoError;

/// Fill the whole slice with random material.
pub fn fill_random(bytes: &mut [u8]) -> Result<(), CryptoError> {
    thread_rng()
        .try_fill(bytes)
        .map_err(|_| CryptoError::failed("failed to get random from system"))
}

/// Make a Vec<u8> of the given size
/// containing random material.
pub fn random_vec(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut v = vec![0; len];
    fill_random(&mut v)?;
    Ok(v)
}

/// Returns a uniformly random integer in `[min, max)`.
pub fn random_int(min: i64, max: i64) -> Result<i64, CryptoError> {
    if min >= max {
        return Err(CryptoError::InvalidArgValue(format!(
            "The value of \"max\" must be greater than the value of \"min\" ({min})"
        )));
    }
    Ok(thread_rng().gen_range(min..max))
}
