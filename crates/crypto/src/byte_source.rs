use std::ops::Deref;

use zeroize::Zeroizing;

/// Immutable bytes for passphrases, keys and secrets.
///
/// Owned contents are zeroed when the source is dropped. Borrowed contents
/// belong to the caller and are left alone.
#[derive(Debug, Clone)]
pub enum ByteSource<'a> {
    /// Memory owned by the caller.
    Borrowed(&'a [u8]),
    /// A private copy, wiped on drop.
    Owned(Zeroizing<Vec<u8>>),
}

impl<'a> ByteSource<'a> {
    /// Wraps borrowed bytes without copying.
    pub fn borrowed(data: &'a [u8]) -> Self {
        ByteSource::Borrowed(data)
    }

    /// Takes ownership of `data`.
    pub fn owned(data: Vec<u8>) -> ByteSource<'static> {
        ByteSource::Owned(Zeroizing::new(data))
    }

    /// Copies `data` into an owned source.
    pub fn copy_of(data: &[u8]) -> ByteSource<'static> {
        ByteSource::owned(data.to_vec())
    }

    /// Copies a UTF-8 string into an owned source.
    pub fn from_string(data: &str) -> ByteSource<'static> {
        ByteSource::owned(data.as_bytes().to_vec())
    }

    /// Returns true if the bytes are owned by this source.
    pub fn is_owned(&self) -> bool {
        matches!(self, ByteSource::Owned(_))
    }

    /// Returns an owned copy that no longer borrows from the caller.
    pub fn into_owned(self) -> ByteSource<'static> {
        match self {
            ByteSource::Borrowed(data) => ByteSource::copy_of(data),
            ByteSource::Owned(data) => ByteSource::Owned(data),
        }
    }

    /// Returns the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ByteSource::Borrowed(data) => data,
            ByteSource::Owned(data) => data.as_slice(),
        }
    }
}

impl Deref for ByteSource<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for ByteSource<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl<'a> From<&'a [u8]> for ByteSource<'a> {
    fn from(data: &'a [u8]) -> Self {
        ByteSource::Borrowed(data)
    }
}

impl From<Vec<u8>> for ByteSource<'static> {
    fn from(data: Vec<u8>) -> Self {
        ByteSource::owned(data)
    }
}
