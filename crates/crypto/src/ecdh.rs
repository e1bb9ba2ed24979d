//! Elliptic curve Diffie-Hellman.

use zeroize::Zeroizing;

use crate::{
    curve::{EcPublic, EcSecret},
    CryptoError, Curve, PointFormat,
};

/// An ECDH key exchange on a named curve.
pub struct Ecdh {
    curve: Curve,
    private_key: Option<EcSecret>,
    public_key: Option<EcPublic>,
}

impl std::fmt::Debug for Ecdh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ecdh")
            .field("curve", &self.curve)
            .field("has_private_key", &self.private_key.is_some())
            .field("public_key", &self.public_key)
            .finish()
    }
}

impl Ecdh {
    /// Creates an exchange without keys.
    pub fn new(curve_name: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            curve: Curve::from_name(curve_name)?,
            private_key: None,
            public_key: None,
        })
    }

    /// The curve.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Generates a fresh key pair and returns the public key.
    pub fn generate_keys(&mut self, format: PointFormat) -> Vec<u8> {
        let secret = EcSecret::random(self.curve);
        let public = secret.public_key();
        let encoded = public.to_sec1(format);
        self.private_key = Some(secret);
        self.public_key = Some(public);
        encoded
    }

    /// Computes the shared secret with a peer public key in any point
    /// format.
    pub fn compute_secret(&self, peer_public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let secret = self
            .private_key
            .as_ref()
            .ok_or(CryptoError::InvalidState("Missing private key"))?;
        let peer = EcPublic::from_sec1(self.curve, peer_public_key)?;
        secret.diffie_hellman(&peer)
    }

    /// The private key, big-endian and padded to the field size.
    pub fn private_key(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.private_key
            .as_ref()
            .map(EcSecret::to_bytes)
            .ok_or(CryptoError::InvalidState("Failed to get ECDH private key"))
    }

    /// Sets the private key and derives the matching public key.
    ///
    /// On failure both keys are cleared.
    pub fn set_private_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        self.private_key = None;
        self.public_key = None;

        let secret = EcSecret::from_bytes(self.curve, key)?;
        self.public_key = Some(secret.public_key());
        self.private_key = Some(secret);
        Ok(())
    }

    /// The public key in the requested format.
    pub fn public_key(&self, format: PointFormat) -> Result<Vec<u8>, CryptoError> {
        self.public_key
            .as_ref()
            .map(|key| key.to_sec1(format))
            .ok_or(CryptoError::InvalidState("Failed to get ECDH public key"))
    }

    /// Replaces the public key. The private key is kept.
    pub fn set_public_key(&mut self, key: &[u8]) -> Result<(), CryptoError> {
        self.public_key = Some(EcPublic::from_sec1(self.curve, key)?);
        Ok(())
    }

    /// Re-encodes a public key in another point format.
    pub fn convert_key(
        key: &[u8],
        curve_name: &str,
        format: PointFormat,
    ) -> Result<Vec<u8>, CryptoError> {
        let curve = Curve::from_name(curve_name)?;
        Ok(EcPublic::from_sec1(curve, key)?.to_sec1(format))
    }
}
