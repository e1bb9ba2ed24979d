use elliptic_curve::sec1::ToEncodedPoint;
use zeroize::Zeroizing;

use crate::CryptoError;

/// A named elliptic curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    /// NIST P-256, also known as prime256v1.
    P256,
    /// NIST P-384.
    P384,
    /// The Koblitz curve used by Bitcoin.
    K256,
}

impl Curve {
    /// Looks up a curve by its short or NIST name.
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "prime256v1" | "secp256r1" | "P-256" => Ok(Curve::P256),
            "secp384r1" | "P-384" => Ok(Curve::P384),
            "secp256k1" => Ok(Curve::K256),
            _ => Err(CryptoError::InvalidCurve(name.to_string())),
        }
    }

    /// The short name, as reported in key details.
    pub fn name(&self) -> &'static str {
        match self {
            Curve::P256 => "prime256v1",
            Curve::P384 => "secp384r1",
            Curve::K256 => "secp256k1",
        }
    }

    /// The NIST name, if the curve has one.
    pub fn nist_name(&self) -> Option<&'static str> {
        match self {
            Curve::P256 => Some("P-256"),
            Curve::P384 => Some("P-384"),
            Curve::K256 => None,
        }
    }

    /// Size of the field in bits.
    pub fn bits(&self) -> usize {
        match self {
            Curve::P256 | Curve::K256 => 256,
            Curve::P384 => 384,
        }
    }

    /// Size of a field element in bytes.
    pub fn field_len(&self) -> usize {
        self.bits() / 8
    }
}

/// Returns the names of the supported curves.
pub fn get_curves() -> Vec<&'static str> {
    vec!["prime256v1", "secp256k1", "secp384r1"]
}

/// Encoding of an elliptic curve point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointFormat {
    /// `04 || x || y`.
    #[default]
    Uncompressed,
    /// `02/03 || x`.
    Compressed,
    /// `06/07 || x || y`, the prefix carrying the parity of `y`.
    Hybrid,
}

impl PointFormat {
    /// Parses `uncompressed`, `compressed` or `hybrid`.
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "uncompressed" => Ok(PointFormat::Uncompressed),
            "compressed" => Ok(PointFormat::Compressed),
            "hybrid" => Ok(PointFormat::Hybrid),
            _ => Err(CryptoError::InvalidArgValue(format!(
                "Invalid ECDH format: {name}"
            ))),
        }
    }
}

macro_rules! dispatch {
    ($value:expr, $ty:ident, $inner:ident => $body:expr) => {
        match $value {
            $ty::P256($inner) => $body,
            $ty::P384($inner) => $body,
            $ty::K256($inner) => $body,
        }
    };
}

/// An elliptic curve private scalar.
#[derive(Clone)]
pub(crate) enum EcSecret {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    K256(k256::SecretKey),
}

/// An elliptic curve point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum EcPublic {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
    K256(k256::PublicKey),
}

impl EcSecret {
    pub(crate) fn random(curve: Curve) -> Self {
        let mut rng = ::rand::thread_rng();
        match curve {
            Curve::P256 => EcSecret::P256(p256::SecretKey::random(&mut rng)),
            Curve::P384 => EcSecret::P384(p384::SecretKey::random(&mut rng)),
            Curve::K256 => EcSecret::K256(k256::SecretKey::random(&mut rng)),
        }
    }

    /// Imports a big-endian scalar, which must lie in `[1, n)`.
    pub(crate) fn from_bytes(curve: Curve, bytes: &[u8]) -> Result<Self, CryptoError> {
        let len = curve.field_len();
        let bytes = match bytes.iter().position(|b| *b != 0) {
            Some(start) => &bytes[start..],
            None => return Err(CryptoError::InvalidEcdhPrivateKey),
        };
        if bytes.len() > len {
            return Err(CryptoError::InvalidEcdhPrivateKey);
        }

        let mut padded = Zeroizing::new(vec![0u8; len]);
        padded[len - bytes.len()..].copy_from_slice(bytes);

        let secret = match curve {
            Curve::P256 => p256::SecretKey::from_slice(&padded).map(EcSecret::P256),
            Curve::P384 => p384::SecretKey::from_slice(&padded).map(EcSecret::P384),
            Curve::K256 => k256::SecretKey::from_slice(&padded).map(EcSecret::K256),
        };
        secret.map_err(|_| CryptoError::InvalidEcdhPrivateKey)
    }

    pub(crate) fn curve(&self) -> Curve {
        match self {
            EcSecret::P256(_) => Curve::P256,
            EcSecret::P384(_) => Curve::P384,
            EcSecret::K256(_) => Curve::K256,
        }
    }

    pub(crate) fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        dispatch!(self, EcSecret, key => Zeroizing::new(key.to_bytes().to_vec()))
    }

    pub(crate) fn public_key(&self) -> EcPublic {
        match self {
            EcSecret::P256(key) => EcPublic::P256(key.public_key()),
            EcSecret::P384(key) => EcPublic::P384(key.public_key()),
            EcSecret::K256(key) => EcPublic::K256(key.public_key()),
        }
    }

    /// Computes the x coordinate of the shared point.
    pub(crate) fn diffie_hellman(&self, peer: &EcPublic) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let shared = match (self, peer) {
            (EcSecret::P256(sk), EcPublic::P256(pk)) => {
                p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            (EcSecret::P384(sk), EcPublic::P384(pk)) => {
                p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            (EcSecret::K256(sk), EcPublic::K256(pk)) => {
                k256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            _ => return Err(CryptoError::InvalidEcdhPublicKey),
        };
        Ok(Zeroizing::new(shared))
    }
}

impl EcPublic {
    /// Decodes a SEC1 point in any of the three formats.
    pub(crate) fn from_sec1(curve: Curve, bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut owned;
        let mut bytes = bytes;
        if matches!(bytes.first(), Some(0x06 | 0x07)) {
            // Hybrid points carry the full y; check the parity and re-tag.
            let odd = bytes[0] == 0x07;
            if bytes.len() != 1 + 2 * curve.field_len()
                || (bytes[bytes.len() - 1] & 1 == 1) != odd
            {
                return Err(CryptoError::InvalidEcdhPublicKey);
            }
            owned = bytes.to_vec();
            owned[0] = 0x04;
            bytes = &owned;
        }

        let key = match curve {
            Curve::P256 => p256::PublicKey::from_sec1_bytes(bytes).map(EcPublic::P256),
            Curve::P384 => p384::PublicKey::from_sec1_bytes(bytes).map(EcPublic::P384),
            Curve::K256 => k256::PublicKey::from_sec1_bytes(bytes).map(EcPublic::K256),
        };
        key.map_err(|_| CryptoError::InvalidEcdhPublicKey)
    }

    pub(crate) fn curve(&self) -> Curve {
        match self {
            EcPublic::P256(_) => Curve::P256,
            EcPublic::P384(_) => Curve::P384,
            EcPublic::K256(_) => Curve::K256,
        }
    }

    pub(crate) fn to_sec1(&self, format: PointFormat) -> Vec<u8> {
        let compress = format == PointFormat::Compressed;
        let mut bytes =
            dispatch!(self, EcPublic, key => key.to_encoded_point(compress).as_bytes().to_vec());
        if format == PointFormat::Hybrid {
            let odd = bytes[bytes.len() - 1] & 1;
            bytes[0] = 0x06 | odd;
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::p256("prime256v1", Curve::P256)]
    #[case::nist("P-256", Curve::P256)]
    #[case::p384("secp384r1", Curve::P384)]
    #[case::k256("secp256k1", Curve::K256)]
    fn test_curve_names(#[case] name: &str, #[case] expected: Curve) {
        assert_eq!(Curve::from_name(name).unwrap(), expected);
    }

    #[test]
    fn test_unknown_curve() {
        let err = Curve::from_name("secp9000").unwrap_err();
        assert_eq!(err.code(), "ERR_CRYPTO_INVALID_CURVE");
    }

    #[rstest]
    #[case(Curve::P256)]
    #[case(Curve::P384)]
    #[case(Curve::K256)]
    fn test_point_formats_decode_to_same_point(#[case] curve: Curve) {
        let public = EcSecret::random(curve).public_key();

        let uncompressed = public.to_sec1(PointFormat::Uncompressed);
        let compressed = public.to_sec1(PointFormat::Compressed);
        let hybrid = public.to_sec1(PointFormat::Hybrid);

        assert_eq!(uncompressed.len(), 1 + 2 * curve.field_len());
        assert_eq!(compressed.len(), 1 + curve.field_len());
        assert_eq!(hybrid[1..], uncompressed[1..]);

        for encoded in [uncompressed, compressed, hybrid] {
            assert_eq!(EcPublic::from_sec1(curve, &encoded).unwrap(), public);
        }
    }

    #[test]
    fn test_short_private_key_is_padded() {
        let secret = EcSecret::from_bytes(Curve::P256, &[1]).unwrap();
        let bytes = secret.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[31], 1);
    }

    #[test]
    fn test_private_key_out_of_range() {
        assert!(EcSecret::from_bytes(Curve::P256, &[0xff; 32]).is_err());
        assert!(EcSecret::from_bytes(Curve::P256, &[0; 32]).is_err());
    }
}
