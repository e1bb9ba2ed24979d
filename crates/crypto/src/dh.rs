//! Finite field Diffie-Hellman.
//!
//! Parameters come from one of the well-known MODP groups, an explicit
//! prime, or a freshly generated safe prime.

use std::fmt;

use der::{asn1::UintRef, Decode, Encode, Sequence};
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use once_cell::sync::Lazy;
use zeroize::Zeroizing;

#[cfg(feature = "logging")]
use crate::log::debug;
use crate::{decorate, CryptoError, Lib};

/// `p` is not prime.
pub const DH_CHECK_P_NOT_PRIME: u32 = 0x01;
/// `(p - 1) / 2` is not prime.
pub const DH_CHECK_P_NOT_SAFE_PRIME: u32 = 0x02;
/// The generator could not be checked.
pub const DH_UNABLE_TO_CHECK_GENERATOR: u32 = 0x04;
/// The generator does not suit the prime.
pub const DH_NOT_SUITABLE_GENERATOR: u32 = 0x08;

/// Why a peer public key was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhKeyCheck {
    /// At most one.
    TooSmall,
    /// At least `p - 1`.
    TooLarge,
    /// Outside the subgroup of order `q`.
    Invalid,
}

impl fmt::Display for DhKeyCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DhKeyCheck::TooSmall => "Supplied key is too small",
            DhKeyCheck::TooLarge => "Supplied key is too large",
            DhKeyCheck::Invalid => "Invalid key",
        })
    }
}

/// pi in binary fixed point with `PI_PRECISION` fractional bits.
const PI_PRECISION: u64 = 8192 + 64;

fn arctan_inv(x: u32, precision: u64) -> BigUint {
    let x2 = BigUint::from(x * x);
    let mut term = (BigUint::one() << precision) / x;
    let mut positive = term.clone();
    let mut negative = BigUint::zero();
    let mut n = 1u32;
    while !term.is_zero() {
        term /= &x2;
        let part = &term / (2 * n + 1);
        if n % 2 == 1 {
            negative += part;
        } else {
            positive += part;
        }
        n += 1;
    }
    positive - negative
}

static PI: Lazy<BigUint> = Lazy::new(|| {
    // Machin: pi = 16 atan(1/5) - 4 atan(1/239).
    arctan_inv(5, PI_PRECISION) * 16u32 - arctan_inv(239, PI_PRECISION) * 4u32
});

/// `2^b - 2^(b-64) - 1 + 2^64 * (floor(2^(b-130) * pi) + k)`.
fn modp_prime(bits: u64, k: u32) -> BigUint {
    let pi_part = &*PI >> (PI_PRECISION - (bits - 130));
    (BigUint::one() << bits) - (BigUint::one() << (bits - 64)) - 1u32
        + ((pi_part + k) << 64u32)
}

struct Group {
    name: &'static str,
    bits: u64,
    k: u32,
}

const GROUPS: &[Group] = &[
    Group { name: "modp1", bits: 768, k: 149686 },
    Group { name: "modp2", bits: 1024, k: 129093 },
    Group { name: "modp5", bits: 1536, k: 741804 },
    Group { name: "modp14", bits: 2048, k: 124476 },
    Group { name: "modp15", bits: 3072, k: 1690314 },
    Group { name: "modp16", bits: 4096, k: 240904 },
    Group { name: "modp17", bits: 6144, k: 929484 },
    Group { name: "modp18", bits: 8192, k: 4743158 },
];

/// Names of the built-in groups.
pub fn get_groups() -> Vec<&'static str> {
    GROUPS.iter().map(|group| group.name).collect()
}

const SMALL_PRIMES: &[u32] = &[
    3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Returns false if `n` has a small odd factor other than itself.
fn passes_sieve(n: &BigUint) -> bool {
    SMALL_PRIMES.iter().all(|p| {
        let rem = (n % *p).to_u32().unwrap_or(1);
        rem != 0 || *n == BigUint::from(*p)
    })
}

/// Miller-Rabin with random bases.
fn is_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two || *n == BigUint::from(3u32) {
        return true;
    }
    if n.is_even() || !passes_sieve(n) {
        return false;
    }

    let n_minus_one = n - 1u32;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    let mut rng = ::rand::thread_rng();
    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Flags describing problems with `prime` and `generator`.
fn check_params(prime: &BigUint, generator: &BigUint, known_safe: bool) -> u32 {
    let mut flags = 0;

    match generator.to_u32() {
        Some(2) => {
            if (prime % 24u32).to_u32() != Some(11) {
                flags |= DH_NOT_SUITABLE_GENERATOR;
            }
        }
        Some(5) => {
            if !matches!((prime % 10u32).to_u32(), Some(3 | 7)) {
                flags |= DH_NOT_SUITABLE_GENERATOR;
            }
        }
        _ => flags |= DH_UNABLE_TO_CHECK_GENERATOR,
    }

    if !known_safe {
        if !is_probable_prime(prime, 20) {
            flags |= DH_CHECK_P_NOT_PRIME;
        } else if !is_probable_prime(&(prime >> 1u32), 20) {
            flags |= DH_CHECK_P_NOT_SAFE_PRIME;
        }
    }

    flags
}

fn generate_safe_prime(bits: u64, generator: u32) -> BigUint {
    let mut rng = ::rand::thread_rng();
    loop {
        let mut q = rng.gen_biguint(bits - 1);
        q.set_bit(bits - 2, true);
        q.set_bit(0, true);
        let p: BigUint = (&q << 1u32) + 1u32;

        if p.bits() != bits || !passes_sieve(&q) || !passes_sieve(&p) {
            continue;
        }
        let suitable = match generator {
            2 => (&p % 24u32).to_u32() == Some(11),
            5 => matches!((&p % 10u32).to_u32(), Some(3 | 7)),
            _ => true,
        };
        if suitable && is_probable_prime(&q, 20) && is_probable_prime(&p, 20) {
            return p;
        }
    }
}

#[derive(Sequence)]
struct DhParameter<'a> {
    prime: UintRef<'a>,
    base: UintRef<'a>,
    #[asn1(optional = "true")]
    private_value_length: Option<u32>,
}

/// A Diffie-Hellman key exchange.
pub struct DiffieHellman {
    prime: BigUint,
    generator: BigUint,
    /// Subgroup order, when known.
    q: Option<BigUint>,
    private_key: Option<Zeroizing<Vec<u8>>>,
    public_key: Option<BigUint>,
    verify_error: u32,
}

impl fmt::Debug for DiffieHellman {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffieHellman")
            .field("bits", &self.prime.bits())
            .field("generator", &self.generator)
            .field("verify_error", &self.verify_error)
            .finish()
    }
}

impl DiffieHellman {
    fn with_params(prime: BigUint, generator: BigUint, q: Option<BigUint>, verify_error: u32) -> Self {
        Self {
            prime,
            generator,
            q,
            private_key: None,
            public_key: None,
            verify_error,
        }
    }

    /// Uses a built-in MODP group.
    pub fn from_group(name: &str) -> Result<Self, CryptoError> {
        let group = GROUPS
            .iter()
            .find(|group| group.name == name)
            .ok_or(CryptoError::UnknownDhGroup)?;

        let prime = modp_prime(group.bits, group.k);
        let generator = BigUint::from(2u32);
        let q = &prime >> 1u32;
        let verify_error = check_params(&prime, &generator, true);
        Ok(Self::with_params(prime, generator, Some(q), verify_error))
    }

    /// Uses an explicit big-endian prime and generator.
    pub fn from_prime(prime: &[u8], generator: &[u8]) -> Result<Self, CryptoError> {
        let prime = BigUint::from_bytes_be(prime);
        let generator = BigUint::from_bytes_be(generator);
        if prime.bits() < 2 {
            return Err(decorate(Lib::Dh, Some("DH_set0_pqg"), "modulus too small").into());
        }
        if generator <= BigUint::one() || generator >= prime {
            return Err(decorate(Lib::Dh, Some("DH_set0_pqg"), "bad generator").into());
        }
        let verify_error = check_params(&prime, &generator, false);
        Ok(Self::with_params(prime, generator, None, verify_error))
    }

    /// Generates a safe prime of `prime_bits` bits.
    ///
    /// Generators 2 and 5 get a prime they are suitable for.
    pub fn generate(prime_bits: u64, generator: u32) -> Result<Self, CryptoError> {
        if prime_bits < 8 {
            return Err(decorate(Lib::Dh, Some("DH_generate_parameters_ex"), "modulus too small").into());
        }
        if generator < 2 {
            return Err(decorate(Lib::Dh, Some("DH_generate_parameters_ex"), "bad generator").into());
        }

        let prime = generate_safe_prime(prime_bits, generator);
        debug!("generated {} bit safe prime", prime_bits);

        // A suitable generator spans the whole group, so there is no
        // subgroup order to check peer keys against.
        let generator = BigUint::from(generator);
        let verify_error = check_params(&prime, &generator, true);
        Ok(Self::with_params(prime, generator, None, verify_error))
    }

    /// Parses PEM `DH PARAMETERS`.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CryptoError> {
        let (label, der) = pem_rfc7468::decode_vec(pem)
            .map_err(|_| decorate(Lib::Pem, Some("PEM_read_bio_DHparams"), "no start line"))?;
        if label != "DH PARAMETERS" {
            return Err(decorate(Lib::Pem, Some("PEM_read_bio_DHparams"), "no start line").into());
        }
        let params = DhParameter::from_der(&der)
            .map_err(|_| decorate(Lib::Asn1, Some("d2i_DHparams"), "wrong tag"))?;

        Self::from_prime(params.prime.as_bytes(), params.base.as_bytes())
    }

    /// Serializes the parameters as PEM `DH PARAMETERS`.
    pub fn to_pem(&self) -> Result<String, CryptoError> {
        let encode_err = |err: der::Error| CryptoError::engine(Lib::Asn1, "i2d_DHparams", err.to_string());

        let prime = self.prime.to_bytes_be();
        let base = self.generator.to_bytes_be();
        let der = DhParameter {
            prime: UintRef::new(&prime).map_err(encode_err)?,
            base: UintRef::new(&base).map_err(encode_err)?,
            private_value_length: None,
        }
        .to_der()
        .map_err(encode_err)?;

        pem_rfc7468::encode_string("DH PARAMETERS", pem_rfc7468::LineEnding::LF, &der)
            .map_err(|err| CryptoError::engine(Lib::Pem, "PEM_write_bio_DHparams", err.to_string()))
    }

    /// Size of the prime in bits.
    pub fn bits(&self) -> u64 {
        self.prime.bits()
    }

    fn prime_len(&self) -> usize {
        self.prime.bits().div_ceil(8) as usize
    }

    /// Problems found with the parameters, as `DH_*` flags.
    pub fn verify_error(&self) -> u32 {
        self.verify_error
    }

    /// Generates a key pair, keeping an existing private key, and returns
    /// the public key.
    pub fn generate_keys(&mut self) -> Result<Vec<u8>, CryptoError> {
        let private = match &self.private_key {
            Some(private) => BigUint::from_bytes_be(private),
            None => {
                let upper = &self.prime - 1u32;
                let private = ::rand::thread_rng().gen_biguint_range(&BigUint::from(2u32), &upper);
                self.private_key = Some(Zeroizing::new(private.to_bytes_be()));
                private
            }
        };

        let public = self.generator.modpow(&private, &self.prime);
        let bytes = public.to_bytes_be();
        self.public_key = Some(public);
        Ok(bytes)
    }

    /// Checks a peer public key against the parameters.
    pub fn check_public_key(&self, peer: &BigUint) -> Result<(), DhKeyCheck> {
        if *peer <= BigUint::one() {
            return Err(DhKeyCheck::TooSmall);
        }
        if *peer >= &self.prime - 1u32 {
            return Err(DhKeyCheck::TooLarge);
        }
        if let Some(q) = &self.q {
            if !peer.modpow(q, &self.prime).is_one() {
                return Err(DhKeyCheck::Invalid);
            }
        }
        Ok(())
    }

    /// Computes the shared secret, left-padded to the prime size.
    pub fn compute_secret(&self, peer_public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let private = self
            .private_key
            .as_ref()
            .ok_or(CryptoError::InvalidState("No private key - did you forget to generate one?"))?;

        let peer = BigUint::from_bytes_be(peer_public_key);
        self.check_public_key(&peer)
            .map_err(CryptoError::InvalidDhPublicKey)?;

        let shared = peer.modpow(&BigUint::from_bytes_be(private), &self.prime);
        let bytes = Zeroizing::new(shared.to_bytes_be());

        let len = self.prime_len();
        let mut out = Zeroizing::new(vec![0u8; len - bytes.len()]);
        out.extend_from_slice(&bytes);
        Ok(out)
    }

    /// The prime, big-endian.
    pub fn prime(&self) -> Vec<u8> {
        self.prime.to_bytes_be()
    }

    /// The generator, big-endian.
    pub fn generator(&self) -> Vec<u8> {
        self.generator.to_bytes_be()
    }

    /// The public key.
    pub fn public_key(&self) -> Result<Vec<u8>, CryptoError> {
        self.public_key
            .as_ref()
            .map(BigUint::to_bytes_be)
            .ok_or(CryptoError::InvalidState("No public key - did you forget to generate one?"))
    }

    /// The private key.
    pub fn private_key(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.private_key
            .clone()
            .ok_or(CryptoError::InvalidState("No private key - did you forget to generate one?"))
    }

    /// Replaces the public key.
    pub fn set_public_key(&mut self, key: &[u8]) {
        self.public_key = Some(BigUint::from_bytes_be(key));
    }

    /// Replaces the private key. The public key is left as is.
    pub fn set_private_key(&mut self, key: &[u8]) {
        self.private_key = Some(Zeroizing::new(key.to_vec()));
    }
}
