//! Session ticket encryption keyed by the 48-byte ticket key set.
//!
//! A ticket is `name(16) || iv(16) || AES-128-CBC(plain) || HMAC-SHA256(32)`,
//! with the MAC taken over everything before it.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use rustls::server::ProducesTickets;
use wrap_crypto::{rand::random_vec, timing_safe_equal, Cipher, Direction, Hmac};
use zeroize::Zeroize;

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::TlsError;

/// Length of the serialized ticket key set.
pub const TICKET_KEYS_LEN: usize = 48;

const NAME_LEN: usize = 16;
const IV_LEN: usize = 16;
const MAC_LEN: usize = 32;

/// Application hook for ticket key rotation.
///
/// Called with `None` when a ticket is issued and with the ticket's key name
/// when one is presented. Returning `None` while decrypting rejects the
/// ticket; while encrypting it falls back to the context's own keys.
pub type TicketKeyCallback = dyn Fn(Option<&[u8; 16]>) -> Option<TicketKeys> + Send + Sync;

/// The key set protecting session tickets: a key name, an HMAC key and an
/// AES key, 16 bytes each.
#[derive(Clone, PartialEq, Eq)]
pub struct TicketKeys {
    /// Identifies the key set inside issued tickets.
    pub name: [u8; 16],
    /// HMAC-SHA256 key.
    pub hmac_key: [u8; 16],
    /// AES-128 key.
    pub aes_key: [u8; 16],
}

impl fmt::Debug for TicketKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketKeys")
            .field("name", &hex::encode(self.name))
            .finish_non_exhaustive()
    }
}

impl Drop for TicketKeys {
    fn drop(&mut self) {
        self.hmac_key.zeroize();
        self.aes_key.zeroize();
    }
}

impl TicketKeys {
    /// Generates a fresh key set.
    pub fn random() -> Result<Self, TlsError> {
        let mut bytes = random_vec(TICKET_KEYS_LEN)?;
        let keys = Self::from_bytes(&bytes);
        bytes.zeroize();
        keys
    }

    /// Parses the 48-byte external form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TlsError> {
        if bytes.len() != TICKET_KEYS_LEN {
            return Err(TlsError::invalid_arg("Ticket keys length must be 48 bytes"));
        }
        let mut keys = Self {
            name: [0; 16],
            hmac_key: [0; 16],
            aes_key: [0; 16],
        };
        keys.name.copy_from_slice(&bytes[..16]);
        keys.hmac_key.copy_from_slice(&bytes[16..32]);
        keys.aes_key.copy_from_slice(&bytes[32..]);
        Ok(keys)
    }

    /// The 48-byte external form.
    pub fn to_bytes(&self) -> [u8; TICKET_KEYS_LEN] {
        let mut out = [0; TICKET_KEYS_LEN];
        out[..16].copy_from_slice(&self.name);
        out[16..32].copy_from_slice(&self.hmac_key);
        out[32..].copy_from_slice(&self.aes_key);
        out
    }

    fn mac(&self, data: &[u8]) -> Option<Vec<u8>> {
        let mut hmac = Hmac::new("sha256", &self.hmac_key).ok()?;
        hmac.update(data).ok()?;
        Some(hmac.digest())
    }

    fn seal(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let iv = random_vec(IV_LEN).ok()?;
        let mut cipher =
            Cipher::new("aes-128-cbc", Direction::Encrypt, &self.aes_key, Some(&iv), None).ok()?;

        let mut ticket = Vec::with_capacity(NAME_LEN + IV_LEN + plain.len() + 16 + MAC_LEN);
        ticket.extend_from_slice(&self.name);
        ticket.extend_from_slice(&iv);
        ticket.extend(cipher.update(plain).ok()?);
        ticket.extend(cipher.finalize().ok()?);

        let mac = self.mac(&ticket)?;
        ticket.extend(mac);
        Some(ticket)
    }

    fn open(&self, ticket: &[u8]) -> Option<Vec<u8>> {
        let (body, mac) = ticket.split_at(ticket.len() - MAC_LEN);
        if !timing_safe_equal(&self.mac(body)?, mac).ok()? {
            return None;
        }

        let iv = &body[NAME_LEN..NAME_LEN + IV_LEN];
        let mut cipher =
            Cipher::new("aes-128-cbc", Direction::Decrypt, &self.aes_key, Some(iv), None).ok()?;
        let mut plain = cipher.update(&body[NAME_LEN + IV_LEN..]).ok()?;
        plain.extend(cipher.finalize().ok()?);
        Some(plain)
    }
}

/// The ticket keys and rotation hook of one context.
#[derive(Clone)]
pub(crate) struct Ticketer {
    keys: Arc<RwLock<TicketKeys>>,
    callback: Option<Arc<TicketKeyCallback>>,
}

impl fmt::Debug for Ticketer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticketer")
            .field("keys", &*self.keys.read())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Ticketer {
    pub(crate) fn new() -> Result<Self, TlsError> {
        Ok(Self {
            keys: Arc::new(RwLock::new(TicketKeys::random()?)),
            callback: None,
        })
    }

    pub(crate) fn keys(&self) -> TicketKeys {
        self.keys.read().clone()
    }

    /// Replaces the keys. Sessions created earlier see the change.
    pub(crate) fn set_keys(&self, keys: TicketKeys) {
        *self.keys.write() = keys;
    }

    pub(crate) fn set_callback(&mut self, callback: Arc<TicketKeyCallback>) {
        self.callback = Some(callback);
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let keys = self
            .callback
            .as_ref()
            .and_then(|callback| callback(None))
            .unwrap_or_else(|| self.keys());
        keys.seal(plain)
    }

    fn decrypt(&self, ticket: &[u8]) -> Option<Vec<u8>> {
        if ticket.len() < NAME_LEN + IV_LEN + 16 + MAC_LEN {
            return None;
        }
        let mut name = [0; NAME_LEN];
        name.copy_from_slice(&ticket[..NAME_LEN]);

        let keys = match &self.callback {
            Some(callback) => callback(Some(&name))?,
            None => {
                let keys = self.keys();
                if keys.name != name {
                    trace!("ticket key name not recognized");
                    return None;
                }
                keys
            }
        };
        keys.open(ticket)
    }
}

/// The ticket producer handed to one server session.
///
/// Remembers the last ticket it issued and whether a presented ticket
/// decrypted, which is how the session learns it was resumed.
pub(crate) struct SessionTicketer {
    ticketer: Ticketer,
    lifetime: u32,
    enabled: bool,
    last_issued: Mutex<Option<Vec<u8>>>,
    decrypted: AtomicBool,
}

impl SessionTicketer {
    pub(crate) fn new(ticketer: Ticketer, lifetime: u32, enabled: bool) -> Self {
        Self {
            ticketer,
            lifetime,
            enabled,
            last_issued: Mutex::new(None),
            decrypted: AtomicBool::new(false),
        }
    }

    pub(crate) fn last_issued(&self) -> Option<Vec<u8>> {
        self.last_issued.lock().clone()
    }

    pub(crate) fn decrypted(&self) -> bool {
        self.decrypted.load(Ordering::Relaxed)
    }
}

impl ProducesTickets for SessionTicketer {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn lifetime(&self) -> u32 {
        self.lifetime
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let ticket = self.ticketer.encrypt(plain)?;
        *self.last_issued.lock() = Some(ticket.clone());
        Some(ticket)
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        let plain = self.ticketer.decrypt(cipher);
        if plain.is_some() {
            self.decrypted.store(true, Ordering::Relaxed);
        }
        plain
    }
}
