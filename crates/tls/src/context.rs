//! Identity and trust material shared by the sessions of one configuration.

use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
    sync::Arc,
};

use rustls::{
    client::{ClientConfig, Resumption},
    server::{ClientHello, ResolvesServerCert, ServerConfig},
    sign::{any_supported_type, CertifiedKey},
    Certificate, KeyLog, PrivateKey, SupportedProtocolVersion,
};
use wrap_crypto::{
    decorate, ByteSource, DiffieHellman, ExportOptions, KeyEncoding, KeyFormat, KeyInput,
    KeyObject, Lib,
};

#[cfg(feature = "logging")]
use crate::log::{debug, warn};
use crate::{
    ciphers::{CipherList, GroupList},
    roots::RootStore,
    session::{ClientSessionBridge, ServerSessionBridge},
    ticket::{SessionTicketer, TicketKeyCallback, TicketKeys, Ticketer, TICKET_KEYS_LEN},
    verify::{ClientVerifier, ServerVerifier, TrustAnchors, VerifyState},
    x509, ErrorKind, ProtocolVersion, Role, TlsError,
};

/// Default lifetime of issued session tickets, in seconds.
const DEFAULT_SESSION_TIMEOUT: u32 = 300;
const MAX_SID_CTX_LENGTH: usize = 32;
/// Tickets a TLS 1.3 server issues after each full handshake.
const TLS13_TICKETS: usize = 2;

/// Context option flags, using the classic option bit values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextOptions(u32);

impl ContextOptions {
    /// No options set.
    pub const NONE: ContextOptions = ContextOptions(0);
    /// Do not issue session tickets.
    pub const NO_TICKET: ContextOptions = ContextOptions(0x0000_4000);
    /// Prefer the server's cipher order over the client's.
    pub const CIPHER_SERVER_PREFERENCE: ContextOptions = ContextOptions(0x0040_0000);
    /// Disable TLS 1.0.
    pub const NO_TLSV1: ContextOptions = ContextOptions(0x0400_0000);
    /// Disable TLS 1.2.
    pub const NO_TLSV1_2: ContextOptions = ContextOptions(0x0800_0000);
    /// Disable TLS 1.1.
    pub const NO_TLSV1_1: ContextOptions = ContextOptions(0x1000_0000);
    /// Disable TLS 1.3.
    pub const NO_TLSV1_3: ContextOptions = ContextOptions(0x2000_0000);

    const ALL: u32 = Self::NO_TICKET.0
        | Self::CIPHER_SERVER_PREFERENCE.0
        | Self::NO_TLSV1.0
        | Self::NO_TLSV1_1.0
        | Self::NO_TLSV1_2.0
        | Self::NO_TLSV1_3.0;

    /// The raw bit mask.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Builds options from a bit mask, dropping unknown bits.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Whether every flag in `other` is set.
    pub fn contains(&self, other: ContextOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ContextOptions {
    type Output = ContextOptions;

    fn bitor(self, rhs: ContextOptions) -> ContextOptions {
        ContextOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for ContextOptions {
    fn bitor_assign(&mut self, rhs: ContextOptions) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextOptions({:#010x})", self.0)
    }
}

/// A classic protocol method name resolved to version bounds and a role.
///
/// Bounds left as `None` keep whatever the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Method {
    min: Option<ProtocolVersion>,
    max: Option<ProtocolVersion>,
    role: Option<Role>,
}

impl Method {
    /// Resolves a name such as `TLSv1_2_method` or `TLS_server_method`.
    pub fn parse(name: &str) -> Result<Self, TlsError> {
        let (base, role) = if let Some(base) = name.strip_suffix("_server_method") {
            (base, Some(Role::Server))
        } else if let Some(base) = name.strip_suffix("_client_method") {
            (base, Some(Role::Client))
        } else if let Some(base) = name.strip_suffix("_method") {
            (base, None)
        } else {
            return Err(TlsError::invalid_method(format!("Unknown method: {name}")));
        };

        let pin = |version| (Some(version), Some(version));
        let (min, max) = match base {
            "SSLv2" => return Err(TlsError::invalid_method("SSLv2 methods disabled")),
            "SSLv3" => return Err(TlsError::invalid_method("SSLv3 methods disabled")),
            "SSLv23" => (None, Some(ProtocolVersion::Tls1_2)),
            "TLS" => (Some(ProtocolVersion::MIN), Some(ProtocolVersion::MAX)),
            "TLSv1" => pin(ProtocolVersion::Tls1_0),
            "TLSv1_1" => pin(ProtocolVersion::Tls1_1),
            "TLSv1_2" => pin(ProtocolVersion::Tls1_2),
            _ => return Err(TlsError::invalid_method(format!("Unknown method: {name}"))),
        };

        Ok(Self { min, max, role })
    }

    /// Lower bound the method imposes.
    pub fn min(&self) -> Option<ProtocolVersion> {
        self.min
    }

    /// Upper bound the method imposes.
    pub fn max(&self) -> Option<ProtocolVersion> {
        self.max
    }

    /// The role the method restricts the context to.
    pub fn role(&self) -> Option<Role> {
        self.role
    }
}

/// The context's certificate, handed out for every ClientHello.
struct ContextCert(Option<Arc<CertifiedKey>>);

impl fmt::Debug for ContextCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCert")
            .field("chain", &self.0.as_ref().map(|key| key.cert.len()))
            .finish()
    }
}

impl ResolvesServerCert for ContextCert {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        self.0.clone()
    }
}

#[derive(Debug, Clone)]
struct ContextKey {
    object: KeyObject,
    der: PrivateKey,
}

/// Per-session pieces of a server config.
pub(crate) struct ServerHooks {
    pub(crate) alpn_protocols: Vec<Vec<u8>>,
    pub(crate) request_cert: bool,
    pub(crate) reject_unauthorized: bool,
    pub(crate) verify: VerifyState,
    pub(crate) sessions: Arc<ServerSessionBridge>,
    pub(crate) tickets: Arc<SessionTicketer>,
    pub(crate) key_log: Arc<dyn KeyLog>,
    pub(crate) max_fragment_size: Option<usize>,
    pub(crate) ocsp_response: Option<Vec<u8>>,
}

/// Per-session pieces of a client config.
pub(crate) struct ClientHooks {
    pub(crate) alpn_protocols: Vec<Vec<u8>>,
    pub(crate) check_hostname: bool,
    pub(crate) reject_unauthorized: bool,
    pub(crate) verify: VerifyState,
    pub(crate) sessions: Arc<ClientSessionBridge>,
    pub(crate) key_log: Arc<dyn KeyLog>,
    pub(crate) max_fragment_size: Option<usize>,
    pub(crate) enable_sni: bool,
}

/// Trust and identity material for one TLS configuration.
///
/// Configure it with the setters, then share it between sessions behind an
/// [`Arc`]. Ticket keys stay adjustable after sharing.
pub struct SecureContext {
    role: Option<Role>,
    min_version: ProtocolVersion,
    max_version: ProtocolVersion,
    options: ContextOptions,
    key: Option<ContextKey>,
    cert_chain: Vec<Certificate>,
    issuer: Option<Certificate>,
    roots: RootStore,
    ca_certs: Arc<Vec<Vec<u8>>>,
    crls: Arc<Vec<Vec<u8>>>,
    tls12_ciphers: CipherList,
    tls13_ciphers: CipherList,
    groups: GroupList,
    dh_params: Option<DiffieHellman>,
    ticketer: Ticketer,
    session_id_context: Vec<u8>,
    session_timeout: u32,
    closed: bool,
}

impl fmt::Debug for SecureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureContext")
            .field("role", &self.role)
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("options", &self.options)
            .field("has_key", &self.key.is_some())
            .field("cert_chain", &self.cert_chain.len())
            .field("roots", &self.roots.store().len())
            .field("crls", &self.crls.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SecureContext {
    /// Creates a context.
    ///
    /// `method` is a classic method name that narrows the bounds given by
    /// `min` and `max`. Missing bounds mean the lowest and highest version.
    pub fn init(
        method: Option<&str>,
        min: Option<ProtocolVersion>,
        max: Option<ProtocolVersion>,
    ) -> Result<Self, TlsError> {
        let mut min_version = min.unwrap_or(ProtocolVersion::MIN);
        let mut max_version = max.unwrap_or(ProtocolVersion::MAX);
        let mut role = None;

        if let Some(name) = method {
            let method = Method::parse(name)?;
            min_version = method.min.unwrap_or(min_version);
            max_version = method.max.unwrap_or(max_version);
            role = method.role;
        }

        debug!(?min_version, ?max_version, ?role, "creating secure context");
        Ok(Self {
            role,
            min_version,
            max_version,
            options: ContextOptions::NONE,
            key: None,
            cert_chain: Vec::new(),
            issuer: None,
            roots: RootStore::default(),
            ca_certs: Arc::default(),
            crls: Arc::default(),
            tls12_ciphers: CipherList::default_tls12(),
            tls13_ciphers: CipherList::default_tls13(),
            groups: GroupList::default(),
            dh_params: None,
            ticketer: Ticketer::new()?,
            session_id_context: Vec::new(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<(), TlsError> {
        if self.closed {
            return Err(TlsError::state("SecureContext is closed"));
        }
        Ok(())
    }

    /// The role the context was restricted to by its method.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Sets the private key from PEM or PKCS#8 DER.
    pub fn set_key(&mut self, key: &[u8], passphrase: Option<&str>) -> Result<(), TlsError> {
        self.check_open()?;
        let input = if key.starts_with(b"-----") {
            KeyInput::pem(key)
        } else {
            KeyInput::der(key, KeyEncoding::Pkcs8)
        };
        let input = match passphrase {
            Some(passphrase) => input.with_passphrase(ByteSource::from_string(passphrase)),
            None => input,
        };

        let key = load_key(KeyObject::create_private_key(&input)?)?;
        if let Some(leaf) = self.cert_chain.first() {
            check_key_matches(&key.object, leaf)?;
        }
        self.key = Some(key);
        Ok(())
    }

    /// Sets the certificate chain from PEM: the leaf first, then any
    /// intermediates.
    pub fn set_cert(&mut self, pem: &[u8]) -> Result<(), TlsError> {
        self.check_open()?;
        let chain = x509::parse_pem_chain(pem)?;
        if let Some(key) = &self.key {
            check_key_matches(&key.object, &chain[0])?;
        }

        self.issuer = self.find_issuer(&chain);
        self.cert_chain = chain;
        Ok(())
    }

    /// Looks for the leaf's issuer in the chain, then among trusted CAs.
    fn find_issuer(&self, chain: &[Certificate]) -> Option<Certificate> {
        let leaf = &chain[0].0;
        chain[1..]
            .iter()
            .map(|cert| &cert.0)
            .chain(self.ca_certs.iter())
            .find(|candidate| x509::is_issued_by(leaf, candidate))
            .map(|der| Certificate(der.clone()))
    }

    /// Trusts the CA certificates in a PEM bundle.
    pub fn add_ca_cert(&mut self, pem: &[u8]) -> Result<(), TlsError> {
        self.check_open()?;
        for cert in x509::parse_pem_chain(pem)? {
            self.trust(cert)?;
        }
        Ok(())
    }

    fn trust(&mut self, cert: Certificate) -> Result<(), TlsError> {
        self.roots
            .make_mut()
            .add(&cert)
            .map_err(|_| TlsError::ssl_config("X509_STORE_add_cert", "certificate verify failed"))?;
        Arc::make_mut(&mut self.ca_certs).push(cert.0);
        Ok(())
    }

    /// Adds the CRLs in a PEM bundle. Peers revoked by them fail
    /// verification.
    pub fn add_crl(&mut self, pem: &[u8]) -> Result<(), TlsError> {
        self.check_open()?;
        let crls = x509::parse_pem_crls(pem)?;
        Arc::make_mut(&mut self.crls).extend(crls);
        Ok(())
    }

    /// Trusts the process-wide default roots.
    pub fn add_root_certs(&mut self) -> Result<(), TlsError> {
        self.check_open()?;
        self.roots.add_default_roots();
        Ok(())
    }

    /// Sets the TLS 1.2 cipher list.
    pub fn set_ciphers(&mut self, ciphers: &str) -> Result<(), TlsError> {
        self.check_open()?;
        self.tls12_ciphers = CipherList::parse_tls12(ciphers)?;
        Ok(())
    }

    /// Sets the TLS 1.3 cipher suites.
    pub fn set_cipher_suites(&mut self, suites: &str) -> Result<(), TlsError> {
        self.check_open()?;
        self.tls13_ciphers = CipherList::parse_tls13(suites)?;
        Ok(())
    }

    /// Sets the key exchange groups, e.g. `auto` or `P-256:X25519`.
    pub fn set_ecdh_curve(&mut self, curve: &str) -> Result<(), TlsError> {
        self.check_open()?;
        self.groups = GroupList::parse(curve)?;
        Ok(())
    }

    /// Sets finite field DH parameters from PEM `DH PARAMETERS`.
    ///
    /// Returns a warning for parameters under 2048 bits. The parameters are
    /// kept for inspection only: the engine negotiates elliptic curve groups.
    pub fn set_dh_param(&mut self, pem: &[u8]) -> Result<Option<String>, TlsError> {
        self.check_open()?;
        let params = DiffieHellman::from_pem(pem)?;
        let bits = params.bits();
        if bits < 1024 {
            return Err(TlsError::invalid_arg("DH parameter is less than 1024 bits"));
        }

        let warning = (bits < 2048).then(|| {
            warn!(bits, "weak DH parameters");
            "DH parameter is less than 2048 bits".to_string()
        });
        self.dh_params = Some(params);
        Ok(warning)
    }

    /// Size of the configured DH prime in bits.
    pub fn dh_param_bits(&self) -> Option<u64> {
        self.dh_params.as_ref().map(DiffieHellman::bits)
    }

    /// Sets the lowest version. `None` means the lowest supported.
    pub fn set_min_proto(&mut self, version: Option<ProtocolVersion>) {
        self.min_version = version.unwrap_or(ProtocolVersion::MIN);
    }

    /// Sets the highest version. `None` means the highest supported.
    pub fn set_max_proto(&mut self, version: Option<ProtocolVersion>) {
        self.max_version = version.unwrap_or(ProtocolVersion::MAX);
    }

    /// The lowest version.
    pub fn min_proto(&self) -> ProtocolVersion {
        self.min_version
    }

    /// The highest version.
    pub fn max_proto(&self) -> ProtocolVersion {
        self.max_version
    }

    /// Loads key and certificate chain from a PKCS#12 container.
    ///
    /// Certificates after the leaf are trusted as CAs. Nothing changes
    /// unless the whole container loads.
    pub fn load_pkcs12(&mut self, pfx: &[u8], passphrase: Option<&str>) -> Result<(), TlsError> {
        self.check_open()?;
        let store = p12_keystore::KeyStore::from_pkcs12(pfx, passphrase.unwrap_or(""))
            .map_err(pkcs12_error)?;
        let (_, entry) = store.private_key_chain().ok_or_else(|| {
            TlsError::from_engine(
                ErrorKind::Config,
                decorate(Lib::Pkcs12, Some("PKCS12_parse"), "parse error"),
            )
        })?;

        let key = load_key(KeyObject::create_private_key(&KeyInput::der(
            entry.key(),
            KeyEncoding::Pkcs8,
        ))?)?;
        let chain: Vec<Certificate> = entry
            .chain()
            .iter()
            .map(|cert| Certificate(cert.as_der().to_vec()))
            .collect();
        let leaf = chain.first().ok_or_else(|| {
            TlsError::from_engine(
                ErrorKind::Config,
                decorate(Lib::Pkcs12, Some("PKCS12_parse"), "parse error"),
            )
        })?;
        check_key_matches(&key.object, leaf)?;

        let mut roots = self.roots.clone();
        let mut ca_certs = Vec::clone(&self.ca_certs);
        for cert in &chain[1..] {
            roots
                .make_mut()
                .add(cert)
                .map_err(|_| TlsError::ssl_config("X509_STORE_add_cert", "certificate verify failed"))?;
            ca_certs.push(cert.0.clone());
        }

        debug!(chain = chain.len(), "loaded PKCS#12 container");
        self.roots = roots;
        self.ca_certs = Arc::new(ca_certs);
        self.key = Some(key);
        self.issuer = self.find_issuer(&chain);
        self.cert_chain = chain;
        Ok(())
    }

    /// Sets the session id context. At most 32 bytes.
    pub fn set_session_id_context(&mut self, context: &[u8]) -> Result<(), TlsError> {
        self.check_open()?;
        if context.len() > MAX_SID_CTX_LENGTH {
            return Err(TlsError::ssl_config(
                "SSL_CTX_set_session_id_context",
                "ssl session id context too long",
            ));
        }
        self.session_id_context = context.to_vec();
        Ok(())
    }

    /// The session id context.
    pub fn session_id_context(&self) -> &[u8] {
        &self.session_id_context
    }

    /// Sets the lifetime of issued tickets in seconds.
    pub fn set_session_timeout(&mut self, seconds: u32) {
        self.session_timeout = seconds;
    }

    /// The lifetime of issued tickets in seconds.
    pub fn session_timeout(&self) -> u32 {
        self.session_timeout
    }

    /// Sets option flags. Flags already set stay set.
    pub fn set_options(&mut self, options: ContextOptions) {
        self.options |= options;
    }

    /// The option flags.
    pub fn options(&self) -> ContextOptions {
        self.options
    }

    /// Releases the key and certificate material. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!("closing secure context");
        self.closed = true;
        self.key = None;
        self.cert_chain = Vec::new();
        self.issuer = None;
        self.roots = RootStore::default();
        self.ca_certs = Arc::default();
        self.crls = Arc::default();
    }

    /// Whether [`SecureContext::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// DER of the leaf certificate.
    pub fn get_certificate(&self) -> Option<&[u8]> {
        self.cert_chain.first().map(|cert| cert.0.as_slice())
    }

    /// DER of the leaf's issuer, when it is known.
    pub fn get_issuer(&self) -> Option<&[u8]> {
        self.issuer.as_ref().map(|cert| cert.0.as_slice())
    }

    /// The current ticket keys in their 48-byte form.
    pub fn get_ticket_keys(&self) -> [u8; TICKET_KEYS_LEN] {
        self.ticket_keys().to_bytes()
    }

    /// The current ticket keys.
    pub fn ticket_keys(&self) -> TicketKeys {
        self.ticketer.keys()
    }

    /// Replaces the ticket keys. Sessions already sharing the context see
    /// the new keys.
    pub fn set_ticket_keys(&self, keys: &[u8]) -> Result<(), TlsError> {
        self.ticketer.set_keys(TicketKeys::from_bytes(keys)?);
        Ok(())
    }

    /// Installs an application hook that picks ticket keys.
    pub fn enable_ticket_key_callback<F>(&mut self, callback: F)
    where
        F: Fn(Option<&[u8; 16]>) -> Option<TicketKeys> + Send + Sync + 'static,
    {
        let callback: Arc<TicketKeyCallback> = Arc::new(callback);
        self.ticketer.set_callback(callback);
    }

    /// DER of the explicitly trusted CA certificates.
    pub(crate) fn ca_certs(&self) -> &[Vec<u8>] {
        &self.ca_certs
    }

    pub(crate) fn session_ticketer(&self) -> SessionTicketer {
        SessionTicketer::new(
            self.ticketer.clone(),
            self.session_timeout,
            !self.options.contains(ContextOptions::NO_TICKET),
        )
    }

    /// Checks that a session of `role` may use this context.
    pub(crate) fn check_role(&self, role: Role) -> Result<(), TlsError> {
        self.check_open()?;
        match self.role {
            Some(allowed) if allowed != role => Err(TlsError::ssl_config(
                "ssl_undefined_function",
                "called a function you should not call",
            )),
            _ => Ok(()),
        }
    }

    fn engine_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
        let versions: Vec<_> = ProtocolVersion::all()
            .iter()
            .filter(|version| (self.min_version..=self.max_version).contains(*version))
            .filter(|version| !self.options.contains(version.disable_flag()))
            .filter_map(ProtocolVersion::engine_version)
            .collect();
        if versions.is_empty() {
            return Err(TlsError::ssl_config("tls_setup_handshake", "no protocols available"));
        }
        Ok(versions)
    }

    fn engine_suites(&self) -> Vec<rustls::SupportedCipherSuite> {
        let mut suites = self.tls13_ciphers.engine_suites();
        suites.extend(self.tls12_ciphers.engine_suites());
        suites
    }

    fn trust_anchors(&self) -> TrustAnchors {
        TrustAnchors {
            roots: self.roots.snapshot(),
            ca_certs: Arc::clone(&self.ca_certs),
            crls: Arc::clone(&self.crls),
        }
    }

    fn certified_key(&self, ocsp: Option<Vec<u8>>) -> Result<Option<Arc<CertifiedKey>>, TlsError> {
        let key = match (&self.key, self.cert_chain.is_empty()) {
            (Some(key), false) => key,
            _ => return Ok(None),
        };
        let signing_key = any_supported_type(&key.der)
            .map_err(|_| TlsError::ssl_config("SSL_CTX_use_PrivateKey", "unknown key type"))?;
        let mut certified = CertifiedKey::new(self.cert_chain.clone(), signing_key);
        certified.ocsp = ocsp;
        Ok(Some(Arc::new(certified)))
    }

    /// Builds the engine config for one server session.
    pub(crate) fn server_config(&self, hooks: &ServerHooks) -> Result<Arc<ServerConfig>, TlsError> {
        self.check_role(Role::Server)?;
        let verifier = ClientVerifier::new(
            self.trust_anchors(),
            hooks.request_cert,
            hooks.reject_unauthorized,
            hooks.verify.clone(),
        );

        let mut config = ServerConfig::builder()
            .with_cipher_suites(&self.engine_suites())
            .with_kx_groups(&self.groups.engine_groups())
            .with_protocol_versions(&self.engine_versions()?)
            .map_err(|_| TlsError::ssl_config("ssl_cipher_list_to_bytes", "no ciphers available"))?
            .with_client_cert_verifier(Arc::new(verifier))
            .with_cert_resolver(Arc::new(ContextCert(
                self.certified_key(hooks.ocsp_response.clone())?,
            )));

        config.ignore_client_order = self
            .options
            .contains(ContextOptions::CIPHER_SERVER_PREFERENCE);
        config.session_storage = hooks.sessions.clone();
        config.ticketer = hooks.tickets.clone();
        config.send_tls13_tickets = TLS13_TICKETS;
        config.alpn_protocols = hooks.alpn_protocols.clone();
        config.max_fragment_size = hooks.max_fragment_size;
        config.key_log = Arc::clone(&hooks.key_log);
        Ok(Arc::new(config))
    }

    /// Builds the engine config for one client session.
    pub(crate) fn client_config(&self, hooks: &ClientHooks) -> Result<Arc<ClientConfig>, TlsError> {
        self.check_role(Role::Client)?;
        let verifier = ServerVerifier::new(
            self.trust_anchors(),
            hooks.check_hostname,
            hooks.reject_unauthorized,
            hooks.verify.clone(),
        );

        let builder = ClientConfig::builder()
            .with_cipher_suites(&self.engine_suites())
            .with_kx_groups(&self.groups.engine_groups())
            .with_protocol_versions(&self.engine_versions()?)
            .map_err(|_| TlsError::ssl_config("ssl_cipher_list_to_bytes", "no ciphers available"))?
            .with_custom_certificate_verifier(Arc::new(verifier));

        let mut config = match &self.key {
            Some(key) if !self.cert_chain.is_empty() => builder
                .with_client_auth_cert(self.cert_chain.clone(), key.der.clone())
                .map_err(|_| TlsError::ssl_config("SSL_CTX_use_PrivateKey", "unknown key type"))?,
            _ => builder.with_no_client_auth(),
        };

        config.resumption = Resumption::store(hooks.sessions.clone());
        config.alpn_protocols = hooks.alpn_protocols.clone();
        config.max_fragment_size = hooks.max_fragment_size;
        config.enable_sni = hooks.enable_sni;
        config.key_log = Arc::clone(&hooks.key_log);
        Ok(Arc::new(config))
    }
}

fn load_key(object: KeyObject) -> Result<ContextKey, TlsError> {
    let der = object.export(&ExportOptions::new(KeyFormat::Der, KeyEncoding::Pkcs8))?;
    let der = PrivateKey(der);
    any_supported_type(&der)
        .map_err(|_| TlsError::ssl_config("SSL_CTX_use_PrivateKey", "unknown key type"))?;
    Ok(ContextKey { object, der })
}

fn check_key_matches(key: &KeyObject, leaf: &Certificate) -> Result<(), TlsError> {
    let spki = x509::spki_der(&leaf.0)?;
    let cert_key = KeyObject::create_public_key(&KeyInput::der(&spki, KeyEncoding::Spki))?;
    if !KeyObject::public_from(key)?.equals(&cert_key)? {
        return Err(TlsError::from_engine(
            ErrorKind::Config,
            decorate(Lib::X509, Some("X509_check_private_key"), "key values mismatch"),
        ));
    }
    Ok(())
}

fn pkcs12_error(err: p12_keystore::error::Error) -> TlsError {
    let engine = match err {
        p12_keystore::error::Error::MacError(_) => {
            decorate(Lib::Pkcs12, Some("PKCS12_parse"), "mac verify failure")
        }
        _ => decorate(Lib::Pkcs12, Some("d2i_PKCS12_bio"), "decode error"),
    };
    TlsError::from_engine(ErrorKind::Config, engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tlswrap_fixtures::{
        ALT_KEY_PEM, CA_CERT_DER, CA_CERT_PEM, CA_CRL_PEM, PASSPHRASE, SERVER_CERT_DER,
        SERVER_CERT_PEM, SERVER_KEY_ENCRYPTED_PEM, SERVER_KEY_PEM, SERVER_PKCS12,
    };

    #[rstest]
    #[case("TLS_method", ProtocolVersion::Tls1_0, ProtocolVersion::Tls1_3, None)]
    #[case("SSLv23_method", ProtocolVersion::Tls1_0, ProtocolVersion::Tls1_2, None)]
    #[case("TLSv1_method", ProtocolVersion::Tls1_0, ProtocolVersion::Tls1_0, None)]
    #[case("TLSv1_1_client_method", ProtocolVersion::Tls1_1, ProtocolVersion::Tls1_1, Some(Role::Client))]
    #[case("TLSv1_2_server_method", ProtocolVersion::Tls1_2, ProtocolVersion::Tls1_2, Some(Role::Server))]
    fn test_method_bounds(
        #[case] method: &str,
        #[case] min: ProtocolVersion,
        #[case] max: ProtocolVersion,
        #[case] role: Option<Role>,
    ) {
        let ctx = SecureContext::init(Some(method), None, None).unwrap();
        assert_eq!(ctx.min_proto(), min);
        assert_eq!(ctx.max_proto(), max);
        assert_eq!(ctx.role(), role);
    }

    #[rstest]
    #[case("SSLv2_method", "SSLv2 methods disabled")]
    #[case("SSLv3_server_method", "SSLv3 methods disabled")]
    #[case("DTLS_method", "Unknown method: DTLS_method")]
    #[case("TLSv1_3_method", "Unknown method: TLSv1_3_method")]
    #[case("bogus", "Unknown method: bogus")]
    fn test_rejected_methods(#[case] method: &str, #[case] msg: &str) {
        let err = SecureContext::init(Some(method), None, None).unwrap_err();
        assert_eq!(err.code(), "ERR_TLS_INVALID_PROTOCOL_METHOD");
        assert_eq!(err.msg(), msg);
    }

    #[test]
    fn test_sslv23_keeps_requested_min() {
        let ctx =
            SecureContext::init(Some("SSLv23_method"), Some(ProtocolVersion::Tls1_2), None).unwrap();
        assert_eq!(ctx.min_proto(), ProtocolVersion::Tls1_2);
        assert_eq!(ctx.max_proto(), ProtocolVersion::Tls1_2);
    }

    #[test]
    fn test_no_protocols_available() {
        let ctx = SecureContext::init(Some("TLSv1_method"), None, None).unwrap();
        let err = ctx.engine_versions().unwrap_err();
        assert_eq!(err.code(), "ERR_SSL_NO_PROTOCOLS_AVAILABLE");

        let mut ctx = SecureContext::init(None, None, None).unwrap();
        ctx.set_options(ContextOptions::NO_TLSV1_3);
        let versions = ctx.engine_versions().unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_2);
        ctx.set_options(ContextOptions::NO_TLSV1_2);
        assert!(ctx.engine_versions().is_err());
    }

    #[test]
    fn test_options() {
        let options = ContextOptions::NO_TICKET | ContextOptions::NO_TLSV1;
        assert!(options.contains(ContextOptions::NO_TICKET));
        assert!(!options.contains(ContextOptions::NO_TLSV1_3));
        assert_eq!(ContextOptions::from_bits_truncate(0xffff_ffff).bits(), 0x3c40_4000);
    }

    #[test]
    fn test_key_and_cert() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();
        ctx.add_ca_cert(CA_CERT_PEM).unwrap();
        ctx.set_key(SERVER_KEY_PEM, None).unwrap();
        ctx.set_cert(SERVER_CERT_PEM).unwrap();

        assert_eq!(ctx.get_certificate(), Some(SERVER_CERT_DER));
        assert_eq!(ctx.get_issuer(), Some(CA_CERT_DER));
    }

    #[test]
    fn test_key_mismatch() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();
        ctx.set_key(ALT_KEY_PEM, None).unwrap();
        let err = ctx.set_cert(SERVER_CERT_PEM).unwrap_err();
        assert_eq!(err.code(), "ERR_OSSL_X509_KEY_VALUES_MISMATCH");
        assert_eq!(ctx.get_certificate(), None);
    }

    #[test]
    fn test_encrypted_key() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();
        let err = ctx.set_key(SERVER_KEY_ENCRYPTED_PEM, None).unwrap_err();
        assert_eq!(err.code(), "ERR_MISSING_PASSPHRASE");

        ctx.set_key(SERVER_KEY_ENCRYPTED_PEM, Some(PASSPHRASE)).unwrap();
        ctx.set_cert(SERVER_CERT_PEM).unwrap();
    }

    #[test]
    fn test_pkcs12() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();
        let err = ctx.load_pkcs12(SERVER_PKCS12, Some("wrong")).unwrap_err();
        assert_eq!(err.code(), "ERR_OSSL_PKCS12_MAC_VERIFY_FAILURE");
        assert_eq!(err.reason(), Some("mac verify failure"));
        assert_eq!(ctx.get_certificate(), None);
        assert!(ctx.roots.store().is_empty());

        ctx.load_pkcs12(SERVER_PKCS12, Some(PASSPHRASE)).unwrap();
        assert_eq!(ctx.get_certificate(), Some(SERVER_CERT_DER));
        assert_eq!(ctx.get_issuer(), Some(CA_CERT_DER));
        assert_eq!(ctx.roots.store().len(), 1);
    }

    #[test]
    fn test_dh_param_sizes() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();

        let small = DiffieHellman::from_group("modp1").unwrap().to_pem().unwrap();
        let err = ctx.set_dh_param(small.as_bytes()).unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_ARG_VALUE");
        assert_eq!(err.msg(), "DH parameter is less than 1024 bits");

        let weak = DiffieHellman::from_group("modp2").unwrap().to_pem().unwrap();
        assert_eq!(
            ctx.set_dh_param(weak.as_bytes()).unwrap().as_deref(),
            Some("DH parameter is less than 2048 bits")
        );
        assert_eq!(ctx.dh_param_bits(), Some(1024));

        let strong = DiffieHellman::from_group("modp14").unwrap().to_pem().unwrap();
        assert_eq!(ctx.set_dh_param(strong.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_ticket_keys() {
        let ctx = SecureContext::init(None, None, None).unwrap();
        let err = ctx.set_ticket_keys(&[1; 32]).unwrap_err();
        assert_eq!(err.msg(), "Ticket keys length must be 48 bytes");

        ctx.set_ticket_keys(&[9; 48]).unwrap();
        assert_eq!(ctx.get_ticket_keys(), [9; 48]);
    }

    #[test]
    fn test_session_id_context_length() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();
        ctx.set_session_id_context(b"ctx").unwrap();
        assert_eq!(ctx.session_id_context(), b"ctx");
        let err = ctx.set_session_id_context(&[0; 33]).unwrap_err();
        assert_eq!(err.code(), "ERR_SSL_SSL_SESSION_ID_CONTEXT_TOO_LONG");
    }

    #[test]
    fn test_crl_and_close() {
        let mut ctx = SecureContext::init(None, None, None).unwrap();
        ctx.add_crl(CA_CRL_PEM).unwrap();
        assert!(ctx.add_crl(b"not a crl").is_err());
        assert_eq!(ctx.crls.len(), 1);

        ctx.close();
        ctx.close();
        assert!(ctx.is_closed());
        assert_eq!(ctx.set_ciphers("HIGH").unwrap_err().code(), "ERR_TLS_INVALID_STATE");
        assert!(ctx.check_role(Role::Server).is_err());
    }

    #[test]
    fn test_role_restriction() {
        let ctx = SecureContext::init(Some("TLS_server_method"), None, None).unwrap();
        assert!(ctx.check_role(Role::Server).is_ok());
        let err = ctx.check_role(Role::Client).unwrap_err();
        assert_eq!(err.code(), "ERR_SSL_CALLED_A_FUNCTION_YOU_SHOULD_NOT_CALL");
    }
}
