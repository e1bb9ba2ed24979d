//! Protocol versions, cipher lists and key exchange groups, named the way
//! classic TLS configuration strings name them.

use std::fmt;

use rustls::{CipherSuite, NamedGroup, SupportedCipherSuite, SupportedKxGroup};

use crate::{ContextOptions, TlsError};

/// A TLS protocol version.
///
/// Ordered, so a range of versions is `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// TLS 1.0.
    Tls1_0,
    /// TLS 1.1.
    Tls1_1,
    /// TLS 1.2.
    Tls1_2,
    /// TLS 1.3.
    Tls1_3,
}

impl ProtocolVersion {
    /// Lowest version a context accepts.
    pub const MIN: ProtocolVersion = ProtocolVersion::Tls1_0;
    /// Highest version a context accepts.
    pub const MAX: ProtocolVersion = ProtocolVersion::Tls1_3;

    /// Version string, e.g. `TLSv1.2`.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolVersion::Tls1_0 => "TLSv1",
            ProtocolVersion::Tls1_1 => "TLSv1.1",
            ProtocolVersion::Tls1_2 => "TLSv1.2",
            ProtocolVersion::Tls1_3 => "TLSv1.3",
        }
    }

    /// Parses a version string as produced by [`ProtocolVersion::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "TLSv1" => Some(ProtocolVersion::Tls1_0),
            "TLSv1.1" => Some(ProtocolVersion::Tls1_1),
            "TLSv1.2" => Some(ProtocolVersion::Tls1_2),
            "TLSv1.3" => Some(ProtocolVersion::Tls1_3),
            _ => None,
        }
    }

    /// Bit used in the option mask to disable this version.
    pub(crate) fn disable_flag(&self) -> ContextOptions {
        match self {
            ProtocolVersion::Tls1_0 => ContextOptions::NO_TLSV1,
            ProtocolVersion::Tls1_1 => ContextOptions::NO_TLSV1_1,
            ProtocolVersion::Tls1_2 => ContextOptions::NO_TLSV1_2,
            ProtocolVersion::Tls1_3 => ContextOptions::NO_TLSV1_3,
        }
    }

    pub(crate) fn all() -> [ProtocolVersion; 4] {
        [
            ProtocolVersion::Tls1_0,
            ProtocolVersion::Tls1_1,
            ProtocolVersion::Tls1_2,
            ProtocolVersion::Tls1_3,
        ]
    }

    /// The engine's version, when the engine implements it.
    pub(crate) fn engine_version(&self) -> Option<&'static rustls::SupportedProtocolVersion> {
        match self {
            ProtocolVersion::Tls1_2 => Some(&rustls::version::TLS12),
            ProtocolVersion::Tls1_3 => Some(&rustls::version::TLS13),
            _ => None,
        }
    }

    pub(crate) fn from_engine(version: rustls::ProtocolVersion) -> Option<Self> {
        match version {
            rustls::ProtocolVersion::TLSv1_0 => Some(ProtocolVersion::Tls1_0),
            rustls::ProtocolVersion::TLSv1_1 => Some(ProtocolVersion::Tls1_1),
            rustls::ProtocolVersion::TLSv1_2 => Some(ProtocolVersion::Tls1_2),
            rustls::ProtocolVersion::TLSv1_3 => Some(ProtocolVersion::Tls1_3),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The cipher negotiated on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherInfo {
    /// Classic name, e.g. `ECDHE-RSA-AES128-GCM-SHA256`.
    pub name: &'static str,
    /// IANA name, e.g. `TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`.
    pub standard_name: &'static str,
    /// Lowest protocol version the cipher is defined for.
    pub version: &'static str,
}

struct CipherEntry {
    name: &'static str,
    standard_name: &'static str,
    suite: CipherSuite,
    tls13: bool,
    ecdsa: bool,
}

static CIPHERS: &[CipherEntry] = &[
    CipherEntry {
        name: "TLS_AES_256_GCM_SHA384",
        standard_name: "TLS_AES_256_GCM_SHA384",
        suite: CipherSuite::TLS13_AES_256_GCM_SHA384,
        tls13: true,
        ecdsa: false,
    },
    CipherEntry {
        name: "TLS_CHACHA20_POLY1305_SHA256",
        standard_name: "TLS_CHACHA20_POLY1305_SHA256",
        suite: CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
        tls13: true,
        ecdsa: false,
    },
    CipherEntry {
        name: "TLS_AES_128_GCM_SHA256",
        standard_name: "TLS_AES_128_GCM_SHA256",
        suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
        tls13: true,
        ecdsa: false,
    },
    CipherEntry {
        name: "ECDHE-RSA-AES128-GCM-SHA256",
        standard_name: "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        suite: CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        tls13: false,
        ecdsa: false,
    },
    CipherEntry {
        name: "ECDHE-ECDSA-AES128-GCM-SHA256",
        standard_name: "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        suite: CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        tls13: false,
        ecdsa: true,
    },
    CipherEntry {
        name: "ECDHE-RSA-AES256-GCM-SHA384",
        standard_name: "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        suite: CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        tls13: false,
        ecdsa: false,
    },
    CipherEntry {
        name: "ECDHE-ECDSA-AES256-GCM-SHA384",
        standard_name: "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        suite: CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        tls13: false,
        ecdsa: true,
    },
    CipherEntry {
        name: "ECDHE-RSA-CHACHA20-POLY1305",
        standard_name: "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        suite: CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        tls13: false,
        ecdsa: false,
    },
    CipherEntry {
        name: "ECDHE-ECDSA-CHACHA20-POLY1305",
        standard_name: "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        suite: CipherSuite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        tls13: false,
        ecdsa: true,
    },
];

/// Cipher suites in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CipherList(Vec<CipherSuite>);

impl CipherList {
    pub(crate) fn default_tls12() -> Self {
        Self(CIPHERS.iter().filter(|c| !c.tls13).map(|c| c.suite).collect())
    }

    pub(crate) fn default_tls13() -> Self {
        Self(CIPHERS.iter().filter(|c| c.tls13).map(|c| c.suite).collect())
    }

    /// Parses a TLS 1.2 cipher string such as `ECDHE-RSA-AES128-GCM-SHA256:!aNULL`.
    ///
    /// Unknown names are skipped. A string that selects nothing fails with
    /// `no cipher match`, except the empty string, which clears the list.
    pub(crate) fn parse_tls12(names: &str) -> Result<Self, TlsError> {
        let mut selected: Vec<CipherSuite> = Vec::new();
        let mut removed: Vec<CipherSuite> = Vec::new();

        for token in names.split([':', ',', ' ']).filter(|t| !t.is_empty()) {
            let (negate, name) = match token.as_bytes()[0] {
                b'!' | b'-' => (true, &token[1..]),
                b'+' => (false, &token[1..]),
                _ => (false, token),
            };
            if name.starts_with('@') {
                continue;
            }

            let matched: Vec<CipherSuite> = CIPHERS
                .iter()
                .filter(|c| !c.tls13 && tls12_alias_matches(name, c))
                .map(|c| c.suite)
                .collect();

            if negate {
                removed.extend(matched);
            } else {
                for suite in matched {
                    if !selected.contains(&suite) {
                        selected.push(suite);
                    }
                }
            }
        }

        selected.retain(|suite| !removed.contains(suite));
        if selected.is_empty() && !names.is_empty() {
            return Err(TlsError::ssl_config("SSL_CTX_set_cipher_list", "no cipher match"));
        }
        Ok(Self(selected))
    }

    /// Parses a TLS 1.3 suite string such as `TLS_AES_128_GCM_SHA256:TLS_AES_256_GCM_SHA384`.
    pub(crate) fn parse_tls13(names: &str) -> Result<Self, TlsError> {
        let mut selected = Vec::new();
        for name in names.split(':').filter(|t| !t.is_empty()) {
            match CIPHERS.iter().find(|c| c.tls13 && c.name == name) {
                Some(entry) if !selected.contains(&entry.suite) => selected.push(entry.suite),
                Some(_) => {}
                None => {
                    return Err(TlsError::ssl_config(
                        "ciphersuite_cb",
                        "no cipher match",
                    ))
                }
            }
        }
        Ok(Self(selected))
    }

    /// The engine suites for this list, in order.
    pub(crate) fn engine_suites(&self) -> Vec<SupportedCipherSuite> {
        self.0
            .iter()
            .filter_map(|id| {
                rustls::ALL_CIPHER_SUITES
                    .iter()
                    .find(|suite| suite.suite() == *id)
                    .copied()
            })
            .collect()
    }
}

fn tls12_alias_matches(name: &str, entry: &CipherEntry) -> bool {
    match name {
        "ALL" | "DEFAULT" | "HIGH" | "ECDHE" | "EECDH" | "kECDHE" | "AEAD" => true,
        "ECDHE-RSA" | "aRSA" | "RSA" => !entry.ecdsa,
        "ECDSA" | "aECDSA" => entry.ecdsa,
        "AESGCM" | "AES" => entry.name.contains("GCM"),
        "AES128" => entry.name.contains("AES128"),
        "AES256" => entry.name.contains("AES256"),
        "CHACHA20" => entry.name.contains("CHACHA20"),
        "SHA256" => entry.name.ends_with("SHA256") || entry.name.contains("CHACHA20"),
        "SHA384" => entry.name.ends_with("SHA384"),
        _ => entry.name == name || entry.standard_name == name,
    }
}

/// Looks up the classic and IANA names for a negotiated suite.
pub(crate) fn cipher_info(suite: SupportedCipherSuite) -> CipherInfo {
    let id = suite.suite();
    match CIPHERS.iter().find(|c| c.suite == id) {
        Some(entry) => CipherInfo {
            name: entry.name,
            standard_name: entry.standard_name,
            version: if entry.tls13 { "TLSv1.3" } else { "TLSv1.2" },
        },
        None => CipherInfo {
            name: id.as_str().unwrap_or("(NONE)"),
            standard_name: id.as_str().unwrap_or("(NONE)"),
            version: "TLSv1.2",
        },
    }
}

/// Key exchange groups in preference order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupList(Vec<NamedGroup>);

impl Default for GroupList {
    fn default() -> Self {
        Self(
            rustls::ALL_KX_GROUPS
                .iter()
                .map(|group| group.name)
                .collect(),
        )
    }
}

impl GroupList {
    /// Parses `auto` or a colon separated list such as `P-256:X25519`.
    pub(crate) fn parse(names: &str) -> Result<Self, TlsError> {
        if names == "auto" {
            return Ok(Self::default());
        }

        let mut groups = Vec::new();
        for name in names.split(':') {
            let group = group_from_name(name).ok_or_else(|| {
                TlsError::new(
                    crate::ErrorKind::Config,
                    "ERR_TLS_INVALID_ECDH_CURVE",
                    "Failed to set ECDH curve",
                )
            })?;
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        Ok(Self(groups))
    }

    pub(crate) fn engine_groups(&self) -> Vec<&'static SupportedKxGroup> {
        self.0
            .iter()
            .filter_map(|name| {
                rustls::ALL_KX_GROUPS
                    .iter()
                    .find(|group| group.name == *name)
                    .copied()
            })
            .collect()
    }
}

fn group_from_name(name: &str) -> Option<NamedGroup> {
    match name {
        "P-256" | "prime256v1" | "secp256r1" => Some(NamedGroup::secp256r1),
        "P-384" | "secp384r1" => Some(NamedGroup::secp384r1),
        "X25519" | "x25519" => Some(NamedGroup::X25519),
        _ => None,
    }
}
