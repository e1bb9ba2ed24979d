use std::sync::Arc;

use once_cell::sync::Lazy;
use rustls::{OwnedTrustAnchor, RootCertStore};

#[cfg(feature = "logging")]
use crate::log::debug;

static DEFAULT_ROOT_STORE: Lazy<Arc<RootCertStore>> = Lazy::new(|| {
    let mut root_store = RootCertStore::empty();
    root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject.as_ref(),
            ta.subject_public_key_info.as_ref(),
            ta.name_constraints.as_ref().map(|nc| nc.as_ref()),
        )
    }));

    debug!(roots = root_store.len(), "built default root store");
    Arc::new(root_store)
});

/// The process-wide default root store.
///
/// Built once on first use and never mutated afterwards. Contexts that add
/// their own CAs copy it first.
pub fn default_root_store() -> Arc<RootCertStore> {
    Arc::clone(&DEFAULT_ROOT_STORE)
}

/// A context's trust store.
///
/// Starts empty. Once the default roots are attached the store shares the
/// process-wide instance, and the first mutation copies it.
#[derive(Debug, Clone)]
pub(crate) struct RootStore(Arc<RootCertStore>);

impl Default for RootStore {
    fn default() -> Self {
        Self(Arc::new(RootCertStore::empty()))
    }
}

impl RootStore {
    /// Returns a store that can be mutated without touching any shared copy.
    pub(crate) fn make_mut(&mut self) -> &mut RootCertStore {
        Arc::make_mut(&mut self.0)
    }

    /// Attaches the default roots.
    pub(crate) fn add_default_roots(&mut self) {
        if self.0.is_empty() {
            self.0 = default_root_store();
        } else if !self.is_default() {
            let defaults = default_root_store();
            self.make_mut().roots.extend(defaults.roots.iter().cloned());
        }
    }

    pub(crate) fn store(&self) -> &RootCertStore {
        &self.0
    }

    /// A snapshot for a per-session config.
    pub(crate) fn snapshot(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.0)
    }

    /// Whether this is still the process-wide default instance.
    pub(crate) fn is_default(&self) -> bool {
        Arc::ptr_eq(&self.0, &DEFAULT_ROOT_STORE)
    }
}
