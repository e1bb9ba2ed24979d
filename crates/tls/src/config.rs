use derive_builder::Builder;

/// Smallest record size accepted by [`WrapConfig::max_send_fragment`].
pub(crate) const MIN_SEND_FRAGMENT: usize = 512;
/// Largest record size accepted by [`WrapConfig::max_send_fragment`].
pub(crate) const MAX_SEND_FRAGMENT: usize = 16384;

/// Which end of the connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initiates the handshake.
    Client,
    /// Answers the handshake.
    Server,
}

impl Role {
    /// Whether this is the server role.
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Session-level options for a [`Wrap`](crate::Wrap).
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct WrapConfig {
    /// Client or server.
    role: Role,
    /// Host name to send as SNI and to check the server certificate against.
    /// Clients only.
    #[builder(setter(into, strip_option), default)]
    server_name: Option<String>,
    /// ALPN protocols in preference order.
    #[builder(default)]
    alpn_protocols: Vec<Vec<u8>>,
    /// Servers: request a client certificate.
    #[builder(default = "false")]
    request_cert: bool,
    /// Fail the handshake when the peer certificate does not verify.
    #[builder(default = "true")]
    reject_unauthorized: bool,
    /// Report new sessions through
    /// [`SessionHandler::on_new_session`](crate::SessionHandler::on_new_session).
    #[builder(default = "false")]
    enable_session_callbacks: bool,
    /// Report key material through
    /// [`SessionHandler::on_keylog`](crate::SessionHandler::on_keylog).
    #[builder(default = "false")]
    enable_keylog: bool,
    /// Servers: defer certificate selection to
    /// [`SessionHandler::on_cert_cb`](crate::SessionHandler::on_cert_cb).
    #[builder(default = "false")]
    enable_cert_cb: bool,
    /// Maximum plaintext bytes per record.
    #[builder(setter(strip_option), default)]
    max_send_fragment: Option<usize>,
    /// Limit on buffered cleartext in either direction.
    #[builder(setter(strip_option), default)]
    buffer_limit: Option<usize>,
}

impl WrapConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(Some(size)) = self.max_send_fragment {
            if !(MIN_SEND_FRAGMENT..=MAX_SEND_FRAGMENT).contains(&size) {
                return Err(format!(
                    "max_send_fragment must be between {MIN_SEND_FRAGMENT} and {MAX_SEND_FRAGMENT}, got {size}"
                ));
            }
        }
        if let (Some(Role::Server), Some(Some(_))) = (self.role, &self.server_name) {
            return Err("server_name is only valid for clients".to_string());
        }
        Ok(())
    }
}

impl WrapConfig {
    /// Creates a new builder.
    pub fn builder() -> WrapConfigBuilder {
        WrapConfigBuilder::default()
    }

    /// Shorthand for a client config with default options.
    pub fn client(server_name: impl Into<String>) -> Self {
        Self {
            server_name: Some(server_name.into()),
            ..Self::with_role(Role::Client)
        }
    }

    /// Shorthand for a server config with default options.
    pub fn server() -> Self {
        Self::with_role(Role::Server)
    }

    fn with_role(role: Role) -> Self {
        Self {
            role,
            server_name: None,
            alpn_protocols: Vec::new(),
            request_cert: false,
            reject_unauthorized: true,
            enable_session_callbacks: false,
            enable_keylog: false,
            enable_cert_cb: false,
            max_send_fragment: None,
            buffer_limit: None,
        }
    }

    /// Returns the role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the SNI host name.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Returns the ALPN protocols.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.alpn_protocols
    }

    /// Returns whether a client certificate is requested.
    pub fn request_cert(&self) -> bool {
        self.request_cert
    }

    /// Returns whether unverified peers are rejected.
    pub fn reject_unauthorized(&self) -> bool {
        self.reject_unauthorized
    }

    /// Returns whether session callbacks are enabled.
    pub fn enable_session_callbacks(&self) -> bool {
        self.enable_session_callbacks
    }

    /// Returns whether key logging is enabled.
    pub fn enable_keylog(&self) -> bool {
        self.enable_keylog
    }

    /// Returns whether certificate selection is deferred.
    pub fn enable_cert_cb(&self) -> bool {
        self.enable_cert_cb
    }

    /// Returns the maximum record size.
    pub fn max_send_fragment(&self) -> Option<usize> {
        self.max_send_fragment
    }

    /// Returns the buffer limit.
    pub fn buffer_limit(&self) -> Option<usize> {
        self.buffer_limit
    }

    pub(crate) fn set_server_name(&mut self, name: String) {
        self.server_name = Some(name);
    }

    pub(crate) fn set_alpn_protocols(&mut self, protocols: Vec<Vec<u8>>) {
        self.alpn_protocols = protocols;
    }

    pub(crate) fn set_verify_mode(&mut self, request_cert: bool, reject_unauthorized: bool) {
        self.request_cert = request_cert;
        self.reject_unauthorized = reject_unauthorized;
    }

    pub(crate) fn set_session_callbacks(&mut self) {
        self.enable_session_callbacks = true;
    }

    pub(crate) fn set_keylog(&mut self) {
        self.enable_keylog = true;
    }

    pub(crate) fn set_cert_cb(&mut self) {
        self.enable_cert_cb = true;
    }

    pub(crate) fn set_max_send_fragment(&mut self, size: usize) {
        self.max_send_fragment = Some(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WrapConfig::builder().role(Role::Server).build().unwrap();
        assert!(config.reject_unauthorized());
        assert!(!config.request_cert());
        assert_eq!(config.server_name(), None);
        assert!(config.alpn_protocols().is_empty());
    }

    #[test]
    fn test_rejects_bad_fragment_size() {
        let err = WrapConfig::builder()
            .role(Role::Client)
            .max_send_fragment(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_send_fragment"));

        assert!(WrapConfig::builder()
            .role(Role::Client)
            .max_send_fragment(MAX_SEND_FRAGMENT)
            .build()
            .is_ok());
    }

    #[test]
    fn test_server_name_is_client_only() {
        assert!(WrapConfig::builder()
            .role(Role::Server)
            .server_name("example.com")
            .build()
            .is_err());
    }
}
