//! Broker endpoint description: address, channel, credentials and TLS settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Default listener port of a queue manager
pub const DEFAULT_PORT: u16 = 1414;

/// One broker endpoint a connector may connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub channel: String,
    pub queue_manager: String,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsSettings>,
}

impl Endpoint {
    /// Create endpoint with host and port, using default channel and queue manager
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set server-connection channel
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Set queue manager name
    pub fn with_queue_manager(mut self, queue_manager: impl Into<String>) -> Self {
        self.queue_manager = queue_manager.into();
        self
    }

    /// Attach user credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach TLS settings
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Connection name in `host(port)` form
    pub fn connection_name(&self) -> String {
        format!("{}({})", self.host, self.port)
    }

    /// Copy of this endpoint with the password blanked out, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.credentials = self.credentials.as_ref().map(Credentials::redacted);
        copy
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            channel: "DEV.APP.SVRCONN".to_string(),
            queue_manager: "QM1".to_string(),
            credentials: None,
            tls: None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} on {}",
            self.queue_manager,
            self.channel,
            self.connection_name()
        )
    }
}

/// User credentials presented when connecting.
///
/// The password is wiped from memory on drop and never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    const REDACTED: &'static str = "[REDACTED]";

    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Get password (only for immediate use by a transport)
    pub fn expose_password(&self) -> &str {
        &self.password
    }

    fn redacted(&self) -> Self {
        Self::new(self.user.clone(), Self::REDACTED)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &Self::REDACTED)
            .finish()
    }
}

/// TLS configuration for an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Key repository location (without file extension)
    pub key_repository: String,
    /// Cipher specification negotiated on the channel
    pub cipher_spec: String,
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
