use std::{net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    buffer::DEFAULT_DELIMITER,
    error::{Result, SocketError},
    utils::{validate_host, validate_remote_port},
};

pub const DEFAULT_READ_CHUNK_SIZE: usize = 8192;
pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1";

/// Settings for the secure transport.
///
/// Field names follow the camelCase keys applications use in their config
/// files (`verifyPeer`, `allowSelfSigned`, `certFile`, `passphrase`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecureConfig {
    pub verify_peer: bool,
    pub allow_self_signed: bool,
    pub cert_file: Option<PathBuf>,
    pub passphrase: String,
}

impl Default for SecureConfig {
    fn default() -> Self {
        Self {
            verify_peer: false,
            allow_self_signed: true,
            cert_file: None,
            passphrase: String::new(),
        }
    }
}

impl SecureConfig {
    pub fn with_cert_file(cert_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: Some(cert_file.into()),
            ..Self::default()
        }
    }

    /// The certificate must be configured and present on disk.
    pub fn validate(&self) -> Result<()> {
        let Some(path) = &self.cert_file else {
            return Err(SocketError::TransportInit(
                "secure transport requires a certificate file".into(),
            ));
        };
        if !path.is_file() {
            return Err(SocketError::TransportInit(format!(
                "certificate file {} not found",
                path.display()
            )));
        }
        Ok(())
    }
}

/// Transport a socket speaks. Accepted sockets inherit it from their
/// listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Transport {
    #[default]
    Plain,
    /// Marks the connection as one that must be encrypted and checks the
    /// certificate up front. This crate does not encrypt anything itself:
    /// bytes still travel as plain TCP unless a TLS layer wraps the stream,
    /// and a warning is logged whenever such a socket connects or listens.
    Secure(SecureConfig),
}

impl Transport {
    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::Secure(_))
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Transport::Plain => Ok(()),
            Transport::Secure(secure) => secure.validate(),
        }
    }
}

fn validate_buffers(read_chunk_size: usize, line_delimiter: &[u8]) -> Result<()> {
    if read_chunk_size == 0 {
        return Err(SocketError::Configuration(
            "read_chunk_size must be at least 1".into(),
        ));
    }
    if line_delimiter.is_empty() {
        return Err(SocketError::Configuration(
            "line_delimiter must not be empty".into(),
        ));
    }
    Ok(())
}

/// Configuration for an outbound client socket.
///
/// Use `SocketConfig::builder()` for construction; `build()` validates the
/// result.
///
/// ## Defaults
///
/// - address: `127.0.0.1`, port: none (must be set)
/// - transport: plain
/// - read_chunk_size: 8 KiB per read syscall
/// - line_delimiter: `"\n"`
/// - no_delay: enabled
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Remote host, an IP literal or a resolvable name
    pub address: String,
    /// Remote port, 1-65535
    pub port: u16,
    pub transport: Transport,
    /// Local address to bind before connecting
    pub bind_to: Option<SocketAddr>,
    /// Upper bound for a single read
    pub read_chunk_size: usize,
    pub line_delimiter: Vec<u8>,
    /// Enable TCP_NODELAY
    pub no_delay: bool,
}

impl SocketConfig {
    pub fn builder() -> SocketConfigBuilder {
        SocketConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        validate_host(&self.address)?;
        validate_remote_port(self.port)?;
        self.transport.validate()?;
        validate_buffers(self.read_chunk_size, &self.line_delimiter)
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_LISTEN_ADDRESS.to_string(),
            port: 0,
            transport: Transport::Plain,
            bind_to: None,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            line_delimiter: DEFAULT_DELIMITER.to_vec(),
            no_delay: true,
        }
    }
}

/// Builder for [`SocketConfig`]. Unset fields take the defaults.
#[derive(Default)]
pub struct SocketConfigBuilder {
    address: Option<String>,
    port: Option<u16>,
    transport: Option<Transport>,
    bind_to: Option<SocketAddr>,
    read_chunk_size: Option<usize>,
    line_delimiter: Option<Vec<u8>>,
    no_delay: Option<bool>,
}

impl SocketConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn bind_to(mut self, local: SocketAddr) -> Self {
        self.bind_to = Some(local);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = Some(size);
        self
    }

    pub fn line_delimiter(mut self, delimiter: impl Into<Vec<u8>>) -> Self {
        self.line_delimiter = Some(delimiter.into());
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn build(self) -> Result<SocketConfig> {
        let default = SocketConfig::default();
        let config = SocketConfig {
            address: self.address.unwrap_or(default.address),
            port: self.port.unwrap_or(default.port),
            transport: self.transport.unwrap_or(default.transport),
            bind_to: self.bind_to.or(default.bind_to),
            read_chunk_size: self.read_chunk_size.unwrap_or(default.read_chunk_size),
            line_delimiter: self.line_delimiter.unwrap_or(default.line_delimiter),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration for a listening socket. Port 0 asks the OS for a free
/// port; the assigned one is reported by `Listener::port()` after
/// `listen()`.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub address: String,
    pub port: u16,
    pub transport: Transport,
    /// Passed on to accepted sockets
    pub read_chunk_size: usize,
    /// Passed on to accepted sockets
    pub line_delimiter: Vec<u8>,
    /// Enable TCP_NODELAY on accepted sockets
    pub no_delay: bool,
}

impl ListenerConfig {
    pub fn builder() -> ListenerConfigBuilder {
        ListenerConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        validate_host(&self.address)?;
        self.transport.validate()?;
        validate_buffers(self.read_chunk_size, &self.line_delimiter)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_LISTEN_ADDRESS.to_string(),
            port: 0,
            transport: Transport::Plain,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            line_delimiter: DEFAULT_DELIMITER.to_vec(),
            no_delay: true,
        }
    }
}

#[derive(Default)]
pub struct ListenerConfigBuilder {
    address: Option<String>,
    port: Option<u16>,
    transport: Option<Transport>,
    read_chunk_size: Option<usize>,
    line_delimiter: Option<Vec<u8>>,
    no_delay: Option<bool>,
}

impl ListenerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = Some(size);
        self
    }

    pub fn line_delimiter(mut self, delimiter: impl Into<Vec<u8>>) -> Self {
        self.line_delimiter = Some(delimiter.into());
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.no_delay = Some(enabled);
        self
    }

    pub fn build(self) -> Result<ListenerConfig> {
        let default = ListenerConfig::default();
        let config = ListenerConfig {
            address: self.address.unwrap_or(default.address),
            port: self.port.unwrap_or(default.port),
            transport: self.transport.unwrap_or(default.transport),
            read_chunk_size: self.read_chunk_size.unwrap_or(default.read_chunk_size),
            line_delimiter: self.line_delimiter.unwrap_or(default.line_delimiter),
            no_delay: self.no_delay.unwrap_or(default.no_delay),
        };
        config.validate()?;
        Ok(config)
    }
}
