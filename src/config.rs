//! Relay configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use collection_relay::RelayConfig;
//!
//! let config = RelayConfig::new()
//!     .with_port(9000)
//!     .with_heartbeat_interval(Duration::from_secs(15))
//!     .without_panel();
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::relay::DEFAULT_HEARTBEAT_INTERVAL;

// ============================================================================
// Constants
// ============================================================================

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address (all IPv4 interfaces, so a tablet on the LAN can
/// reach the relay).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default location of the control-panel page.
pub const DEFAULT_PANEL_PATH: &str = "panel/index.html";

// ============================================================================
// RelayConfig
// ============================================================================

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to listen on.
    pub bind_ip: IpAddr,

    /// Port to listen on (0 for a random port).
    pub port: u16,

    /// Interval between heartbeat pings on each connection.
    pub heartbeat_interval: Duration,

    /// Control-panel page served at `/`; `None` answers 404.
    pub panel_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_ip: DEFAULT_BIND_IP,
            port: DEFAULT_PORT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            panel_path: Some(PathBuf::from(DEFAULT_PANEL_PATH)),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the heartbeat interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the control-panel page.
    #[inline]
    #[must_use]
    pub fn with_panel(mut self, path: impl Into<PathBuf>) -> Self {
        self.panel_path = Some(path.into());
        self
    }

    /// Disables the control-panel page.
    #[inline]
    #[must_use]
    pub fn without_panel(mut self) -> Self {
        self.panel_path = None;
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl RelayConfig {
    /// Returns the socket address to bind.
    #[inline]
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the heartbeat interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat interval must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
