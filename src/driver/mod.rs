//! Protocol driver seam
//!
//! The probe never talks to the wire itself. It hands a `ConnectionParams`
//! and a `TlsUpgrade` implementation to a `Driver`, then asks the resulting
//! `Connector` for one trivial request. The driver decides if and when the
//! transport is upgraded to TLS and calls back into `TlsUpgrade` at that
//! point.
//!
//! - `tds` - SQL Server (TDS 7.4) driver

pub mod tds;

use crate::target::ProbeTarget;
use std::{future::Future, io, time::Duration};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

/// Client identifier sent to the server (TDS application name)
pub const APP_NAME: &str = "tdscert";

/// Errors produced by a protocol driver
#[derive(Debug, Error)]
pub enum DriverError {
    /// Connection parameters rejected before any I/O
    #[error("invalid connection parameters: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed or unexpected protocol data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encryption was mandatory but the server refused it
    #[error("server does not support encryption")]
    EncryptionNotSupported,

    /// Error token returned by the server (e.g. 18456, login failed)
    #[error("server error {number} (state {state}, class {class}): {message}")]
    Server {
        number: i32,
        state: u8,
        class: u8,
        message: String,
    },
}

/// Protocol-level connection parameters, built fresh for every probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    /// Encryption is mandatory, never opportunistic
    pub encrypt: bool,
    /// Deadline for the TCP dial, `None` when the budget is below one second
    pub dial_timeout: Option<Duration>,
    /// Deadline for dial + negotiation + login
    pub connect_timeout: Option<Duration>,
    pub app_name: String,
}

impl ConnectionParams {
    /// Build parameters for `target` with both timeouts derived from `timeout`
    /// at whole-second granularity.
    #[must_use]
    pub fn new(target: &ProbeTarget, timeout: Duration) -> Self {
        let whole = Some(Duration::from_secs(timeout.as_secs())).filter(|d| !d.is_zero());
        Self {
            // always the resolved host; a server-name override only affects TLS
            host: target.host.clone(),
            port: target.port,
            encrypt: true,
            dial_timeout: whole,
            connect_timeout: whole,
            app_name: APP_NAME.to_string(),
        }
    }
}

/// TLS settings the driver requires for its own framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsHints {
    /// Upper bound for TLS record payloads, maps to `ClientConfig::max_fragment_size`
    pub max_fragment_size: Option<usize>,
}

/// Capability the driver calls at the exact point it upgrades its transport to TLS.
///
/// Implementations wrap `transport` in a TLS client session, complete the
/// handshake and hand the stream back; the driver keeps using it for the rest
/// of the protocol exchange.
pub trait TlsUpgrade: Send + Sync {
    /// Upgrade `transport` to TLS honouring the driver's `hints`.
    fn upgrade<S>(
        &self,
        transport: S,
        hints: TlsHints,
    ) -> impl Future<Output = io::Result<TlsStream<S>>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send;
}

/// A protocol driver able to build connectors
pub trait Driver: Send + Sync {
    type Handle<U: TlsUpgrade>: Connector;

    /// Validate `params` and register `upgrade` as the TLS-upgrade step.
    ///
    /// No I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Config` if the parameters are malformed
    fn connector<U: TlsUpgrade>(
        &self,
        params: ConnectionParams,
        upgrade: U,
    ) -> Result<Self::Handle<U>, DriverError>;
}

/// Driver-managed connection handle. Every resource it opens is released on drop.
pub trait Connector: Send {
    /// Open a connection and issue one trivial request over it
    fn ping(&mut self) -> impl Future<Output = Result<(), DriverError>> + Send;
}
