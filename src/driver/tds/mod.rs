//! SQL Server driver (TDS 7.4)
//!
//! Only the part of the protocol the probe needs:
//!
//! ```text
//! TCP connect → PRELOGIN (cleartext) → TLS handshake inside PRELOGIN packets
//!             → LOGIN7 (encrypted) → SQL batch `SELECT 1`
//! ```
//!
//! The TLS handshake is delegated to the registered `TlsUpgrade`.

pub mod login;
pub mod packet;
pub mod prelogin;
pub mod token;
pub mod wrapper;

pub use wrapper::PreloginWrapper;

use super::{ConnectionParams, Connector, Driver, DriverError, TlsHints, TlsUpgrade};
use login::Login;
use packet::{HEADER_LEN, PACKET_SIZE, PacketType, read_message, write_message};
use prelogin::Encryption;
use std::{env, future::Future, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};

/// Longest host or application name LOGIN7 accepts, in UTF-16 units
const MAX_NAME_UNITS: usize = 128;

/// Trivial request issued after login
const PING_SQL: &str = "SELECT 1";

/// Driver for Microsoft SQL Server and compatible TDS servers
#[derive(Debug, Clone, Copy, Default)]
pub struct TdsDriver;

impl Driver for TdsDriver {
    type Handle<U: TlsUpgrade> = TdsConnector<U>;

    fn connector<U: TlsUpgrade>(
        &self,
        params: ConnectionParams,
        upgrade: U,
    ) -> Result<TdsConnector<U>, DriverError> {
        validate(&params)?;
        Ok(TdsConnector { params, upgrade })
    }
}

fn validate(params: &ConnectionParams) -> Result<(), DriverError> {
    if params.host.is_empty() {
        return Err(DriverError::Config("host must not be empty".to_string()));
    }
    if params.port == 0 {
        return Err(DriverError::Config("port must not be 0".to_string()));
    }
    if params.host.encode_utf16().count() > MAX_NAME_UNITS {
        return Err(DriverError::Config(format!(
            "host exceeds {MAX_NAME_UNITS} characters"
        )));
    }
    if params.app_name.is_empty() || params.app_name.encode_utf16().count() > MAX_NAME_UNITS {
        return Err(DriverError::Config(format!(
            "application name must be 1 to {MAX_NAME_UNITS} characters"
        )));
    }
    Ok(())
}

/// Connection handle returned by [`TdsDriver`]
///
/// Streams opened by `ping` live inside the call and are closed when it returns.
#[derive(Debug)]
pub struct TdsConnector<U> {
    params: ConnectionParams,
    upgrade: U,
}

impl<U> TdsConnector<U> {
    #[must_use]
    pub const fn params(&self) -> &ConnectionParams {
        &self.params
    }
}

impl<U: TlsUpgrade> Connector for TdsConnector<U> {
    async fn ping(&mut self) -> Result<(), DriverError> {
        with_deadline(self.params.connect_timeout, self.session()).await?
    }
}

impl<U: TlsUpgrade> TdsConnector<U> {
    async fn session(&self) -> Result<(), DriverError> {
        let connect = TcpStream::connect((self.params.host.as_str(), self.params.port));
        let mut tcp = with_deadline(self.params.dial_timeout, connect).await??;
        tcp.set_nodelay(true)?;

        let offer = if self.params.encrypt {
            Encryption::On
        } else {
            Encryption::NotSupported
        };
        write_message(&mut tcp, PacketType::PreLogin, &prelogin::encode(offer)).await?;

        let (ty, reply) = read_message(&mut tcp).await?;
        if ty != PacketType::TabularResult {
            return Err(DriverError::Protocol(format!(
                "unexpected {ty:?} packet in PRELOGIN response"
            )));
        }

        let negotiated = prelogin::decode_encryption(&reply)?;
        if !negotiated.upgrades() {
            if self.params.encrypt {
                return Err(DriverError::EncryptionNotSupported);
            }
            return self.login(&mut tcp).await;
        }

        let hints = TlsHints {
            max_fragment_size: Some(PACKET_SIZE - HEADER_LEN),
        };
        let mut tls = self
            .upgrade
            .upgrade(PreloginWrapper::new(tcp), hints)
            .await?;
        tls.get_mut().0.finish_handshake();

        self.login(&mut tls).await
    }

    async fn login<S>(&self, stream: &mut S) -> Result<(), DriverError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let login = Login {
            hostname: env::var("HOSTNAME").unwrap_or_default(),
            app_name: self.params.app_name.clone(),
            server_name: self.params.host.clone(),
            library: env!("CARGO_PKG_NAME").to_string(),
            ..Default::default()
        };
        write_message(stream, PacketType::Login7, &login.encode()).await?;

        let (_, reply) = read_message(stream).await?;
        let response = token::scan(&reply)?.into_result()?;
        if !response.login_ack {
            return Err(DriverError::Protocol(
                "login response has no LOGINACK".to_string(),
            ));
        }

        write_message(stream, PacketType::SqlBatch, &sql_batch(PING_SQL)).await?;
        let (_, reply) = read_message(stream).await?;
        token::scan(&reply)?.into_result()?;

        Ok(())
    }
}

async fn with_deadline<F: Future>(
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, DriverError> {
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| DriverError::Timeout(limit)),
        None => Ok(fut.await),
    }
}

/// SQL batch payload: `ALL_HEADERS` with a transaction descriptor, then the text
fn sql_batch(sql: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(22 + sql.len() * 2);
    out.extend_from_slice(&22u32.to_le_bytes()); // total ALL_HEADERS length
    out.extend_from_slice(&18u32.to_le_bytes()); // header length
    out.extend_from_slice(&2u16.to_le_bytes()); // transaction descriptor
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // outstanding requests
    out.extend(sql.encode_utf16().flat_map(u16::to_le_bytes));
    out
}
