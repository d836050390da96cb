#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rcgen::CertifiedKey;
use rustls::{
    ServerConfig,
    server::Acceptor,
    crypto::ring::default_provider,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    version::TLS12,
};
use std::{
    io,
    io::Write,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tdscert::{
    driver::{ConnectionParams, Connector, Driver, DriverError, TlsHints, TlsUpgrade},
    tls::ModuleConfig,
};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, DuplexStream, duplex};
use tokio_rustls::LazyConfigAcceptor;

pub const SERVER_NAME: &str = "sql.internal";

/// Self-signed certificate for `names`
pub fn certified(names: &[&str]) -> CertifiedKey {
    rcgen::generate_simple_self_signed(
        names.iter().map(ToString::to_string).collect::<Vec<_>>(),
    )
    .unwrap()
}

/// rustls server configuration presenting `cert`
///
/// Session tickets are disabled: they would arrive after the client is done
/// with the handshake.
pub fn server_config(cert: &CertifiedKey) -> Arc<ServerConfig> {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    let mut config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .unwrap();
    config.send_tls13_tickets = 0;
    Arc::new(config)
}

/// Server configuration for a TDS endpoint: TLS inside PRELOGIN framing is
/// TLS 1.2 only
pub fn tds_server_config(cert: &CertifiedKey) -> Arc<ServerConfig> {
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_protocol_versions(&[&TLS12])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .unwrap();
    Arc::new(config)
}

/// Write `cert` as a PEM CA bundle
pub fn ca_file(cert: &CertifiedKey) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(cert.cert.pem().as_bytes()).unwrap();
    file
}

/// Module trusting only `ca`
pub fn trusting(ca: &NamedTempFile) -> ModuleConfig {
    ModuleConfig {
        ca: Some(ca.path().to_path_buf()),
        ..Default::default()
    }
}

pub fn leaf(cert: &CertifiedKey) -> CertificateDer<'static> {
    cert.cert.der().clone()
}

/// What the fake driver does when asked to ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Fails before any TLS upgrade (connection refused)
    Refuse,
    /// Succeeds without ever upgrading to TLS
    Plaintext,
    /// Upgrades, then the server rejects the login
    TlsThenReject,
    /// Upgrades, then the request succeeds
    TlsThenOk,
    /// Upgrades twice, ignoring the error of the second upgrade
    DoubleUpgrade,
    /// Never completes, no upgrade
    HangBeforeTls,
    /// Upgrades, then never completes
    HangAfterTls,
}

/// Counters shared between a test and its fake driver
#[derive(Debug, Default)]
pub struct Probes {
    pub connectors: AtomicUsize,
    pub upgrades: AtomicUsize,
    pub releases: AtomicUsize,
    pub params: Mutex<Vec<ConnectionParams>>,
    pub hints: Mutex<Vec<TlsHints>>,
    /// SNI seen by the in-memory TLS server
    pub sni: Mutex<Vec<Option<String>>>,
}

impl Probes {
    pub fn connectors(&self) -> usize {
        self.connectors.load(Ordering::SeqCst)
    }

    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Driver that follows a scripted `Behavior` against an in-memory TLS server
pub struct FakeDriver {
    pub behavior: Behavior,
    pub server: Arc<ServerConfig>,
    pub probes: Arc<Probes>,
    pub hints: TlsHints,
}

impl FakeDriver {
    pub fn new(behavior: Behavior, cert: &CertifiedKey) -> Self {
        Self {
            behavior,
            server: server_config(cert),
            probes: Arc::new(Probes::default()),
            hints: TlsHints {
                max_fragment_size: Some(4088),
            },
        }
    }
}

/// Counts its own drop
pub struct ReleaseGuard(Arc<Probes>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeConnector<U> {
    upgrade: U,
    behavior: Behavior,
    server: Arc<ServerConfig>,
    hints: TlsHints,
    probes: Arc<Probes>,
    _release: ReleaseGuard,
}

impl Driver for FakeDriver {
    type Handle<U: TlsUpgrade> = FakeConnector<U>;

    fn connector<U: TlsUpgrade>(
        &self,
        params: ConnectionParams,
        upgrade: U,
    ) -> Result<FakeConnector<U>, DriverError> {
        self.probes.connectors.fetch_add(1, Ordering::SeqCst);
        self.probes.params.lock().unwrap().push(params);

        Ok(FakeConnector {
            upgrade,
            behavior: self.behavior,
            server: self.server.clone(),
            hints: self.hints,
            probes: self.probes.clone(),
            _release: ReleaseGuard(self.probes.clone()),
        })
    }
}

fn login_failed() -> DriverError {
    DriverError::Server {
        number: 18456,
        state: 1,
        class: 14,
        message: "Login failed for user ''.".to_string(),
    }
}

impl<U: TlsUpgrade> FakeConnector<U> {
    /// Run the client handshake against an in-memory server
    async fn handshake(&self) -> io::Result<tokio_rustls::client::TlsStream<DuplexStream>> {
        self.probes.upgrades.fetch_add(1, Ordering::SeqCst);
        self.probes.hints.lock().unwrap().push(self.hints);

        let (client, server) = duplex(64 * 1024);
        let config = self.server.clone();
        let probes = self.probes.clone();
        tokio::spawn(async move {
            let Ok(start) = LazyConfigAcceptor::new(Acceptor::default(), server).await else {
                return;
            };
            // recorded at ClientHello, before the client can finish
            let sni = start.client_hello().server_name().map(str::to_string);
            probes.sni.lock().unwrap().push(sni);
            if let Ok(mut stream) = start.into_stream(config).await {
                // hold the connection until the client goes away
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
            }
        });

        self.upgrade.upgrade(client, self.hints).await
    }
}

impl<U: TlsUpgrade> Connector for FakeConnector<U> {
    async fn ping(&mut self) -> Result<(), DriverError> {
        match self.behavior {
            Behavior::Refuse => Err(DriverError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
            Behavior::Plaintext => Ok(()),
            Behavior::TlsThenReject => {
                let _tls = self.handshake().await?;
                Err(login_failed())
            }
            Behavior::TlsThenOk => {
                let _tls = self.handshake().await?;
                Ok(())
            }
            Behavior::DoubleUpgrade => {
                let _first = self.handshake().await?;
                // a buggy driver swallowing the hook's error
                let _ = self.handshake().await;
                Ok(())
            }
            Behavior::HangBeforeTls => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behavior::HangAfterTls => {
                let _tls = self.handshake().await?;
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
