use super::verifier::NoVerifier;
use anyhow::{Context, Result, anyhow, bail};
use rustls::{
    ClientConfig, RootCertStore, SupportedProtocolVersion,
    crypto::ring::default_provider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
    version::{TLS12, TLS13},
};
use rustls_pemfile::{certs, private_key};
use serde::Deserialize;
use std::{
    fmt,
    io::Cursor,
    net::IpAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::fs;

/// Declarative TLS settings of a probe module
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Name to verify the certificate against, defaults to the target host
    pub server_name: Option<String>,
    /// PEM bundle of trusted roots, defaults to the Mozilla root store
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// Accept any certificate chain; the certificate is still captured
    pub insecure_skip_verify: bool,
    pub min_version: Option<TlsVersion>,
    pub max_version: Option<TlsVersion>,
}

/// TLS protocol versions supported by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "TLS12")]
    Tls12,
    #[serde(rename = "TLS13")]
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tls12" | "tls1.2" | "tlsv1.2" | "1.2" => Ok(Self::Tls12),
            "tls13" | "tls1.3" | "tlsv1.3" | "1.3" => Ok(Self::Tls13),
            _ => Err(format!("Invalid TLS version: {s}")),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls12 => write!(f, "TLS12"),
            Self::Tls13 => write!(f, "TLS13"),
        }
    }
}

impl TlsVersion {
    const fn protocol(self) -> &'static SupportedProtocolVersion {
        match self {
            Self::Tls12 => &TLS12,
            Self::Tls13 => &TLS13,
        }
    }
}

impl ModuleConfig {
    fn protocol_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>> {
        let min = self.min_version.unwrap_or(TlsVersion::Tls12);
        let max = self.max_version.unwrap_or(TlsVersion::Tls13);
        if min > max {
            bail!("min TLS version {min} is above max TLS version {max}");
        }

        Ok([TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|version| (min..=max).contains(version))
            .map(TlsVersion::protocol)
            .collect())
    }
}

/// TLS parameters derived for one probe call
#[derive(Debug, Clone)]
pub struct TlsParams {
    pub client_config: Arc<ClientConfig>,
    /// Effective server name: the module override, else the target host
    pub server_name: ServerName<'static>,
}

/// Build the TLS client parameters for `host` from the module settings.
///
/// The module is left untouched; the server-name default only applies to the
/// returned parameters.
///
/// # Errors
///
/// Returns an error if a PEM file cannot be read or parsed, the version range
/// is empty, only one of `cert`/`key` is set, or the server name is invalid
pub async fn derive(module: &ModuleConfig, host: &str) -> Result<TlsParams> {
    let builder = ClientConfig::builder_with_provider(Arc::new(default_provider()))
        .with_protocol_versions(&module.protocol_versions()?)
        .context("unsupported TLS protocol versions")?;

    let builder = if module.insecure_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    } else {
        builder.with_root_certificates(root_store(module.ca.as_deref()).await?)
    };

    let config = match (&module.cert, &module.key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(load_cert_chain(cert).await?, load_private_key(key).await?)
            .context("invalid client certificate or key")?,
        (None, None) => builder.with_no_client_auth(),
        _ => bail!("client certificate and key must be set together"),
    };

    let name = module
        .server_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(host);

    Ok(TlsParams {
        client_config: Arc::new(config),
        server_name: server_name_from_host(name)?,
    })
}

async fn root_store(ca: Option<&Path>) -> Result<RootCertStore> {
    let Some(path) = ca else {
        return Ok(webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect());
    };

    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(load_cert_chain(path).await?);
    if added == 0 {
        bail!("no usable CA certificates in {}", path.display());
    }

    Ok(store)
}

async fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("failed to read certificate {}", path.display()))?;
    let mut reader = Cursor::new(data);
    let parsed = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("invalid certificate PEM: {e}"))?;

    if parsed.is_empty() {
        bail!("no certificates found in {}", path.display());
    }

    Ok(parsed)
}

async fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("failed to read private key {}", path.display()))?;

    let mut reader = Cursor::new(data);
    private_key(&mut reader)
        .map_err(|e| anyhow!("invalid private key PEM: {e}"))?
        .ok_or_else(|| anyhow!("no private key found in {}", path.display()))
}

/// Turn a host into a rustls server name, IP literals included
///
/// # Errors
///
/// Returns an error if `host` is neither an IP address nor a valid DNS name
pub fn server_name_from_host(host: &str) -> Result<ServerName<'static>> {
    host.parse::<IpAddr>().map_or_else(
        |_| {
            ServerName::try_from(host.to_string())
                .map_err(|_| anyhow!("invalid server name: {host}"))
        },
        |ip| Ok(ServerName::from(ip)),
    )
}
