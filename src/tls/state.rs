use anyhow::{Result, anyhow};
use chrono::Utc;
use rustls::{
    ClientConnection, ProtocolVersion,
    pki_types::{CertificateDer, ServerName},
};
use serde::{Deserialize, Serialize};
use x509_parser::{
    extensions::GeneralName,
    prelude::{FromDer, X509Certificate},
    x509::X509Name,
};

const SECONDS_PER_DAY: i64 = 86_400;

/// TLS connection state captured right after the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsState {
    /// Negotiated protocol version (e.g., "TLSv1.3")
    pub version: String,
    /// Negotiated cipher suite (e.g., `TLS13_AES_256_GCM_SHA384`)
    pub cipher: String,
    /// Name the certificate was verified against
    pub server_name: String,
    /// Peer chain as sent by the server, leaf first
    #[serde(skip)]
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

/// Fields of one certificate of the peer chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    pub issuer_common_name: Option<String>,
    /// Decimal serial number
    pub serial: String,
    pub dns_names: Vec<String>,
    /// Unix seconds
    pub not_before: i64,
    /// Unix seconds
    pub not_after: i64,
    /// Days until expiration (negative if expired)
    pub expiry_days: i64,
}

fn version_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{other:?}"),
    }
}

impl TlsState {
    /// Snapshot a client connection whose handshake has completed.
    ///
    /// Returns `None` while version or cipher suite are not negotiated yet.
    #[must_use]
    pub fn from_connection(conn: &ClientConnection, server_name: &ServerName<'_>) -> Option<Self> {
        let version = conn.protocol_version()?;
        let suite = conn.negotiated_cipher_suite()?;

        Some(Self {
            version: version_name(version),
            cipher: format!("{:?}", suite.suite()),
            server_name: server_name.to_str().into_owned(),
            peer_certificates: conn
                .peer_certificates()
                .map(<[CertificateDer<'static>]>::to_vec)
                .unwrap_or_default(),
        })
    }

    /// Parse the peer chain, leaf first
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate of the chain is not valid DER X.509
    pub fn certificates(&self) -> Result<Vec<CertificateInfo>> {
        self.peer_certificates
            .iter()
            .map(|der| CertificateInfo::from_der(der.as_ref()))
            .collect()
    }
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

impl CertificateInfo {
    /// Extract certificate fields from a DER-encoded certificate
    ///
    /// # Errors
    ///
    /// Returns an error if `der` is not a valid X.509 certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| anyhow!("failed to parse certificate: {e}"))?;

        let dns_names = cert
            .subject_alternative_name()
            .map_err(|e| anyhow!("invalid subjectAltName extension: {e}"))?
            .map(|san| {
                san.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some((*dns).to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            common_name: first_common_name(cert.subject()),
            issuer_common_name: first_common_name(cert.issuer()),
            serial: cert.serial.to_string(),
            dns_names,
            not_before,
            not_after,
            expiry_days: (not_after - Utc::now().timestamp()).div_euclid(SECONDS_PER_DAY),
        })
    }
}
