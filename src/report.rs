use crate::{
    metrics::observe_probe,
    probe::{ProbeError, probe_tds},
    tls::{CertificateInfo, ModuleConfig, TlsState},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One probe, as logged on stdout
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub time: String,
    pub target: String,
    pub success: bool,
    pub runtime_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<CertificateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Report {
    /// Summarize a probe outcome
    #[must_use]
    pub fn new(target: &str, outcome: &Result<TlsState, ProbeError>) -> Self {
        let mut report = Self {
            time: Utc::now().to_rfc3339(),
            target: target.to_string(),
            success: outcome.is_ok(),
            ..Default::default()
        };

        match outcome {
            Ok(state) => {
                report.tls_version = Some(state.version.clone());
                report.tls_cipher = Some(state.cipher.clone());
                report.server_name = Some(state.server_name.clone());
                match state.certificates() {
                    Ok(certificates) => report.certificates = certificates,
                    Err(e) => report.error = Some(format!("{e:#}")),
                }
            }
            Err(e) => {
                report.error_kind = Some(e.kind().to_string());
                report.error = Some(e.to_string());
            }
        }

        report
    }

    /// Print the report as one JSON line
    pub fn log(&self) {
        match serde_json::to_string(self) {
            Ok(serialized) => println!("{serialized}"),
            Err(e) => eprintln!("could not serialize report: {e}"),
        }
    }
}

/// Probe `target`, record it in the process metrics and log the report.
///
/// Returns the outcome together with its duration in seconds.
pub async fn run(
    target: &str,
    module: &ModuleConfig,
    timeout: Duration,
) -> (Result<TlsState, ProbeError>, f64) {
    let start = Utc::now();
    let outcome = probe_tds(target, module, timeout).await;
    let runtime = Utc::now().signed_duration_since(start);

    let seconds = runtime.to_std().map_or(0.0, |elapsed| elapsed.as_secs_f64());
    observe_probe(&outcome, seconds);

    let mut report = Report::new(target, &outcome);
    report.time = start.to_rfc3339();
    report.runtime_ms = runtime.num_milliseconds();
    report.log();

    (outcome, seconds)
}
