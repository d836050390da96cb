use crate::{probe::ProbeError, tls::TlsState};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    Registry, opts, register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
};
use std::sync::LazyLock;

/// Process-wide registry served on `/metrics`
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

trait ResultExt<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                eprintln!("failed to initialize metric ({context}): {err}");
                std::process::exit(1);
            }
        }
    }
}

pub static PROBES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "tdscert_probes_total",
            "Total probes by result (success or error kind)"
        ),
        &["result"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static PROBE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        HistogramOpts::new(
            "tdscert_probe_duration_seconds",
            "Probe duration in seconds (dial, TLS handshake and request)"
        ),
        &["result"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

/// Label used for a probe outcome in `tdscert_probes_total`
#[must_use]
pub fn result_label(outcome: &Result<TlsState, ProbeError>) -> &'static str {
    match outcome {
        Ok(_) => "success",
        Err(err) => err.kind(),
    }
}

/// Account one probe in the process registry
pub fn observe_probe(outcome: &Result<TlsState, ProbeError>, seconds: f64) {
    let label = result_label(outcome);
    PROBES_TOTAL.with_label_values(&[label]).inc();
    PROBE_DURATION.with_label_values(&[label]).observe(seconds);
}

/// Build a registry holding the metrics of a single probe.
///
/// A fresh registry per request keeps label sets of previous targets out of
/// the response.
///
/// # Errors
///
/// Returns an error if a metric cannot be created or registered
#[allow(clippy::cast_precision_loss)]
pub fn probe_registry(
    outcome: &Result<TlsState, ProbeError>,
    seconds: f64,
) -> Result<Registry, prometheus::Error> {
    let registry = Registry::new();

    let success = IntGauge::new("tdscert_probe_success", "1 if TLS was established, 0 otherwise")?;
    let duration = Gauge::new(
        "tdscert_probe_runtime_seconds",
        "Duration of this probe in seconds",
    )?;
    registry.register(Box::new(success.clone()))?;
    registry.register(Box::new(duration.clone()))?;
    duration.set(seconds);

    let Ok(state) = outcome else {
        success.set(0);
        return Ok(registry);
    };
    success.set(1);

    let tls_info = IntGaugeVec::new(
        opts!(
            "tdscert_tls_info",
            "Negotiated TLS parameters (value is always 1)"
        ),
        &["version", "cipher", "server_name"],
    )?;
    let not_before = GaugeVec::new(
        opts!(
            "tdscert_cert_not_before",
            "NotBefore of each peer certificate, unix seconds"
        ),
        &["serial_no", "issuer_cn", "cn", "dnsnames"],
    )?;
    let not_after = GaugeVec::new(
        opts!(
            "tdscert_cert_not_after",
            "NotAfter of each peer certificate, unix seconds"
        ),
        &["serial_no", "issuer_cn", "cn", "dnsnames"],
    )?;
    let expiry_days = IntGaugeVec::new(
        opts!(
            "tdscert_cert_expiry_days",
            "Days until certificate expiration (negative if expired)"
        ),
        &["serial_no", "cn"],
    )?;
    registry.register(Box::new(tls_info.clone()))?;
    registry.register(Box::new(not_before.clone()))?;
    registry.register(Box::new(not_after.clone()))?;
    registry.register(Box::new(expiry_days.clone()))?;

    tls_info
        .with_label_values(&[
            state.version.as_str(),
            state.cipher.as_str(),
            state.server_name.as_str(),
        ])
        .set(1);

    // an unparsable chain still reports the handshake
    let certificates = match state.certificates() {
        Ok(certificates) => certificates,
        Err(e) => {
            eprintln!("{e:#}");
            Vec::new()
        }
    };

    for cert in &certificates {
        let cn = cert.common_name.as_deref().unwrap_or_default();
        let issuer_cn = cert.issuer_common_name.as_deref().unwrap_or_default();
        let dns_names = format!(",{},", cert.dns_names.join(","));
        let labels = [cert.serial.as_str(), issuer_cn, cn, dns_names.as_str()];

        not_before
            .with_label_values(&labels)
            .set(cert.not_before as f64);
        not_after
            .with_label_values(&labels)
            .set(cert.not_after as f64);
        expiry_days
            .with_label_values(&[cert.serial.as_str(), cn])
            .set(cert.expiry_days);
    }

    Ok(registry)
}

/// Encode and return metrics for HTTP export
///
/// # Errors
///
/// Returns an error if metrics encoding fails
pub fn encode_metrics(registry: &Registry) -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();

    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| format!("could not encode custom metrics: {e}"))?;

    Ok(buffer)
}
