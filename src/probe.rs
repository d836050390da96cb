//! Handshake trigger and outcome classification
//!
//! A probe forces the driver through its TLS upgrade by issuing one trivial
//! request, then decides from two facts whether TLS was established:
//! was state captured, and did the request fail.
//!
//! | captured | request | outcome |
//! |----------|---------|---------|
//! | no       | failed  | `Connect` |
//! | yes      | any     | success, request error discarded |
//! | no       | ok      | `InvariantViolation(PlaintextSuccess)` |
//!
//! A rejected second capture wins over every row.

use crate::{
    driver::{ConnectionParams, Connector, Driver, DriverError, tds::TdsDriver},
    target::ProbeTarget,
    tls::{CaptureHook, CaptureSlot, ModuleConfig, TlsState, derive},
};
use std::time::Duration;
use thiserror::Error;
use tokio::time;

/// Why a probe produced no TLS state
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget {
        target: String,
        reason: &'static str,
    },

    #[error("TLS configuration error: {0:#}")]
    Config(anyhow::Error),

    #[error("driver rejected connection parameters: {0}")]
    DriverConfig(#[source] DriverError),

    /// Failed before TLS was established
    #[error("connection failed: {0}")]
    Connect(#[source] DriverError),

    #[error("invariant violation: {0}")]
    InvariantViolation(Invariant),
}

/// Driver behaviour the probe treats as a bug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Invariant {
    #[error("TLS state captured more than once")]
    DuplicateCapture,

    #[error("request succeeded without a TLS upgrade")]
    PlaintextSuccess,
}

impl ProbeError {
    /// Stable label for metrics and logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTarget { .. } => "invalid_target",
            Self::Config(_) => "config",
            Self::DriverConfig(_) => "driver_config",
            Self::Connect(DriverError::Timeout(_)) => "timeout",
            Self::Connect(_) => "connect",
            Self::InvariantViolation(Invariant::DuplicateCapture) => "duplicate_capture",
            Self::InvariantViolation(Invariant::PlaintextSuccess) => "plaintext_success",
        }
    }
}

/// Probe `address` (`host:port`) through `driver` and return the TLS state
/// the driver negotiated.
///
/// `timeout` bounds dial, negotiation and the request together. Every
/// resource the driver opened is released before this returns.
///
/// # Errors
///
/// See [`ProbeError`]. An error returned by the server after TLS was
/// established (e.g. a failed login) is not an error of the probe.
pub async fn probe<D: Driver>(
    driver: &D,
    address: &str,
    module: &ModuleConfig,
    timeout: Duration,
) -> Result<TlsState, ProbeError> {
    let target = ProbeTarget::parse(address)?;
    let tls = derive(module, &target.host)
        .await
        .map_err(ProbeError::Config)?;
    let params = ConnectionParams::new(&target, timeout);

    let slot = CaptureSlot::new();
    let outcome = {
        let mut connector = driver
            .connector(params, CaptureHook::new(&slot, &tls))
            .map_err(ProbeError::DriverConfig)?;
        time::timeout(timeout, connector.ping())
            .await
            .unwrap_or(Err(DriverError::Timeout(timeout)))
    };

    classify(slot, outcome)
}

/// Probe a SQL Server endpoint
///
/// # Errors
///
/// See [`probe`]
pub async fn probe_tds(
    address: &str,
    module: &ModuleConfig,
    timeout: Duration,
) -> Result<TlsState, ProbeError> {
    probe(&TdsDriver, address, module, timeout).await
}

/// Decide the probe outcome from the slot and the request result
///
/// # Errors
///
/// Returns `Connect` or `InvariantViolation` per the table in the module docs
pub fn classify(
    slot: CaptureSlot,
    request: Result<(), DriverError>,
) -> Result<TlsState, ProbeError> {
    let (captured, rejected) = slot.into_parts();
    if rejected {
        return Err(ProbeError::InvariantViolation(Invariant::DuplicateCapture));
    }

    match (captured, request) {
        (None, Err(err)) => Err(ProbeError::Connect(err)),
        (None, Ok(())) => Err(ProbeError::InvariantViolation(Invariant::PlaintextSuccess)),
        // TLS is up, whatever the server said afterwards
        (Some(state), _discarded) => Ok(state),
    }
}
