//! TLS side of the probe
//!
//! - `config` - module settings and derivation of the rustls client parameters
//! - `capture` - the `TlsUpgrade` hook and its single-assignment slot
//! - `state` - captured connection state and certificate fields
//! - `verifier` - verifier used by `insecure_skip_verify`

pub mod capture;
pub mod config;
pub mod state;
pub mod verifier;

pub use capture::{CaptureHook, CaptureSlot};
pub use config::{ModuleConfig, TlsParams, TlsVersion, derive, server_name_from_host};
pub use state::{CertificateInfo, TlsState};
