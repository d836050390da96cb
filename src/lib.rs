//! Certificate probe for TLS negotiated inside the SQL Server (TDS) protocol
//!
//! The probe drives a real protocol exchange up to the point where the
//! driver upgrades its transport to TLS, captures the negotiated state from
//! inside that upgrade and reports it, whatever the server answers afterwards.
//!
//! ```rust,ignore
//! use tdscert::{probe::probe_tds, tls::ModuleConfig};
//!
//! let state = probe_tds("sql.example.com:1433", &ModuleConfig::default(), timeout).await?;
//! println!("{} {}", state.version, state.cipher);
//! ```

pub mod cli;
pub mod driver;
pub mod exporter;
pub mod metrics;
pub mod probe;
pub mod report;
pub mod target;
pub mod tls;
