use crate::{
    cli::actions::Action,
    tls::{ModuleConfig, TlsVersion},
};
use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use std::{net::IpAddr, path::PathBuf, time::Duration};

fn tls_version(matches: &ArgMatches, id: &str) -> Result<Option<TlsVersion>> {
    matches
        .get_one::<String>(id)
        .map(|version| version.parse::<TlsVersion>().map_err(|e| anyhow!(e)))
        .transpose()
}

/// Build the TLS module from the shared flags
fn extract_module(matches: &ArgMatches) -> Result<ModuleConfig> {
    Ok(ModuleConfig {
        server_name: matches.get_one::<String>("server-name").cloned(),
        ca: matches.get_one::<String>("tls-ca").map(PathBuf::from),
        cert: matches.get_one::<String>("tls-cert").map(PathBuf::from),
        key: matches.get_one::<String>("tls-key").map(PathBuf::from),
        insecure_skip_verify: matches.get_flag("insecure-skip-verify"),
        min_version: tls_version(matches, "tls-min-version")?,
        max_version: tls_version(matches, "tls-max-version")?,
    })
}

fn extract_timeout(matches: &ArgMatches) -> Duration {
    Duration::from_secs(matches.get_one::<u64>("timeout").copied().unwrap_or(10))
}

/// Convert `ArgMatches` into typed Action enum with validation
///
/// # Errors
///
/// Returns an error if a required parameter is missing or invalid
pub fn dispatch(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("probe", sub)) => {
            let target = sub
                .get_one::<String>("target")
                .context("target is required")?
                .clone();

            Ok(Action::Probe {
                target,
                module: extract_module(sub)?,
                timeout: extract_timeout(sub),
            })
        }
        Some(("serve", sub)) => {
            // Extract and validate listen address
            let listen = sub
                .get_one::<String>("listen")
                .map(|addr| {
                    addr.parse::<IpAddr>()
                        .with_context(|| format!("Invalid IP address: {addr}"))
                })
                .transpose()?;

            let port = sub.get_one::<u16>("port").copied().unwrap_or(9219);

            Ok(Action::Serve {
                listen,
                port,
                module: extract_module(sub)?,
                timeout: extract_timeout(sub),
            })
        }
        Some((name, _)) => bail!("unknown command: {name}"),
        None => bail!("a command is required"),
    }
}
