mod run;

use crate::tls::ModuleConfig;
use std::{net::IpAddr, time::Duration};

/// Action enum representing each possible command
#[derive(Debug)]
pub enum Action {
    /// Probe one target and report on stdout
    Probe {
        target: String,
        module: ModuleConfig,
        timeout: Duration,
    },
    /// Run the HTTP exporter
    Serve {
        listen: Option<IpAddr>,
        port: u16,
        module: ModuleConfig,
        timeout: Duration,
    },
}

impl Action {
    /// Execute the action
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails to execute
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
