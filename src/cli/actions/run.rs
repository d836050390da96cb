use super::Action;
use crate::{exporter, exporter::Exporter, report};
use anyhow::Context;

/// Execute the action's business logic by delegating to the appropriate module
pub async fn execute(action: Action) -> anyhow::Result<()> {
    match action {
        Action::Probe {
            target,
            module,
            timeout,
        } => {
            let (outcome, _) = report::run(&target, &module, timeout).await;
            outcome
                .map(|_| ())
                .with_context(|| format!("probe of {target} failed"))
        }
        Action::Serve {
            listen,
            port,
            module,
            timeout,
        } => exporter::start(listen, port, Exporter { module, timeout }).await,
    }
}
