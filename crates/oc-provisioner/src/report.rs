use std::io::Write;

use tracing::error;

use crate::orchestrator::Orchestrator;
use crate::types::ProvisionRequest;
use crate::{exit, Error};

/// Run the orchestrator and translate the outcome into stdout + exit code.
///
/// Only runs that produced a server write a JSON line; every failure is
/// logged and leaves `out` empty.
pub async fn execute<W: Write>(orchestrator: &Orchestrator, req: &ProvisionRequest, out: &mut W) -> i32 {
    match orchestrator.run(req).await {
        Ok(result) => {
            let line = match result.to_json() {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "failed to render result");
                    return exit::BOOTSTRAP;
                }
            };
            if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
                error!(error = %e, "failed to write result");
            }
            result.status.exit_code()
        }
        Err(e) => {
            report_failure(req.customer_id(), &e);
            e.exit_code()
        }
    }
}

fn report_failure(customer_id: &str, e: &Error) {
    let exit_code = e.exit_code();
    if let Error::CloudApi { status, .. } = e {
        error!(
            customer_id,
            exit_code,
            http_status = status,
            error = %e,
            "provisioning failed"
        );
    } else {
        error!(customer_id, exit_code, error = %e, "provisioning failed");
    }
    for line in e.remote_output() {
        error!(customer_id, "remote: {line}");
    }
}
