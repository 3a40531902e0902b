use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bootstrap::Bootstrapper;
use crate::cloud::{CloudProvider, await_ip_assignment};
use crate::config::OrchestratorConfig;
use crate::health::{self, HealthProbe};
use crate::lock::CustomerLock;
use crate::ssh::{RemoteExecutor, await_reachable};
use crate::types::{
    ProvisionRequest, ProvisioningResult, ResultStatus, ServerRecord, ServerSpec, setup_url,
};
use crate::Result;

/// Stages of a provisioning run, in order. Each gates the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    ServerReady,
    SshReachable,
    Installed,
    Configured,
    HealthVerified,
    Reported,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServerReady => "server_ready",
            Self::SshReachable => "ssh_reachable",
            Self::Installed => "installed",
            Self::Configured => "configured",
            Self::HealthVerified => "health_verified",
            Self::Reported => "reported",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const UNHEALTHY_NOTE: &str = "Server and openclaw service were left running but the gateway did not answer \
     within the health budget. Inspect `journalctl -u openclaw` on the host, then retry provisioning \
     or destroy the server.";

/// Sequences one provisioning run for one customer.
///
/// There is no rollback: a server that fails after creation stays in place
/// for inspection.
pub struct Orchestrator {
    cloud: Arc<dyn CloudProvider>,
    executor: Arc<dyn RemoteExecutor>,
    probe: Arc<dyn HealthProbe>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        executor: Arc<dyn RemoteExecutor>,
        probe: Arc<dyn HealthProbe>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            cloud,
            executor,
            probe,
            config,
        }
    }

    /// Run every stage. `Err` means the run failed before the service was
    /// configured; an unhealthy service is still `Ok` with that status.
    pub async fn run(&self, req: &ProvisionRequest) -> Result<ProvisioningResult> {
        let customer_id = req.customer_id();
        let _lock = match &self.config.lock_dir {
            Some(dir) => Some(CustomerLock::acquire(dir, customer_id)?),
            None => None,
        };

        let (server, ip) = self.ensure_server(req).await?;
        info!(customer_id, stage = %Stage::ServerReady, server_id = server.id, ip = %ip, "server ready");

        await_reachable(&*self.executor, &ip, &self.config.ssh_wait).await?;
        info!(customer_id, stage = %Stage::SshReachable, ip = %ip, "host accepts ssh");

        let bootstrapper = Bootstrapper::new(self.executor.clone(), self.config.service_settle);
        bootstrapper.install(&ip).await?;
        info!(customer_id, stage = %Stage::Installed, "runtime installed");

        bootstrapper.configure(&ip, req.setup_password()).await?;
        info!(customer_id, stage = %Stage::Configured, "service configured");

        let url = format!("http://{ip}:{}/", self.config.gateway_port);
        let healthy = health::poll(&*self.probe, &url, &self.config.health).await;

        let (status, note) = if healthy {
            info!(customer_id, stage = %Stage::HealthVerified, "gateway answering");
            (ResultStatus::Success, None)
        } else {
            warn!(
                customer_id,
                server_id = server.id,
                attempts = self.config.health.max_attempts,
                "gateway never answered, leaving server in place"
            );
            (ResultStatus::Unhealthy, Some(UNHEALTHY_NOTE.to_string()))
        };

        let result = ProvisioningResult {
            server_id: server.id,
            setup_url: setup_url(&ip),
            server_ip: ip,
            server_name: server.name,
            setup_password: req.setup_password().to_string(),
            status,
            note,
        };
        info!(customer_id, stage = %Stage::Reported, status = ?result.status, "provisioning finished");
        Ok(result)
    }

    /// Find or create the customer's server and wait for its public IP.
    async fn ensure_server(&self, req: &ProvisionRequest) -> Result<(ServerRecord, String)> {
        let name = req.server_name();
        let server = match self.cloud.lookup_by_name(&name).await? {
            Some(existing) => {
                info!(server_id = existing.id, name = %name, "reusing existing server");
                existing
            }
            None => {
                info!(name = %name, "no existing server, creating");
                self.cloud
                    .create(&ServerSpec::for_customer(req.customer_id()))
                    .await?
            }
        };

        let ip = match server.ready_ip() {
            Some(ip) => ip.to_string(),
            None => await_ip_assignment(&*self.cloud, server.id, &self.config.ip_poll).await?,
        };
        Ok((server, ip))
    }
}
