use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;
use crate::Result;

/// Any answer below 500 counts as alive. An unconfigured gateway may
/// legitimately answer with a 4xx.
pub fn is_alive(status: u16) -> bool {
    (200..500).contains(&status)
}

/// One liveness check against a URL.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn check(&self, url: &str) -> bool;
}

/// Check until alive or the budget is spent.
pub async fn poll(probe: &dyn HealthProbe, url: &str, policy: &RetryPolicy) -> bool {
    let outcome = policy
        .poll("health", |attempt| async move {
            if probe.check(url).await {
                info!(url, attempt, "gateway answered");
                Ok::<_, std::convert::Infallible>(Some(()))
            } else {
                debug!(url, attempt, "gateway not answering yet");
                Ok(None)
            }
        })
        .await;

    matches!(outcome, Ok(Some(())))
}

/// HTTP GET liveness probe with a per-attempt timeout.
pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| crate::Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                debug!(url, status, "health response");
                is_alive(status)
            }
            Err(e) => {
                debug!(url, error = %e, "health request failed");
                false
            }
        }
    }
}

/// Report of a one-shot health check, printed by the `health` command.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub server_ip: String,
    pub status: &'static str,
    pub gateway_reachable: bool,
}

/// Single check of a running instance's gateway.
pub async fn check_instance(probe: &dyn HealthProbe, ip: &str, port: u16) -> HealthReport {
    let url = format!("http://{ip}:{port}/");
    let reachable = probe.check(&url).await;
    if !reachable {
        warn!(ip, port, "instance gateway unreachable");
    }
    HealthReport {
        server_ip: ip.to_string(),
        status: if reachable { "healthy" } else { "unhealthy" },
        gateway_reachable: reachable,
    }
}
