use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::GATEWAY_PORT;
use crate::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.hetzner.cloud/v1";

/// Everything one provisioning run needs, loaded before any network call.
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub hetzner: HetznerSettings,
    pub ssh: SshSettings,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone)]
pub struct HetznerSettings {
    pub api_token: String,
    pub api_url: String,
    pub ssh_key: String,
    pub firewall_id: Option<i64>,
    pub server_type: String,
    pub image: String,
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub user: String,
    pub private_key_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

/// Timing and policy knobs passed to the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub ip_poll: RetryPolicy,
    pub ssh_wait: RetryPolicy,
    pub health: RetryPolicy,
    pub health_timeout: Duration,
    pub service_settle: Duration,
    pub gateway_port: u16,
    pub lock_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ip_poll: RetryPolicy::fixed(30, Duration::from_secs(5)),
            ssh_wait: RetryPolicy::within(Duration::from_secs(300), Duration::from_secs(10)),
            health: RetryPolicy::fixed(12, Duration::from_secs(10)),
            health_timeout: Duration::from_secs(10),
            service_settle: Duration::from_secs(5),
            gateway_port: GATEWAY_PORT,
            lock_dir: None,
        }
    }
}

impl ProvisionConfig {
    /// Load from the process environment. The binary loads `.env` into it
    /// at startup.
    ///
    /// Required:
    /// - `HETZNER_API_TOKEN`
    /// - `SSH_KEY_ID` (id or name of a key registered with the project)
    ///
    /// Optional: `FIREWALL_ID`, `HETZNER_API_URL`, `HETZNER_SERVER_TYPE`,
    /// `HETZNER_IMAGE`, `HETZNER_LOCATION`, `SSH_USER`, `SSH_PRIVATE_KEY_FILE`,
    /// `PROVISION_LOCK_DIR` and the timing knobs read in [`Self::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| Error::MissingEnv(key.into()));

        let api_token = require("HETZNER_API_TOKEN")?;
        let ssh_key = require("SSH_KEY_ID")?;

        let hetzner = HetznerSettings {
            api_token,
            api_url: get("HETZNER_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.into()),
            ssh_key,
            firewall_id: parse_opt(&get, "FIREWALL_ID")?,
            server_type: get("HETZNER_SERVER_TYPE").unwrap_or_else(|| "cx22".into()),
            image: get("HETZNER_IMAGE").unwrap_or_else(|| "ubuntu-24.04".into()),
            location: get("HETZNER_LOCATION").unwrap_or_else(|| "fsn1".into()),
        };

        let ssh = SshSettings {
            user: get("SSH_USER").unwrap_or_else(|| "root".into()),
            private_key_file: get("SSH_PRIVATE_KEY_FILE").map(PathBuf::from),
            connect_timeout_secs: parse_or(&get, "SSH_CONNECT_TIMEOUT_SECS", 10)?,
        };

        let secs = Duration::from_secs;
        let orchestrator = OrchestratorConfig {
            ip_poll: RetryPolicy::fixed(
                parse_or(&get, "IP_POLL_ATTEMPTS", 30)?,
                secs(parse_or(&get, "IP_POLL_INTERVAL_SECS", 5)?),
            ),
            ssh_wait: RetryPolicy::within(
                secs(parse_or(&get, "SSH_MAX_WAIT_SECS", 300)?),
                secs(parse_or(&get, "SSH_RETRY_INTERVAL_SECS", 10)?),
            ),
            health: RetryPolicy::fixed(
                parse_or(&get, "HEALTH_ATTEMPTS", 12)?,
                secs(parse_or(&get, "HEALTH_INTERVAL_SECS", 10)?),
            ),
            health_timeout: secs(parse_or(&get, "HEALTH_TIMEOUT_SECS", 10)?),
            service_settle: secs(parse_or(&get, "SERVICE_SETTLE_SECS", 5)?),
            gateway_port: GATEWAY_PORT,
            lock_dir: get("PROVISION_LOCK_DIR").map(PathBuf::from),
        };

        if orchestrator.ip_poll.max_attempts == 0 || orchestrator.health.max_attempts == 0 {
            return Err(Error::InvalidConfig("attempt counts must be at least 1".into()));
        }

        Ok(Self {
            hetzner,
            ssh,
            orchestrator,
        })
    }
}

fn parse_opt<T, G>(get: &G, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| Error::InvalidConfig(format!("{key}={raw:?} is not valid")))
        })
        .transpose()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}
