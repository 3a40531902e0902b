use async_trait::async_trait;
use hcloud::apis::configuration::Configuration;
use hcloud::apis::servers_api;
use hcloud::models;
use tracing::{debug, info};

use crate::config::HetznerSettings;
use crate::retry::RetryPolicy;
use crate::types::{ServerRecord, ServerSpec, ServerState};
use crate::{Error, Result};

/// Backend-agnostic view of the cloud control plane.
///
/// `lookup_by_name` followed by `create` is not atomic: two concurrent runs
/// for the same customer can both see no server and both create one.
#[async_trait]
pub trait CloudProvider: Send + Sync + 'static {
    /// First server whose name matches exactly, if any.
    async fn lookup_by_name(&self, name: &str) -> Result<Option<ServerRecord>>;

    /// Create and start a server.
    async fn create(&self, spec: &ServerSpec) -> Result<ServerRecord>;

    /// Current status and addresses of a server.
    async fn get(&self, id: i64) -> Result<ServerRecord>;
}

/// Poll until the server is running with a public IPv4 address.
pub async fn await_ip_assignment(
    cloud: &dyn CloudProvider,
    server_id: i64,
    policy: &RetryPolicy,
) -> Result<String> {
    let ip = policy
        .poll("ip assignment", |attempt| async move {
            let record = cloud.get(server_id).await?;
            debug!(server_id, attempt, state = ?record.state, ip = ?record.public_ip, "polled server");
            Ok::<_, Error>(record.ready_ip().map(str::to_string))
        })
        .await?;

    ip.ok_or(Error::ProvisioningTimeout {
        server_id,
        attempts: policy.max_attempts,
    })
}

/// Hetzner Cloud provider using the `hcloud` crate.
pub struct HetznerProvider {
    config: Configuration,
    settings: HetznerSettings,
}

impl HetznerProvider {
    pub fn new(settings: HetznerSettings) -> Self {
        let mut config = Configuration::new();
        config.base_path_mapping.insert(
            crate::config::DEFAULT_API_URL.to_string(),
            settings.api_url.trim_end_matches('/').to_string(),
        );
        config.bearer_access_token = Some(settings.api_token.clone());
        Self { config, settings }
    }

    fn parse_state(status: &models::server::Status) -> ServerState {
        match status {
            models::server::Status::Running => ServerState::Running,
            models::server::Status::Initializing => ServerState::Initializing,
            models::server::Status::Starting
            | models::server::Status::Migrating
            | models::server::Status::Rebuilding => ServerState::Starting,
            models::server::Status::Off | models::server::Status::Stopping => ServerState::Stopped,
            models::server::Status::Deleting => ServerState::Deleting,
            _ => ServerState::Unknown,
        }
    }

    fn record(server: &models::Server) -> ServerRecord {
        ServerRecord {
            name: server.name.clone(),
            id: server.id,
            public_ip: server.public_net.ipv4.as_ref().map(|v4| v4.ip.clone()),
            state: Self::parse_state(&server.status),
        }
    }

    fn create_request(&self, spec: &ServerSpec) -> models::CreateServerRequest {
        let firewalls = self.settings.firewall_id.map(|fw_id| {
            vec![models::CreateServerRequestFirewalls { firewall: fw_id }]
        });

        models::CreateServerRequest {
            name: spec.name.clone(),
            server_type: self.settings.server_type.clone(),
            image: self.settings.image.clone(),
            location: Some(self.settings.location.clone()),
            user_data: None,
            networks: None,
            firewalls,
            ssh_keys: Some(vec![self.settings.ssh_key.clone()]),
            volumes: None,
            start_after_create: Some(true),
            automount: None,
            datacenter: None,
            labels: Some(spec.labels.clone()),
            placement_group: None,
            public_net: None,
        }
    }
}

/// Keep the status and body of a rejected call; everything else is transport.
fn api_error<T: std::fmt::Debug>(operation: &'static str, e: hcloud::apis::Error<T>) -> Error {
    match e {
        hcloud::apis::Error::ResponseError(resp) => Error::CloudApi {
            operation,
            status: resp.status.as_u16(),
            body: resp.content,
        },
        other => Error::CloudTransport {
            operation,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl CloudProvider for HetznerProvider {
    async fn lookup_by_name(&self, name: &str) -> Result<Option<ServerRecord>> {
        let resp = servers_api::list_servers(
            &self.config,
            servers_api::ListServersParams {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| api_error("list servers", e))?;

        Ok(resp
            .servers
            .iter()
            .find(|s| s.name == name)
            .map(Self::record))
    }

    async fn create(&self, spec: &ServerSpec) -> Result<ServerRecord> {
        let resp = servers_api::create_server(
            &self.config,
            servers_api::CreateServerParams {
                create_server_request: self.create_request(spec),
            },
        )
        .await
        .map_err(|e| api_error("create server", e))?;

        let record = Self::record(&resp.server);
        info!(server_id = record.id, name = %record.name, "hetzner: server created");
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<ServerRecord> {
        let resp = servers_api::get_server(&self.config, servers_api::GetServerParams { id })
            .await
            .map_err(|e| api_error("get server", e))?;

        let server = resp.server.ok_or(Error::CloudTransport {
            operation: "get server",
            message: "server not found in response".into(),
        })?;
        Ok(Self::record(&server))
    }
}
