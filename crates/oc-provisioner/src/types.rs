use std::collections::HashMap;
use std::fmt::Write as _;

use rand::Rng;
use serde::Serialize;

use crate::{Error, Result};

/// Prefix for every server this tool creates.
pub const SERVER_NAME_PREFIX: &str = "oc-";

/// Port the OpenClaw gateway listens on.
pub const GATEWAY_PORT: u16 = 18789;

/// Bytes of entropy in a generated setup password (rendered as hex).
const PASSWORD_BYTES: usize = 16;

/// Server name for a customer. Lookup by this name is the idempotency key.
pub fn server_name(customer_id: &str) -> String {
    format!("{SERVER_NAME_PREFIX}{customer_id}")
}

/// Generate a random setup password: 32 lowercase hex characters.
pub fn generate_password() -> String {
    let mut bytes = [0u8; PASSWORD_BYTES];
    rand::rng().fill(&mut bytes);
    bytes.iter().fold(String::with_capacity(PASSWORD_BYTES * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// Input to one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    customer_id: String,
    setup_password: String,
}

impl ProvisionRequest {
    /// Validate the inputs, generating a password when none is given.
    pub fn new(customer_id: impl Into<String>, setup_password: Option<String>) -> Result<Self> {
        let customer_id = customer_id.into();
        if customer_id.is_empty()
            || !customer_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::InvalidRequest(format!(
                "customer id {customer_id:?} must be non-empty and contain only [A-Za-z0-9_-]"
            )));
        }

        let setup_password = match setup_password {
            Some(pw) => {
                if pw.is_empty() || pw.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err(Error::InvalidRequest(
                        "setup password must be non-empty and contain no whitespace".into(),
                    ));
                }
                pw
            }
            None => generate_password(),
        };

        Ok(Self {
            customer_id,
            setup_password,
        })
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn setup_password(&self) -> &str {
        &self.setup_password
    }

    pub fn server_name(&self) -> String {
        server_name(&self.customer_id)
    }
}

/// What to ask the cloud provider for.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl ServerSpec {
    pub fn for_customer(customer_id: &str) -> Self {
        let labels = HashMap::from([
            ("managed-by".to_string(), "oc-provisioner".to_string()),
            ("customer".to_string(), customer_id.to_string()),
        ]);
        Self {
            name: server_name(customer_id),
            labels,
        }
    }
}

/// Provider-reported server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Initializing,
    Starting,
    Running,
    Stopped,
    Deleting,
    Unknown,
}

/// Cached view of a cloud server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub name: String,
    pub id: i64,
    pub public_ip: Option<String>,
    pub state: ServerState,
}

impl ServerRecord {
    /// Public IP, but only once the server is running.
    pub fn ready_ip(&self) -> Option<&str> {
        match self.state {
            ServerState::Running => self.public_ip.as_deref(),
            _ => None,
        }
    }
}

/// Final outcome of a run that produced a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Unhealthy,
}

impl ResultStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => crate::exit::SUCCESS,
            Self::Unhealthy => crate::exit::UNHEALTHY,
        }
    }
}

/// The artifact handed to the caller at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningResult {
    pub server_id: i64,
    pub server_ip: String,
    pub server_name: String,
    pub setup_url: String,
    pub setup_password: String,
    pub status: ResultStatus,
    pub note: Option<String>,
}

#[derive(Serialize)]
struct SuccessPayload<'a> {
    server_id: i64,
    server_ip: &'a str,
    server_name: &'a str,
    setup_url: &'a str,
    setup_password: &'a str,
    status: ResultStatus,
}

#[derive(Serialize)]
struct UnhealthyPayload<'a> {
    server_id: i64,
    server_ip: &'a str,
    setup_url: &'a str,
    setup_password: &'a str,
    status: ResultStatus,
    note: &'a str,
}

impl ProvisioningResult {
    /// JSON payload written to stdout; the shape depends on the status.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self.status {
            ResultStatus::Success => serde_json::to_string(&SuccessPayload {
                server_id: self.server_id,
                server_ip: &self.server_ip,
                server_name: &self.server_name,
                setup_url: &self.setup_url,
                setup_password: &self.setup_password,
                status: self.status,
            }),
            ResultStatus::Unhealthy => serde_json::to_string(&UnhealthyPayload {
                server_id: self.server_id,
                server_ip: &self.server_ip,
                setup_url: &self.setup_url,
                setup_password: &self.setup_password,
                status: self.status,
                note: self.note.as_deref().unwrap_or_default(),
            }),
        }
    }
}

pub fn setup_url(ip: &str) -> String {
    format!("http://{ip}:{GATEWAY_PORT}")
}
