pub mod bootstrap;
pub mod cloud;
pub mod config;
pub mod health;
pub mod lock;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod ssh;
pub mod types;

/// Process exit codes reported to the caller.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const PRECONDITION: i32 = 1;
    pub const CLOUD_API: i32 = 2;
    pub const BOOTSTRAP: i32 = 3;
    pub const UNHEALTHY: i32 = 4;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing env var: {0}")]
    MissingEnv(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("required tool not found on PATH: {0}")]
    MissingTool(String),

    #[error("another provisioning run holds the lock for customer {0}")]
    Locked(String),

    #[error("hetzner api {operation} returned {status}: {body}")]
    CloudApi {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("hetzner api {operation} failed: {message}")]
    CloudTransport {
        operation: &'static str,
        message: String,
    },

    #[error("server {server_id} had no public ipv4 while running after {attempts} attempts")]
    ProvisioningTimeout { server_id: i64, attempts: u32 },

    #[error("host {host} did not accept ssh after {attempts} attempts")]
    UnreachableHost { host: String, attempts: u32 },

    #[error("remote {step} script exited with {exit_code}")]
    RemoteExecution {
        step: &'static str,
        exit_code: i32,
        output: Vec<String>,
    },

    #[error("openclaw service is not active after configure (exit {exit_code})")]
    Bootstrap { exit_code: i32, journal: Vec<String> },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exit code this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingEnv(_)
            | Self::InvalidConfig(_)
            | Self::InvalidRequest(_)
            | Self::MissingTool(_)
            | Self::Locked(_) => exit::PRECONDITION,
            Self::CloudApi { .. } | Self::CloudTransport { .. } | Self::ProvisioningTimeout { .. } => {
                exit::CLOUD_API
            }
            Self::UnreachableHost { .. }
            | Self::RemoteExecution { .. }
            | Self::Bootstrap { .. }
            | Self::Io(_) => exit::BOOTSTRAP,
        }
    }

    /// Remote output captured for postmortem, if any.
    pub fn remote_output(&self) -> &[String] {
        match self {
            Self::RemoteExecution { output, .. } => output,
            Self::Bootstrap { journal, .. } => journal,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
