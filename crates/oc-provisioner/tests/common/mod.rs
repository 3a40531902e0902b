//! Shared fakes for orchestrator tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use oc_provisioner::bootstrap::Script;
use oc_provisioner::cloud::CloudProvider;
use oc_provisioner::config::OrchestratorConfig;
use oc_provisioner::health::HealthProbe;
use oc_provisioner::orchestrator::Orchestrator;
use oc_provisioner::retry::RetryPolicy;
use oc_provisioner::ssh::{ExecOutput, RemoteExecutor};
use oc_provisioner::types::{ServerRecord, ServerSpec, ServerState};
use oc_provisioner::{Error, Result};

pub const SERVER_IP: &str = "203.0.113.10";

// ── Cloud ───────────────────────────────────────────────────────────

/// In-memory control plane. Created servers become visible to lookups
/// unless `stale_lookups` is set.
#[derive(Default)]
pub struct FakeCloud {
    pub servers: Mutex<Vec<ServerRecord>>,
    pub create_status: Option<u16>,
    pub stale_lookups: bool,
    /// Number of `get` calls that report no IP before one appears.
    pub ip_after_gets: u32,
    pub lookups: AtomicU32,
    pub creates: AtomicU32,
    pub gets: AtomicU32,
}

impl FakeCloud {
    pub fn with_existing(record: ServerRecord) -> Self {
        Self {
            servers: Mutex::new(vec![record]),
            ..Default::default()
        }
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }
}

pub fn running_server(name: &str, id: i64) -> ServerRecord {
    ServerRecord {
        name: name.into(),
        id,
        public_ip: Some(SERVER_IP.into()),
        state: ServerState::Running,
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn lookup_by_name(&self, name: &str) -> Result<Option<ServerRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.stale_lookups {
            return Ok(None);
        }
        let servers = self.servers.lock().unwrap();
        Ok(servers.iter().find(|s| s.name == name).cloned())
    }

    async fn create(&self, spec: &ServerSpec) -> Result<ServerRecord> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.create_status {
            return Err(Error::CloudApi {
                operation: "create server",
                status: code,
                body: r#"{"error":{"code":"payment_required","message":"insufficient funds"}}"#
                    .into(),
            });
        }
        let mut servers = self.servers.lock().unwrap();
        let record = ServerRecord {
            name: spec.name.clone(),
            id: 1000 + servers.len() as i64,
            public_ip: None,
            state: ServerState::Initializing,
        };
        servers.push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<ServerRecord> {
        let n = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
        let mut servers = self.servers.lock().unwrap();
        let record = servers
            .iter_mut()
            .find(|s| s.id == id)
            .expect("get for unknown server");
        if n > self.ip_after_gets {
            record.public_ip = Some(SERVER_IP.into());
            record.state = ServerState::Running;
        }
        Ok(record.clone())
    }
}

// ── Remote host ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHost {
    pub unreachable: bool,
    /// Script name and the exit code it should return.
    pub fail: Option<(&'static str, i32)>,
    pub scripts: Mutex<Vec<Script>>,
    pub probes: AtomicU32,
}

impl FakeHost {
    pub fn script_names(&self) -> Vec<&'static str> {
        self.scripts.lock().unwrap().iter().map(|s| s.name).collect()
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    async fn run(&self, _host: &str, script: &Script) -> Result<ExecOutput> {
        if script.name == "probe" {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let exit_code = if self.unreachable { 255 } else { 0 };
            return Ok(ExecOutput {
                exit_code,
                output: vec![],
            });
        }
        self.scripts.lock().unwrap().push(script.clone());
        let exit_code = match self.fail {
            Some((name, code)) if name == script.name => code,
            _ => 0,
        };
        Ok(ExecOutput {
            exit_code,
            output: vec![format!("[{}] exit {exit_code}", script.name)],
        })
    }
}

// ── Health ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeProbe {
    pub healthy: bool,
    pub checks: AtomicU32,
    pub urls: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for FakeProbe {
    async fn check(&self, url: &str) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        self.healthy
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        ip_poll: RetryPolicy::fixed(5, Duration::ZERO),
        ssh_wait: RetryPolicy::fixed(3, Duration::ZERO),
        health: RetryPolicy::fixed(4, Duration::ZERO),
        health_timeout: Duration::from_millis(50),
        service_settle: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

pub fn orchestrator(
    cloud: &Arc<FakeCloud>,
    host: &Arc<FakeHost>,
    probe: &Arc<FakeProbe>,
    config: OrchestratorConfig,
) -> Orchestrator {
    Orchestrator::new(cloud.clone(), host.clone(), probe.clone(), config)
}

// ── Log capture ─────────────────────────────────────────────────────

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
