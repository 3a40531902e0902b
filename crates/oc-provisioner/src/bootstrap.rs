use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::ssh::RemoteExecutor;
use crate::types::GATEWAY_PORT;
use crate::{Error, Result};

pub const SERVICE_NAME: &str = "openclaw";
pub const SERVICE_USER: &str = "openclaw";
pub const SERVICE_HOME: &str = "/home/openclaw";
pub const CONFIG_PATH: &str = "/home/openclaw/.openclaw/openclaw.json";
pub const UNIT_PATH: &str = "/etc/systemd/system/openclaw.service";

const OPENCLAW_INSTALLER: &str = "https://openclaw.ai/install.sh";
const NODESOURCE_SETUP: &str = "https://deb.nodesource.com/setup_22.x";

/// Exit code the configure script uses when the unit is not active.
pub const UNIT_INACTIVE_EXIT: i32 = 70;

/// A named, versioned shell payload executed with `bash -s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: &'static str,
    pub version: u32,
    pub body: String,
    /// Log every output line as it arrives.
    pub stream_output: bool,
}

impl Script {
    fn from_commands(name: &'static str, version: u32, commands: &[String]) -> Self {
        let mut body = String::from("set -euo pipefail\nexport DEBIAN_FRONTEND=noninteractive\n");
        for c in commands {
            body.push_str(c);
            body.push('\n');
        }
        Self {
            name,
            version,
            body,
            stream_output: true,
        }
    }

    /// Trivial command used to check that the host accepts sessions.
    pub fn reachability_probe() -> Self {
        Self {
            name: "probe",
            version: 1,
            body: "true\n".into(),
            stream_output: false,
        }
    }

    /// Refresh packages, install Node.js and OpenClaw if absent.
    pub fn install() -> Self {
        // Each install runs as its own statement so `set -e` sees it fail;
        // an `a && b` chain would swallow a failing `a`.
        let commands = [
            "echo '[oc-bootstrap] install v2 starting'".to_string(),
            "apt-get update -q".into(),
            "apt-get upgrade -y -q -o Dpkg::Options::=--force-confdef -o Dpkg::Options::=--force-confold".into(),
            "apt-get install -y -q curl ca-certificates".into(),
            format!(
                "if ! command -v node >/dev/null 2>&1; then\n  curl -fsSL {NODESOURCE_SETUP} | bash -\n  apt-get install -y -q nodejs\nelse\n  echo \"node present: $(node --version)\"\nfi"
            ),
            format!(
                "if ! command -v openclaw >/dev/null 2>&1; then\n  curl -fsSL {OPENCLAW_INSTALLER} | bash\nelse\n  echo 'openclaw present'\nfi"
            ),
            // A failing version probe is reported but does not fail the step.
            "openclaw --version || echo '[oc-bootstrap] warning: openclaw version probe failed'".into(),
            "echo '[oc-bootstrap] install done'".into(),
        ];
        Self::from_commands("install", 2, &commands)
    }

    /// Write gateway config and service unit, (re)start and check the unit.
    pub fn configure(gateway: &GatewayConfig, unit: &ServiceUnit, settle: Duration) -> Self {
        let config_dir = CONFIG_PATH
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or(SERVICE_HOME);
        let commands = [
            "echo '[oc-bootstrap] configure v1 starting'".to_string(),
            format!(
                "id -u {SERVICE_USER} >/dev/null 2>&1 || useradd --system --create-home --home-dir {SERVICE_HOME} --shell /usr/sbin/nologin {SERVICE_USER}"
            ),
            format!("mkdir -p {config_dir}"),
            heredoc(CONFIG_PATH, &gateway.render()),
            format!("chmod 600 {CONFIG_PATH}"),
            format!("chown -R {SERVICE_USER}:{SERVICE_USER} {SERVICE_HOME}"),
            heredoc(UNIT_PATH, &unit.render()),
            "systemctl daemon-reload".into(),
            format!("systemctl enable {SERVICE_NAME}"),
            format!("systemctl restart {SERVICE_NAME}"),
            format!("sleep {}", settle.as_secs()),
            format!(
                "if ! systemctl is-active --quiet {SERVICE_NAME}; then echo '[oc-bootstrap] {SERVICE_NAME} is not active'; journalctl -u {SERVICE_NAME} -n 50 --no-pager || true; exit {UNIT_INACTIVE_EXIT}; fi"
            ),
            "echo '[oc-bootstrap] configure done'".into(),
        ];
        Self::from_commands("configure", 1, &commands)
    }
}

/// Write `content` to `path` verbatim (quoted delimiter, no expansion).
fn heredoc(path: &str, content: &str) -> String {
    format!("cat > {path} << 'OC_BOOTSTRAP_EOF'\n{content}\nOC_BOOTSTRAP_EOF")
}

/// Gateway settings persisted on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub setup_password: String,
    pub port: u16,
    pub host: String,
}

impl GatewayConfig {
    pub fn new(setup_password: impl Into<String>) -> Self {
        Self {
            setup_password: setup_password.into(),
            port: GATEWAY_PORT,
            host: "0.0.0.0".into(),
        }
    }

    /// Render to pretty-printed JSON.
    pub fn render(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// systemd unit supervising the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    pub description: String,
    pub user: String,
    pub home: String,
    pub exec_start: String,
    pub restart_sec: u32,
    pub start_limit_burst: u32,
    pub start_limit_interval_sec: u32,
    pub memory_max: String,
    pub cpu_quota: String,
}

impl Default for ServiceUnit {
    fn default() -> Self {
        Self {
            description: "OpenClaw gateway".into(),
            user: SERVICE_USER.into(),
            home: SERVICE_HOME.into(),
            exec_start: format!("/bin/sh -lc 'exec openclaw gateway run --port {GATEWAY_PORT}'"),
            restart_sec: 5,
            start_limit_burst: 5,
            start_limit_interval_sec: 60,
            memory_max: "1536M".into(),
            cpu_quota: "150%".into(),
        }
    }
}

impl ServiceUnit {
    pub fn render(&self) -> String {
        format!(
            "[Unit]
Description={description}
After=network-online.target
Wants=network-online.target
StartLimitIntervalSec={interval}
StartLimitBurst={burst}

[Service]
Type=simple
User={user}
Group={user}
WorkingDirectory={home}
Environment=HOME={home}
Environment=OPENCLAW_CONFIG_PATH={config}
ExecStart={exec}
Restart=always
RestartSec={restart_sec}
MemoryMax={memory}
CPUQuota={cpu}
NoNewPrivileges=true
PrivateTmp=true
ProtectSystem=strict
ProtectHome=read-only
ReadWritePaths={home}

[Install]
WantedBy=multi-user.target",
            description = self.description,
            interval = self.start_limit_interval_sec,
            burst = self.start_limit_burst,
            user = self.user,
            home = self.home,
            config = CONFIG_PATH,
            exec = self.exec_start,
            restart_sec = self.restart_sec,
            memory = self.memory_max,
            cpu = self.cpu_quota,
        )
    }
}

/// Runs the install and configure procedures on a host.
pub struct Bootstrapper {
    executor: Arc<dyn RemoteExecutor>,
    settle: Duration,
}

impl Bootstrapper {
    pub fn new(executor: Arc<dyn RemoteExecutor>, settle: Duration) -> Self {
        Self { executor, settle }
    }

    pub async fn install(&self, host: &str) -> Result<()> {
        info!(host, "installing runtime and openclaw");
        let out = self.executor.run(host, &Script::install()).await?;
        if !out.success() {
            error!(host, exit_code = out.exit_code, "install script failed");
            return Err(Error::RemoteExecution {
                step: "install",
                exit_code: out.exit_code,
                output: out.output,
            });
        }
        Ok(())
    }

    pub async fn configure(&self, host: &str, setup_password: &str) -> Result<()> {
        info!(host, "writing gateway config and service unit");
        let script = Script::configure(
            &GatewayConfig::new(setup_password),
            &ServiceUnit::default(),
            self.settle,
        );
        let out = self.executor.run(host, &script).await?;
        match out.exit_code {
            0 => Ok(()),
            UNIT_INACTIVE_EXIT => {
                error!(host, "openclaw service did not become active");
                Err(Error::Bootstrap {
                    exit_code: out.exit_code,
                    journal: out.output,
                })
            }
            exit_code => {
                error!(host, exit_code, "configure script failed");
                Err(Error::RemoteExecution {
                    step: "configure",
                    exit_code,
                    output: out.output,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::ExecOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn install_checks_presence_before_installing() {
        let s = Script::install();
        assert_eq!((s.name, s.version), ("install", 2));
        assert!(s.body.starts_with("set -euo pipefail\n"));
        assert!(s.body.contains("apt-get update"));
        assert!(s.body.contains("apt-get upgrade -y"));
        assert!(s.body.contains("if ! command -v node"));
        assert!(s.body.contains("if ! command -v openclaw"));
        assert!(s.body.contains("openclaw --version || echo"));
        assert!(!s.body.contains("&&"), "chained installs hide failures");
    }

    /// Runs the install script locally against stub tools. Only the stub
    /// directory is on PATH, so `node` is absent and gets installed.
    #[cfg(unix)]
    fn run_install(curl_exit: i32) -> (i32, String) {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let stubs = [
            ("apt-get", "exit 0".to_string()),
            ("curl", format!("exit {curl_exit}")),
            ("bash", "while read -r _; do :; done".to_string()),
            ("openclaw", "echo 'openclaw 0.0.0'".to_string()),
        ];
        for (name, body) in stubs {
            let path = bin.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let bash = which::which("bash").unwrap();
        let out = std::process::Command::new(bash)
            .arg("-c")
            .arg(Script::install().body)
            .env("PATH", bin.path())
            .output()
            .unwrap();
        (
            out.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&out.stdout).into_owned(),
        )
    }

    #[cfg(unix)]
    #[test]
    fn install_completes_when_every_step_succeeds() {
        let (code, stdout) = run_install(0);
        assert_eq!(code, 0, "{stdout}");
        assert!(stdout.contains("[oc-bootstrap] install done"), "{stdout}");
    }

    #[cfg(unix)]
    #[test]
    fn failed_runtime_setup_fails_the_install() {
        let (code, stdout) = run_install(22);
        assert_ne!(code, 0, "{stdout}");
        assert!(!stdout.contains("install done"), "{stdout}");
    }

    #[test]
    fn configure_embeds_password_and_asserts_active() {
        let s = Script::configure(
            &GatewayConfig::new("s3cret"),
            &ServiceUnit::default(),
            Duration::from_secs(5),
        );
        assert!(s.body.contains(r#""setupPassword": "s3cret""#));
        assert!(s.body.contains(r#""port": 18789"#));
        assert!(s.body.contains(r#""host": "0.0.0.0""#));
        assert!(s.body.contains("cat > /home/openclaw/.openclaw/openclaw.json << 'OC_BOOTSTRAP_EOF'"));
        assert!(s.body.contains("useradd --system"));
        assert!(s.body.contains("systemctl daemon-reload"));
        assert!(s.body.contains("systemctl enable openclaw"));
        assert!(s.body.contains("sleep 5"));
        assert!(s.body.contains("systemctl is-active --quiet openclaw"));
        assert!(s.body.contains("exit 70"));
    }

    #[test]
    fn unit_has_restart_limits_and_sandboxing() {
        let unit = ServiceUnit::default().render();
        for line in [
            "Restart=always",
            "RestartSec=5",
            "StartLimitBurst=5",
            "StartLimitIntervalSec=60",
            "MemoryMax=1536M",
            "CPUQuota=150%",
            "NoNewPrivileges=true",
            "ProtectSystem=strict",
            "ReadWritePaths=/home/openclaw",
            "User=openclaw",
        ] {
            assert!(unit.lines().any(|l| l == line), "missing {line}");
        }
    }

    struct Canned {
        exit_code: i32,
        scripts: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl RemoteExecutor for Canned {
        async fn run(&self, _host: &str, script: &Script) -> Result<ExecOutput> {
            self.scripts.lock().unwrap().push(script.name);
            Ok(ExecOutput {
                exit_code: self.exit_code,
                output: vec!["line one".into(), "line two".into()],
            })
        }
    }

    fn bootstrapper(exit_code: i32) -> (Arc<Canned>, Bootstrapper) {
        let exec = Arc::new(Canned {
            exit_code,
            scripts: Mutex::new(vec![]),
        });
        let b = Bootstrapper::new(exec.clone(), Duration::ZERO);
        (exec, b)
    }

    #[tokio::test]
    async fn install_failure_carries_output() {
        let (_, b) = bootstrapper(100);
        let err = b.install("h").await.unwrap_err();
        assert!(matches!(err, Error::RemoteExecution { step: "install", exit_code: 100, .. }));
        assert_eq!(err.remote_output(), ["line one", "line two"]);
    }

    #[tokio::test]
    async fn inactive_unit_is_a_bootstrap_error_with_journal() {
        let (exec, b) = bootstrapper(UNIT_INACTIVE_EXIT);
        let err = b.configure("h", "pw").await.unwrap_err();
        assert!(matches!(err, Error::Bootstrap { .. }));
        assert_eq!(err.remote_output().len(), 2);
        assert_eq!(*exec.scripts.lock().unwrap(), ["configure"]);
    }

    #[tokio::test]
    async fn other_configure_failures_are_remote_errors() {
        let (_, b) = bootstrapper(1);
        let err = b.configure("h", "pw").await.unwrap_err();
        assert!(matches!(err, Error::RemoteExecution { step: "configure", .. }));
        assert_eq!(err.exit_code(), crate::exit::BOOTSTRAP);
    }
}
