use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::bootstrap::Script;
use crate::config::SshSettings;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Exit status and combined output of a remote script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: Vec<String>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs scripts on a remote host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync + 'static {
    /// Run `script` on `host`, streaming its output to the log.
    ///
    /// A non-zero remote exit is reported in [`ExecOutput`], not as `Err`;
    /// `Err` means the script could not be run at all.
    async fn run(&self, host: &str, script: &Script) -> Result<ExecOutput>;
}

/// Retry a trivial remote command until the host accepts a session or the
/// policy's budget (attempts or deadline) is spent.
pub async fn await_reachable(
    executor: &dyn RemoteExecutor,
    host: &str,
    policy: &RetryPolicy,
) -> Result<()> {
    let probe = Script::reachability_probe();
    let mut tried = 0;
    let reached = policy
        .poll("ssh reachability", |attempt| {
            tried = attempt;
            let probe = &probe;
            async move {
                match executor.run(host, probe).await {
                    Ok(out) if out.success() => Ok::<_, Error>(Some(())),
                    Ok(out) => {
                        info!(host, attempt, exit_code = out.exit_code, "ssh not ready yet");
                        Ok(None)
                    }
                    Err(e) => {
                        warn!(host, attempt, error = %e, "ssh attempt failed");
                        Ok(None)
                    }
                }
            }
        })
        .await?;

    reached.ok_or_else(|| Error::UnreachableHost {
        host: host.to_string(),
        attempts: tried,
    })
}

/// Executes scripts through the system `ssh` client (`bash -s` on stdin).
pub struct SshExecutor {
    settings: SshSettings,
    program: PathBuf,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings,
            program: PathBuf::from("ssh"),
        }
    }

    /// Drive a different client binary with the same arguments.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Fail early if there is no `ssh` binary to drive.
    pub fn check_available() -> Result<()> {
        which::which("ssh")
            .map(|_| ())
            .map_err(|_| Error::MissingTool("ssh".into()))
    }

    fn command(&self, host: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(key) = &self.settings.private_key_file {
            cmd.arg("-i").arg(key);
        }
        cmd.arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.settings.connect_timeout_secs))
            .arg(format!("{}@{}", self.settings.user, host))
            .arg("bash -s")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, script: &Script) -> Result<ExecOutput> {
        let mut child = self.command(host).spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A client that gives up before reading the script still has an
            // exit status and diagnostics worth reporting.
            match feed(&mut stdin, script).await {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(host, script = script.name, "ssh closed stdin early");
                }
                other => other?,
            }
        }

        // Output is not guaranteed to be UTF-8 (apt, dpkg, vendor installers).
        let mut output = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            while reader.read_until(b'\n', &mut buf).await? > 0 {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if script.stream_output {
                    info!(host, script = script.name, "{line}");
                }
                output.push(line);
                buf.clear();
            }
        }

        let status = child.wait().await?;

        // Local ssh diagnostics (connection refused, auth failures, ...).
        if let Some(mut stderr) = child.stderr.take() {
            let mut diag = Vec::new();
            stderr.read_to_end(&mut diag).await?;
            output.extend(String::from_utf8_lossy(&diag).lines().map(str::to_string));
        }

        let exit_code = status.code().unwrap_or(-1);
        Ok(ExecOutput { exit_code, output })
    }
}

async fn feed(stdin: &mut ChildStdin, script: &Script) -> std::io::Result<()> {
    // Fold remote stderr into stdout so lines arrive in order.
    stdin.write_all(b"exec 2>&1\n").await?;
    stdin.write_all(script.body.as_bytes()).await?;
    stdin.shutdown().await
}
