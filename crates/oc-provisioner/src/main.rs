use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use oc_provisioner::cloud::HetznerProvider;
use oc_provisioner::config::ProvisionConfig;
use oc_provisioner::health::{self, HttpHealthProbe};
use oc_provisioner::orchestrator::Orchestrator;
use oc_provisioner::ssh::SshExecutor;
use oc_provisioner::types::{GATEWAY_PORT, ProvisionRequest};
use oc_provisioner::{exit, report};

#[derive(Parser)]
#[command(name = "oc-provisioner", about = "Provision a per-customer OpenClaw server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create (or reuse) the customer's server and bootstrap OpenClaw on it.
    Provision {
        customer_id: String,
        /// Setup password; a random one is generated when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// One-shot liveness check of a running instance.
    Health {
        ip: String,
        #[arg(long, default_value_t = GATEWAY_PORT)]
        port: u16,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Before tracing init so RUST_LOG can come from .env
    dotenvy::dotenv().ok();

    // stdout carries only the JSON result
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Provision {
            customer_id,
            password,
        } => provision(customer_id, password).await,
        Command::Health { ip, port } => check_health(&ip, port).await,
    };
    std::process::exit(code);
}

async fn provision(customer_id: String, password: Option<String>) -> i32 {
    let prepared = ProvisionConfig::from_env().and_then(|config| {
        SshExecutor::check_available()?;
        let req = ProvisionRequest::new(customer_id, password)?;
        Ok((config, req))
    });
    let (config, req) = match prepared {
        Ok(ok) => ok,
        Err(e) => {
            tracing::error!(error = %e, "precondition failed");
            return e.exit_code();
        }
    };

    let probe = match HttpHealthProbe::new(config.orchestrator.health_timeout) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "precondition failed");
            return e.exit_code();
        }
    };

    tracing::info!(
        customer_id = req.customer_id(),
        server_name = %req.server_name(),
        "starting provisioning run"
    );

    let orchestrator = Orchestrator::new(
        Arc::new(HetznerProvider::new(config.hetzner)),
        Arc::new(SshExecutor::new(config.ssh)),
        Arc::new(probe),
        config.orchestrator,
    );

    report::execute(&orchestrator, &req, &mut std::io::stdout().lock()).await
}

async fn check_health(ip: &str, port: u16) -> i32 {
    let probe = match HttpHealthProbe::new(Duration::from_secs(10)) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to build http client");
            return e.exit_code();
        }
    };

    let report = health::check_instance(&probe, ip, port).await;
    match serde_json::to_string(&report) {
        Ok(line) => println!("{line}"),
        Err(e) => tracing::error!(error = %e, "failed to render health report"),
    }

    if report.gateway_reachable {
        exit::SUCCESS
    } else {
        exit::UNHEALTHY
    }
}
