//! keeld — the keel daemon.
//!
//! Wires the state store, the cluster client, the secret cipher and every
//! manager together, then either serves (HTTP surface + job runner) or runs
//! a single operation and exits.
//!
//! # Usage
//!
//! ```text
//! KEEL_ENCRYPTION_KEY=<64 hex> keeld --config /etc/keel/keel.toml serve
//! keeld deploy --deployment-id d_123 --tenant-id ws_42
//! keeld teardown --tenant-id ws_42
//! ```

mod oneshot;
mod serve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use keel_cluster::{ClusterClient, KubeCluster};
use keel_core::KeelConfig;
use keel_jobs::JobContext;
use keel_secrets::SecretCipher;
use keel_state::StateStore;
use tracing::info;

#[derive(Parser)]
#[command(name = "keeld", about = "keel deployment orchestration daemon")]
struct Cli {
    /// TOML configuration file; built-in defaults when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Run the HTTP surface and the job runner until Ctrl-C.
    Serve {
        /// Overrides `[api] listen`.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Roll out one deployment record and exit.
    Deploy {
        #[arg(long)]
        deployment_id: String,
        #[arg(long)]
        tenant_id: String,
        #[arg(long, default_value = "")]
        project_id: String,
    },
    /// Delete a tenant's namespace and everything in it.
    Teardown {
        #[arg(long)]
        tenant_id: String,
    },
}

/// Used when `RUST_LOG` is unset. Targets are crate names, so each
/// workspace crate is listed.
const DEFAULT_LOG_FILTER: &str = "info,keeld=debug,keel_core=debug,keel_state=debug,\
keel_cluster=debug,keel_secrets=debug,keel_rollout=debug,keel_workload=debug,\
keel_autoscale=debug,keel_jobs=debug,keel_api=debug";

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<KeelConfig> {
    let config = match path {
        Some(path) => KeelConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => KeelConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn cluster() -> anyhow::Result<Arc<dyn ClusterClient>> {
    let cluster = KubeCluster::try_default()
        .await
        .context("connecting to the cluster API")?;
    Ok(Arc::new(cluster))
}

/// Everything a job needs, from the environment and the config file.
async fn job_context(config: &KeelConfig) -> anyhow::Result<Arc<JobContext>> {
    let cipher = Arc::new(SecretCipher::from_env().context("loading the encryption key")?);
    let store_path = Path::new(&config.store.path);
    if let Some(dir) = store_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(store_path)?;
    info!(path = %store_path.display(), "state store opened");

    let ctx = JobContext::from_config(config, cluster().await?, store, cipher)?;
    Ok(Arc::new(ctx))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { listen } => {
            let ctx = job_context(&config).await?;
            let listen = listen.unwrap_or_else(|| config.api.listen.clone());
            serve::run(&config, ctx, &listen).await
        }
        Command::Deploy {
            deployment_id,
            tenant_id,
            project_id,
        } => {
            let ctx = job_context(&config).await?;
            oneshot::deploy(ctx, deployment_id, project_id, tenant_id).await
        }
        Command::Teardown { tenant_id } => oneshot::teardown(cluster().await?, &tenant_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deploy_with_global_flags() {
        let cli = Cli::try_parse_from([
            "keeld",
            "deploy",
            "--deployment-id",
            "d1",
            "--tenant-id",
            "acme",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(
            cli.command,
            Command::Deploy {
                deployment_id: "d1".to_string(),
                tenant_id: "acme".to_string(),
                project_id: String::new(),
            }
        );
    }

    #[test]
    fn deploy_requires_a_tenant() {
        assert!(Cli::try_parse_from(["keeld", "deploy", "--deployment-id", "d1"]).is_err());
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["keeld", "serve"]).unwrap();
        assert!(cli.config.is_none());
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.command, Command::Serve { listen: None });
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/keel.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/keel.toml"));
    }

    #[test]
    fn default_log_filter_names_every_crate() {
        tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        let directives: Vec<&str> = DEFAULT_LOG_FILTER.split(',').collect();
        for target in [
            "keeld",
            "keel_core",
            "keel_state",
            "keel_cluster",
            "keel_secrets",
            "keel_rollout",
            "keel_workload",
            "keel_autoscale",
            "keel_jobs",
            "keel_api",
        ] {
            assert!(directives.contains(&format!("{target}=debug").as_str()), "{target}");
        }
        assert!(!directives.contains(&"keel=debug"));
    }

    #[test]
    fn defaults_validate() {
        let config = load_config(None).unwrap();
        assert_eq!(config.api.listen, "0.0.0.0:8080");
    }
}
