use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

use vmhive_core::{observability, Collaborators, Daemon, DaemonConfig, ShutdownSignal};

mod signals;

#[derive(Parser)]
#[command(name = "vmhive")]
#[command(about = "Multi-node container and VM hypervisor daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        /// Configuration file; defaults plus VMHIVE_* variables when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the state directory
        #[arg(long)]
        var_dir: Option<PathBuf>,

        /// Override the HTTPS listener address (e.g., 0.0.0.0:8443)
        #[arg(long)]
        https_address: Option<SocketAddr>,

        /// Group owning the control socket
        #[arg(long)]
        group: Option<String>,
    },
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            config,
            var_dir,
            https_address,
            group,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = var_dir {
                config.daemon.var_dir = dir;
            }
            if https_address.is_some() {
                config.endpoints.https_address = https_address;
            }
            if group.is_some() {
                config.daemon.socket_group = group;
            }
            config.validate()?;
            observability::init_tracing(&config.logging)?;

            run_daemon(config).await
        }
        Commands::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!("{}", render_config(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<DaemonConfig> {
    let config = match path {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::from_env()?,
    };
    Ok(config)
}

fn render_config(config: &DaemonConfig) -> anyhow::Result<String> {
    toml::to_string_pretty(config).context("rendering configuration")
}

async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    let daemon = Daemon::new(config, Collaborators::default());
    let mut signals = signals::ShutdownSignals::install()?.forward();
    supervise(&daemon, &mut signals).await
}

/// Start the daemon and stop it on the first signal or API request. A signal
/// that arrives while startup is still running abandons the start.
async fn supervise(daemon: &Daemon, signals: &mut mpsc::Receiver<ShutdownSignal>) -> anyhow::Result<()> {
    let interrupted = tokio::select! {
        result = daemon.start() => {
            if let Err(e) = result {
                error!(error = %e, "Daemon failed to start");
                return Err(e.into());
            }
            None
        }
        Some(signal) = signals.recv() => Some(signal),
    };

    let signal = match interrupted {
        Some(signal) => {
            info!(signal = %signal, "Received shutdown signal during startup");
            signal
        }
        None => {
            let signal = tokio::select! {
                Some(signal) = signals.recv() => signal,
                Some(signal) = daemon.shutdown_requested() => signal,
                else => anyhow::bail!("no shutdown source left"),
            };
            info!(signal = %signal, "Received shutdown signal");
            signal
        }
    };

    daemon.stop(signal).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vmhive_core::{
        cluster::BootstrapState,
        error::HiveError,
        test_helpers::{wait_for_condition, MockGateway},
    };

    fn scratch_config(dir: &tempfile::TempDir) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.daemon.var_dir = dir.path().to_path_buf();
        config.cluster.connect_timeout_standalone = Duration::from_secs(2);
        config.cluster.heartbeat_interval = Duration::from_millis(50);
        config.cluster.task_stop_grace = Duration::from_secs(1);
        config.cluster.degraded_stop_grace = Duration::from_secs(1);
        config.shutdown.default_timeout = Duration::from_secs(1);
        config.shutdown.storage_unmount_ceiling = Duration::from_millis(200);
        config
    }

    #[test]
    fn test_check_config_renders_file_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vmhive.toml");
        std::fs::write(
            &path,
            r#"
[endpoints]
https_address = "127.0.0.1:8443"

[cluster]
heartbeat_interval = "3s"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.cluster.heartbeat_interval, Duration::from_secs(3));

        let rendered = render_config(&config).unwrap();
        assert!(rendered.contains("127.0.0.1:8443"));
        assert!(rendered.contains("3s"));
    }

    #[test]
    fn test_missing_config_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.toml"));
    }

    #[test]
    fn test_daemon_arguments_parse() {
        let cli = Cli::try_parse_from([
            "vmhive",
            "daemon",
            "--var-dir",
            "/var/lib/vmhive",
            "--https-address",
            "0.0.0.0:8443",
        ])
        .unwrap();
        match cli.command {
            Commands::Daemon {
                var_dir,
                https_address,
                ..
            } => {
                assert_eq!(var_dir, Some(PathBuf::from("/var/lib/vmhive")));
                assert_eq!(https_address, Some("0.0.0.0:8443".parse().unwrap()));
            }
            Commands::CheckConfig { .. } => panic!("parsed the wrong subcommand"),
        }
    }

    #[tokio::test]
    async fn test_signal_during_startup_stops_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(MockGateway::default());
        gateway.script_open(vec![Err(HiveError::SomeNodesBehind {
            details: "member 2 runs an older schema".into(),
        })]);
        let collaborators = Collaborators {
            gateway: Some(gateway.clone()),
            ..Collaborators::default()
        };
        let daemon = Arc::new(Daemon::new(scratch_config(&dir), collaborators));
        let (tx, mut rx) = mpsc::channel(1);

        let running = {
            let daemon = daemon.clone();
            tokio::spawn(async move { supervise(&daemon, &mut rx).await })
        };

        wait_for_condition(
            || {
                let daemon = daemon.clone();
                async move { matches!(daemon.bootstrap_state(), Some(BootstrapState::DegradedWait { .. })) }
            },
            Duration::from_secs(2),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        tx.send(ShutdownSignal::Terminate).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("startup ignored the signal")
            .unwrap()
            .unwrap();

        assert!(daemon.state().signals().is_shutting_down());
        assert!(!daemon.state().signals().ready.is_set());
        assert!(!dir.path().join("unix.socket").exists());
    }

    #[tokio::test]
    async fn test_signal_after_startup_stops_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Arc::new(Daemon::new(scratch_config(&dir), Collaborators::default()));
        let (tx, mut rx) = mpsc::channel(1);

        let running = {
            let daemon = daemon.clone();
            tokio::spawn(async move { supervise(&daemon, &mut rx).await })
        };

        wait_for_condition(
            || {
                let daemon = daemon.clone();
                async move { daemon.state().signals().ready.is_set() }
            },
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        tx.send(ShutdownSignal::Terminate).await.unwrap();
        running.await.unwrap().unwrap();
        assert!(daemon.state().signals().is_shutting_down());
    }
}
