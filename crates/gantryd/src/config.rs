//! gantryd configuration.
//!
//! Settings come from three layers: command-line flags (each with an
//! environment fallback), an optional TOML file, and built-in defaults.
//! Flags win over file values, file values win over defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

const DEFAULT_PORT: u16 = 8443;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
const DEFAULT_WARNING_WINDOW_SECS: u64 = 3600;
const DEFAULT_CLUSTER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TERRAFORM_ROOT: &str = "/var/lib/gantry/terraform";

/// Command-line flags.
#[derive(Debug, Parser)]
#[command(name = "gantryd", about = "Gantry developer-environment daemon")]
pub struct Args {
    /// Address the API server listens on.
    #[arg(long, env = "GANTRYD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Seconds between lifecycle scans.
    #[arg(long, env = "GANTRYD_SCAN_INTERVAL")]
    pub scan_interval: Option<u64>,

    /// Seconds before expiry at which environments surface as expiring.
    #[arg(long, env = "GANTRYD_WARNING_WINDOW")]
    pub warning_window: Option<u64>,

    /// Cluster backend to drive.
    #[arg(long, value_enum, env = "GANTRYD_CLUSTER")]
    pub cluster: Option<ClusterMode>,

    /// Seconds before an individual cluster call times out.
    #[arg(long, env = "GANTRYD_CLUSTER_TIMEOUT")]
    pub cluster_timeout: Option<u64>,

    /// Provision through terraform instead of writing manifests directly.
    #[arg(long, env = "GANTRYD_TERRAFORM")]
    pub terraform: bool,

    /// Terraform binary to invoke.
    #[arg(long, env = "GANTRYD_TERRAFORM_BIN")]
    pub terraform_bin: Option<PathBuf>,

    /// Directory holding one terraform workspace per environment.
    #[arg(long, env = "GANTRYD_TERRAFORM_ROOT")]
    pub terraform_root: Option<PathBuf>,

    /// Module files copied into each terraform workspace.
    #[arg(long, env = "GANTRYD_TERRAFORM_MODULE")]
    pub terraform_module: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, env = "GANTRYD_LOG_JSON")]
    pub log_json: bool,

    /// Optional TOML config file.
    #[arg(long, env = "GANTRYD_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Which gateway implementation backs the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterMode {
    /// Real API server, reached through the ambient kubeconfig.
    #[default]
    Kube,
    /// In-memory cluster, for local development and tests.
    InMemory,
}

/// Shape of the optional config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerSection>,
    pub lifecycle: Option<LifecycleSection>,
    pub cluster: Option<ClusterSection>,
    pub terraform: Option<TerraformSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub listen: Option<SocketAddr>,
    pub log_json: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LifecycleSection {
    pub scan_interval_secs: Option<u64>,
    pub warning_window_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSection {
    pub mode: Option<ClusterMode>,
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerraformSection {
    pub enabled: Option<bool>,
    pub binary: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub module_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub scan_interval: Duration,
    pub warning_window: chrono::Duration,
    pub cluster: ClusterMode,
    pub cluster_timeout: Duration,
    /// Present only when terraform provisioning is switched on.
    pub terraform: Option<TerraformSettings>,
    pub log_json: bool,
}

#[derive(Debug, Clone)]
pub struct TerraformSettings {
    pub binary: PathBuf,
    pub root: PathBuf,
    pub module_dir: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(args: &Args, file: &FileConfig) -> Self {
        let server = file.server.clone().unwrap_or_default();
        let lifecycle = file.lifecycle.clone().unwrap_or_default();
        let cluster = file.cluster.clone().unwrap_or_default();
        let tf = file.terraform.clone().unwrap_or_default();

        let listen = args
            .listen
            .or(server.listen)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)));
        let scan_interval = Duration::from_secs(
            args.scan_interval
                .or(lifecycle.scan_interval_secs)
                .unwrap_or(DEFAULT_SCAN_INTERVAL_SECS),
        );
        let warning_window = chrono::Duration::seconds(
            args.warning_window
                .or(lifecycle.warning_window_secs)
                .unwrap_or(DEFAULT_WARNING_WINDOW_SECS) as i64,
        );
        let mode = args.cluster.or(cluster.mode).unwrap_or_default();
        let cluster_timeout = Duration::from_secs(
            args.cluster_timeout
                .or(cluster.call_timeout_secs)
                .unwrap_or(DEFAULT_CLUSTER_TIMEOUT_SECS),
        );

        // The flag can only switch terraform on; absence defers to the file.
        let enabled = args.terraform || tf.enabled.unwrap_or(false);
        let terraform = enabled.then(|| TerraformSettings {
            binary: args
                .terraform_bin
                .clone()
                .or_else(|| tf.binary.clone())
                .unwrap_or_else(|| PathBuf::from("terraform")),
            root: args
                .terraform_root
                .clone()
                .or_else(|| tf.root.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TERRAFORM_ROOT)),
            module_dir: args.terraform_module.clone().or_else(|| tf.module_dir.clone()),
        });

        Settings {
            listen,
            scan_interval,
            warning_window,
            cluster: mode,
            cluster_timeout,
            terraform,
            log_json: args.log_json || server.log_json.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_args() -> Args {
        Args::parse_from(["gantryd"])
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let settings = Settings::resolve(&no_args(), &FileConfig::default());
        assert_eq!(settings.listen.port(), DEFAULT_PORT);
        assert_eq!(settings.scan_interval, Duration::from_secs(60));
        assert_eq!(settings.warning_window, chrono::Duration::hours(1));
        assert_eq!(settings.cluster, ClusterMode::Kube);
        assert!(settings.terraform.is_none());
        assert!(!settings.log_json);
    }

    #[test]
    fn file_values_override_defaults() {
        let file: FileConfig = toml::from_str(
            r#"
[server]
listen = "127.0.0.1:9000"

[lifecycle]
scan_interval_secs = 15

[cluster]
mode = "in-memory"

[terraform]
enabled = true
root = "/tmp/tf"
"#,
        )
        .unwrap();

        let settings = Settings::resolve(&no_args(), &file);
        assert_eq!(settings.listen.port(), 9000);
        assert_eq!(settings.scan_interval, Duration::from_secs(15));
        assert_eq!(settings.cluster, ClusterMode::InMemory);
        let tf = settings.terraform.unwrap();
        assert_eq!(tf.root, PathBuf::from("/tmp/tf"));
        assert_eq!(tf.binary, PathBuf::from("terraform"));
    }

    #[test]
    fn flags_win_over_file() {
        let file: FileConfig = toml::from_str(
            "[server]\nlisten = \"127.0.0.1:9000\"\n\n[lifecycle]\nscan_interval_secs = 15\n",
        )
        .unwrap();
        let args = Args::parse_from([
            "gantryd",
            "--listen",
            "127.0.0.1:7000",
            "--scan-interval",
            "5",
        ]);

        let settings = Settings::resolve(&args, &file);
        assert_eq!(settings.listen.port(), 7000);
        assert_eq!(settings.scan_interval, Duration::from_secs(5));
    }

    #[test]
    fn terraform_flag_fills_paths_from_file() {
        let file: FileConfig = toml::from_str(
            "[terraform]\nbinary = \"/usr/local/bin/terraform\"\nmodule_dir = \"/etc/gantry/module\"\n",
        )
        .unwrap();
        let args = Args::parse_from(["gantryd", "--terraform"]);

        let tf = Settings::resolve(&args, &file).terraform.unwrap();
        assert_eq!(tf.binary, PathBuf::from("/usr/local/bin/terraform"));
        assert_eq!(tf.module_dir, Some(PathBuf::from("/etc/gantry/module")));
        assert_eq!(tf.root, PathBuf::from(DEFAULT_TERRAFORM_ROOT));
    }
}
