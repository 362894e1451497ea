use crate::config::Role;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nodestrap")]
#[command(author = "nodestrap contributors")]
#[command(version)]
#[command(about = "Bootstrap a host into a k3s or rke2 cluster", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bootstrap this node into a cluster
    Bootstrap(BootstrapArgs),

    /// Wait until the probes of a plan are healthy
    Probe(ProbeArgs),

    /// Print the token other nodes use to join this cluster
    GetToken(GetTokenArgs),

    /// Show OS, CLI and cluster versions
    Info(InfoArgs),

    /// Run a command every 15 seconds until it succeeds
    #[command(hide = true)]
    Retry(RetryArgs),

    /// Print the version
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct BootstrapArgs {
    /// Bootstrap again even if the node is already bootstrapped
    #[arg(short, long, env = "NODESTRAP_FORCE")]
    pub force: bool,

    /// Config file applied over the system config files
    #[arg(short, long, env = "NODESTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// State directory for plan, token and stamps
    #[arg(long, env = "NODESTRAP_DATA_DIR", default_value = crate::paths::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Node config directory (manifests, kubeconfig link)
    #[arg(long, env = "NODESTRAP_CONFIG_DIR", default_value = crate::paths::DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Server to join, e.g. https://10.0.0.1:6443
    #[arg(short, long, env = "NODESTRAP_SERVER")]
    pub server: Option<String>,

    /// Role of this node
    #[arg(short, long, value_enum, env = "NODESTRAP_ROLE")]
    pub role: Option<Role>,

    /// Token for joining the cluster
    #[arg(short, long, env = "NODESTRAP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Initialize a new cluster on this node
    #[arg(long, env = "NODESTRAP_CLUSTER_INIT")]
    pub cluster_init: bool,

    /// Kubernetes version or channel, used when the config sets none
    #[arg(long, env = "NODESTRAP_KUBERNETES_VERSION")]
    pub kubernetes_version: Option<String>,

    /// Regional mirror for images (cn)
    #[arg(long, env = "NODESTRAP_MIRROR")]
    pub mirror: Option<String>,

    /// Give up after this many seconds
    #[arg(long, env = "NODESTRAP_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Container CLI for image instructions
    #[arg(long, env = "NODESTRAP_CONTAINER_CLI", default_value = "docker")]
    pub container_cli: String,
}

#[derive(Args)]
pub struct ProbeArgs {
    /// Plan file whose probes to run, defaults to the plan in the data directory
    #[arg(short, long, env = "NODESTRAP_FILE")]
    pub file: Option<PathBuf>,

    /// State directory holding the plan
    #[arg(long, env = "NODESTRAP_DATA_DIR", default_value = crate::paths::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Seconds between probe rounds
    #[arg(short, long, env = "NODESTRAP_INTERVAL", default_value_t = 5)]
    pub interval: u64,
}

#[derive(Args)]
pub struct GetTokenArgs {
    /// State directory the token was written to
    #[arg(long, env = "NODESTRAP_DATA_DIR", default_value = crate::paths::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

#[derive(Args)]
pub struct InfoArgs {
    /// State directory holding the bootstrap stamps
    #[arg(long, env = "NODESTRAP_DATA_DIR", default_value = crate::paths::DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
}

#[derive(Args)]
pub struct RetryArgs {
    /// Sleep 5 seconds before the first run
    #[arg(long)]
    pub sleep_first: bool,

    /// Command to run
    pub command: String,

    /// Arguments of the command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bootstrap_args() {
        let cli = Cli::try_parse_from([
            "nodestrap",
            "bootstrap",
            "--server",
            "https://host:6443",
            "--token",
            "abc",
            "--role",
            "etcd-control-plane",
        ])
        .unwrap();

        let Command::Bootstrap(args) = cli.command else {
            panic!("expected bootstrap");
        };
        assert_eq!(args.server.as_deref(), Some("https://host:6443"));
        assert_eq!(args.role, Some(Role::EtcdControlPlane));
        assert!(!args.cluster_init);
    }

    #[test]
    fn test_directory_defaults() {
        let cli = Cli::try_parse_from(["nodestrap", "bootstrap", "--config-dir", "/tmp/etc"]).unwrap();
        let Command::Bootstrap(args) = cli.command else {
            panic!("expected bootstrap");
        };
        assert_eq!(args.config_dir, PathBuf::from("/tmp/etc"));

        let cli = Cli::try_parse_from(["nodestrap", "probe"]).unwrap();
        let Command::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.file, None);
        assert_eq!(args.data_dir, PathBuf::from(crate::paths::DEFAULT_DATA_DIR));
    }

    #[test]
    fn test_version_subcommand() {
        let cli = Cli::try_parse_from(["nodestrap", "version"]).unwrap();
        assert!(matches!(cli.command, Command::Version));
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(Cli::try_parse_from(["nodestrap", "bootstrap", "--role", "master"]).is_err());
    }

    #[test]
    fn test_retry_passes_flags_through() {
        let cli = Cli::try_parse_from([
            "nodestrap",
            "retry",
            "--sleep-first",
            "kubectl",
            "apply",
            "--validate=false",
            "-f",
            "x.yaml",
        ])
        .unwrap();

        let Command::Retry(args) = cli.command else {
            panic!("expected retry");
        };
        assert!(args.sleep_first);
        assert_eq!(args.command, "kubectl");
        assert_eq!(args.args, vec!["apply", "--validate=false", "-f", "x.yaml"]);
    }
}
