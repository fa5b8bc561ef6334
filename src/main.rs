//! valkey-trib - cluster administration for Valkey/Redis.
//!
//! This is the main entry point that:
//! - Parses the subcommand and global flags
//! - Initializes structured logging on stderr
//! - Runs the subcommand and prints its report on stdout
//! - Maps failures and unhealthy reports to exit code 1

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use valkey_trib::client::NodeAddr;
use valkey_trib::commands::{
    self, CreateOptions, RebalanceCommandOptions, Report,
};
use valkey_trib::config::REBALANCE_DEFAULT_THRESHOLD;
use valkey_trib::{Result, TcpCommander, TribConfig};

/// Valkey/Redis cluster administration
#[derive(Parser, Debug)]
#[command(name = "valkey-trib", author, version, about, long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "VALKEY_TRIB_LOG_FORMAT")]
    log_format: LogFormat,

    /// Seconds to wait for a TCP connection
    #[arg(long, global = true, default_value_t = 5, env = "VALKEY_TRIB_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Seconds to wait for a command reply
    #[arg(long, global = true, default_value_t = 60, env = "VALKEY_TRIB_COMMAND_TIMEOUT")]
    command_timeout: u64,

    /// MOVED redirects followed per command
    #[arg(long, global = true, default_value_t = 16, env = "VALKEY_TRIB_MAX_REDIRECTS")]
    max_redirects: usize,

    /// Keys fetched per CLUSTER GETKEYSINSLOT during migration
    #[arg(long, global = true, default_value_t = 10, env = "VALKEY_TRIB_KEYS_BATCH_SIZE")]
    keys_batch_size: u64,

    /// MIGRATE timeout in milliseconds
    #[arg(long, global = true, default_value_t = 10_000, env = "VALKEY_TRIB_MIGRATE_TIMEOUT_MS")]
    migrate_timeout_ms: u64,

    /// Milliseconds between convergence probes while waiting for a join
    #[arg(long, global = true, default_value_t = 1000, env = "VALKEY_TRIB_JOIN_POLL_MS")]
    join_poll_ms: u64,

    /// Give up waiting for a join after this many seconds (waits forever if unset)
    #[arg(long, global = true, env = "VALKEY_TRIB_JOIN_TIMEOUT")]
    join_timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a cluster from empty cluster-enabled nodes
    Create {
        /// Nodes as host:port, at least two
        #[arg(required = true)]
        nodes: Vec<NodeAddr>,

        /// Show the slot allocation without changing anything
        #[arg(long)]
        simulate: bool,

        /// Flush nodes that already hold keys
        #[arg(long)]
        force_flush: bool,
    },

    /// Check slot agreement, open slots and coverage
    Check {
        /// Any node of the cluster
        node: NodeAddr,
    },

    /// Check the cluster and repair open slots
    Fix {
        /// Any node of the cluster
        node: NodeAddr,
    },

    /// Show keys and slots per node
    Info {
        /// Any node of the cluster
        node: NodeAddr,
    },

    /// Move slots so every master holds a share matching its weight
    Rebalance {
        /// Any node of the cluster
        node: NodeAddr,

        /// Show the plan without moving anything
        #[arg(long)]
        simulate: bool,

        /// Give slots to masters that own none
        #[arg(long)]
        use_empty_masters: bool,

        /// Allowed deviation from the target, in percent
        #[arg(long, default_value_t = REBALANCE_DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Weight override as <node id prefix>=<weight>, repeatable
        #[arg(long = "weight", value_parser = parse_weight)]
        weights: Vec<(String, u64)>,
    },

    /// Add an empty node to a cluster
    AddNode {
        /// The node to add, as host:port
        new_node: NodeAddr,

        /// Any node of the cluster
        existing_node: NodeAddr,

        /// Run the checks without sending CLUSTER MEET
        #[arg(long)]
        simulate: bool,
    },

    /// Remove a node without slots from the cluster and shut it down
    DelNode {
        /// Any node of the cluster
        node: NodeAddr,

        /// Full id of the node to remove
        node_id: String,
    },

    /// Run a command on every node
    Call {
        /// Any node of the cluster
        node: NodeAddr,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

fn parse_weight(value: &str) -> std::result::Result<(String, u64), String> {
    let (prefix, weight) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <node id prefix>=<weight>, got '{}'", value))?;
    let weight = weight
        .parse()
        .map_err(|e| format!("invalid weight '{}': {}", weight, e))?;
    Ok((prefix.to_string(), weight))
}

impl Cli {
    fn config(&self) -> TribConfig {
        TribConfig::default()
            .with_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_command_timeout(Duration::from_secs(self.command_timeout))
            .with_max_redirects(self.max_redirects)
            .with_keys_batch_size(self.keys_batch_size)
            .with_migrate_timeout_ms(self.migrate_timeout_ms)
            .with_join_poll_interval(Duration::from_millis(self.join_poll_ms))
            .with_join_timeout(self.join_timeout.map(Duration::from_secs))
    }

    fn init_tracing(&self) {
        let default_directive = if self.verbose {
            "valkey_trib=debug"
        } else if self.quiet {
            "valkey_trib=warn"
        } else {
            "valkey_trib=info"
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        match self.log_format {
            LogFormat::Text => builder.init(),
            LogFormat::Json => builder.json().init(),
        }
    }
}

async fn run(client: &TcpCommander, config: &TribConfig, command: Commands) -> Result<Box<dyn Report>> {
    let report: Box<dyn Report> = match command {
        Commands::Create {
            nodes,
            simulate,
            force_flush,
        } => {
            let options = CreateOptions {
                simulate,
                force_flush,
            };
            Box::new(commands::create_cluster(client, config, &nodes, options).await?)
        }
        Commands::Check { node } => {
            Box::new(commands::check_cluster_cmd(client, config, &node, false).await?)
        }
        Commands::Fix { node } => {
            Box::new(commands::check_cluster_cmd(client, config, &node, true).await?)
        }
        Commands::Info { node } => Box::new(commands::show_cluster_info(client, &node).await?),
        Commands::Rebalance {
            node,
            simulate,
            use_empty_masters,
            threshold,
            weights,
        } => {
            let options = RebalanceCommandOptions {
                simulate,
                use_empty_masters,
                threshold,
                weights,
            };
            Box::new(commands::rebalance_cluster(client, config, &node, &options).await?)
        }
        Commands::AddNode {
            new_node,
            existing_node,
            simulate,
        } => Box::new(
            commands::add_node(client, config, &new_node, &existing_node, simulate).await?,
        ),
        Commands::DelNode { node, node_id } => {
            Box::new(commands::del_node(client, &node, &node_id).await?)
        }
        Commands::Call { node, command } => {
            Box::new(commands::call_cluster(client, &node, &command).await?)
        }
    };
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.init_tracing();

    let config = cli.config();
    debug!(?config, "Starting valkey-trib");
    let client = TcpCommander::new(config.clone());

    match run(&client, &config, cli.command).await {
        Ok(report) => {
            print!("{}", report);
            if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            if e.is_connectivity() {
                error!(error = %e, "Node unreachable");
            }
            eprintln!("[ERR] {}", e);
            ExitCode::FAILURE
        }
    }
}
