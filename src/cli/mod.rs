pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kubemeta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Kubernetes cluster metadata for monitoring agents", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to the YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Map the pods of every node (or one node) to their services")]
    Svcmap {
        #[arg(help = "Only show this node")]
        node: Option<String>,
    },
    #[command(about = "Show the labels of a node")]
    NodeLabels {
        #[arg(help = "Node name")]
        node: String,
    },
    #[command(about = "Show the health of the control plane components")]
    ComponentStatuses,
    #[command(about = "Show the namespace used for the agent's own resources")]
    Namespace,
    #[command(about = "Read or write a token in the token ConfigMap")]
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
pub enum TokenAction {
    #[command(about = "Print a token and whether it is still fresh")]
    Get {
        #[arg(help = "Token name")]
        name: String,

        #[arg(long, default_value_t = 60, help = "Maximum token age in seconds")]
        max_age_secs: u64,
    },
    #[command(about = "Store a token value with the current time")]
    Set {
        #[arg(help = "Token name")]
        name: String,

        #[arg(help = "Token value")]
        value: String,
    },
}
