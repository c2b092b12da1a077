//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueHint};

/// Tree repositories over relational tables: closure table, nested set and materialized path
#[derive(Parser, Debug)]
#[command(name = "arborist")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Turn debugging information on (repeat for more: -d info, -dd debug, -ddd trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub debug: u8,

    /// Project directory holding .arborist.toml (default: cwd)
    #[arg(short = 'C', long, global = true, value_hint = ValueHint::DirPath)]
    pub project_dir: Option<PathBuf>,

    /// Explicit config file, replaces <project_dir>/.arborist.toml
    #[arg(long, global = true, env = "ARBORIST_CONFIG", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Entity name plus primary key; composite keys are comma-separated.
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    /// Entity name as configured
    pub entity: String,
    /// Primary key, e.g. `7` or `7,eu`
    pub key: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the tables of all configured entities
    Init,

    /// Insert an entity, optionally below a parent
    Add {
        #[command(flatten)]
        target: Target,
        /// Parent key (default: new root)
        #[arg(short, long)]
        parent: Option<String>,
        /// Data column, repeatable: --set name=Books
        #[arg(short, long = "set", value_name = "COLUMN=VALUE")]
        values: Vec<String>,
    },

    /// Show a single entity
    Get {
        #[command(flatten)]
        target: Target,
    },

    /// List entities without a parent
    Roots {
        /// Entity name as configured
        entity: String,
    },

    /// Print every tree of an entity
    Trees {
        /// Entity name as configured
        entity: String,
    },

    /// Descendants of an entity
    Descendants {
        #[command(flatten)]
        target: Target,
        /// Print as tree rooted at the entity
        #[arg(short, long, conflicts_with = "count")]
        tree: bool,
        /// Print the number of descendants only
        #[arg(short, long)]
        count: bool,
    },

    /// Ancestors of an entity
    Ancestors {
        #[command(flatten)]
        target: Target,
        /// Print as chain from the root down to the entity
        #[arg(short, long, conflicts_with = "count")]
        tree: bool,
        /// Print the number of ancestors only
        #[arg(short, long)]
        count: bool,
    },

    /// Re-parent an entity with its subtree
    #[command(group(ArgGroup::new("destination").required(true).args(["to", "root"])))]
    Move {
        #[command(flatten)]
        target: Target,
        /// New parent key
        #[arg(long)]
        to: Option<String>,
        /// Make the entity a root
        #[arg(long)]
        root: bool,
    },

    /// Print the composable relatives query of an entity
    Query {
        #[command(flatten)]
        target: Target,
        /// Ancestors instead of descendants
        #[arg(short, long)]
        ancestors: bool,
    },

    /// Manage settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show merged config
    Show,

    /// Show config paths
    Path,

    /// Print a config template
    Template,
}
