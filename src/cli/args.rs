//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Strata - incremental OCI image builder
///
/// Builds a stack of named layers into an OCI image layout, rebuilding
/// only the layers whose declaration, parent or imported files changed.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .strata.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,

    /// Build cache and import directory
    #[arg(long, global = true, value_name = "DIR")]
    pub strata_dir: Option<PathBuf>,

    /// OCI image layout directory
    #[arg(long, global = true, value_name = "DIR")]
    pub oci_dir: Option<PathBuf>,

    /// Root filesystem trees directory
    #[arg(long, global = true, value_name = "DIR")]
    pub roots_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the layers of a stackfile
    Build(BuildArgs),

    /// List the images in the OCI layout
    Inspect(InspectArgs),

    /// Remove roots, OCI layout and build cache
    Clean(CleanArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Check that the build tools are installed
    Status,
}

#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Stackfile to build (defaults to build.stackfile, strata.yaml)
    #[arg(short = 'f', long = "stackfile", value_name = "FILE")]
    pub stackfile: Option<PathBuf>,

    /// Discard the build cache and imports before building
    #[arg(long)]
    pub no_cache: bool,

    /// Replace $NAME / ${NAME} in the stackfile (repeatable)
    #[arg(long = "substitute", value_name = "NAME=VALUE")]
    pub substitute: Vec<String>,

    /// Command to run inside the layer's root when its commands fail
    #[arg(long, value_name = "COMMAND")]
    pub on_run_failure: Option<String>,

    /// Leave storage attached after the build
    #[arg(long)]
    pub leave_unladen: bool,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Only show this image
    pub name: Option<String>,

    /// Print manifests and configs as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Keep the build cache and imports
    #[arg(long)]
    pub keep_cache: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., storage.backend)
        key: String,
        /// Value to set
        value: String,
        /// Write to project-local .strata.toml instead of global config
        #[arg(long)]
        local: bool,
    },
}
