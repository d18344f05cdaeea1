//! CLI argument definitions for the Aletheia authority binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Aletheia statement authority tool
#[derive(Parser, Debug)]
#[command(name = "aletheia-auth")]
#[command(about = "Aletheia: manage signing identities and signature requests")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage signing identities
    #[command(subcommand)]
    Identity(IdentityCommand),
    /// Delete persons that have been orphan for longer than the grace period
    Gc,
    /// Work with packed signature requests
    #[command(subcommand)]
    Request(RequestCommand),
}

#[derive(Subcommand, Debug)]
pub enum IdentityCommand {
    /// Generate a signatory and create its person
    Create(IdentityCreateArgs),
    /// List known persons
    List,
}

#[derive(Subcommand, Debug)]
pub enum RequestCommand {
    /// Decode a packed signature request file and list its records
    Inspect(RequestInspectArgs),
}

/// Where the authority store lives and how to open it
#[derive(clap::Args, Debug)]
pub struct StoreArgs {
    /// JSON file holding the authority store
    #[arg(
        short = 's',
        long,
        global = true,
        default_value = "aletheia.json",
        env = "ALETHEIA_STORE"
    )]
    pub store: PathBuf,

    /// JSON configuration file; defaults apply when absent
    #[arg(short = 'c', long, global = true, env = "ALETHEIA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Passphrase protecting encrypted private keys
    #[arg(long, global = true, env = "ALETHEIA_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,
}

/// Arguments for `identity create`
#[derive(clap::Args, Debug)]
pub struct IdentityCreateArgs {
    /// Nick of the new person
    pub nick: String,

    /// Full name
    #[arg(long)]
    pub name: Option<String>,

    /// Email address
    #[arg(long)]
    pub email: Option<String>,

    /// Encrypt the private key under the passphrase
    #[arg(long)]
    pub encrypt: bool,
}

/// Arguments for `request inspect`
#[derive(clap::Args, Debug)]
pub struct RequestInspectArgs {
    /// File containing a packed signature request
    pub file: PathBuf,
}
