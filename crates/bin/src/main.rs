use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;
mod store;

use cli::{Cli, Commands, IdentityCommand, RequestCommand};
use output::OutputFormat;
use store::Store;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so command output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("aletheia_authority=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from_json_flag(cli.json);

    match &cli.command {
        Commands::Identity(IdentityCommand::Create(args)) => {
            let store = Store::open(&cli.store)?;
            commands::identity::create(&store, args, format)
        }
        Commands::Identity(IdentityCommand::List) => {
            let store = Store::open(&cli.store)?;
            commands::identity::list(&store, format)
        }
        Commands::Gc => {
            let store = Store::open(&cli.store)?;
            commands::gc::run(&store, format)
        }
        Commands::Request(RequestCommand::Inspect(args)) => {
            commands::request::inspect(args, format)
        }
    }
}
