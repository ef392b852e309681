//! Stageset CLI: the `stageset` command.

mod cli;
mod commands;
mod config;
mod support;

use clap::Parser;
use cli::{Cli, Commands};
use support::{Context, or_exit};

fn main() {
    support::init_tracing();
    let cli = Cli::parse();
    let json_output = cli.global.json;
    let ctx = or_exit(Context::from_args(&cli.global), json_output);

    let result = match cli.command {
        Commands::Object { command } => commands::object::run(&ctx, command),
        Commands::Changeset { command } => commands::changeset::run(&ctx, command),
    };
    or_exit(result, json_output);
}
