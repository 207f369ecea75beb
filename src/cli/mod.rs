// src/cli/mod.rs
use crate::cli::args::{Cli, Commands};
use crate::cli::error::CliResult;
use crate::infrastructure::di::ServiceContainer;

pub mod args;
pub mod error;
pub mod import_commands;

pub fn execute_command(cli: Cli, services: &ServiceContainer) -> CliResult<()> {
    match cli.command {
        Some(Commands::Import {
            feed,
            force,
            follow,
        }) => import_commands::import(services, &feed, force, follow),
        Some(Commands::Resume {
            feed,
            token,
            follow,
        }) => import_commands::resume(services, &feed, &token, follow),
        Some(Commands::Status { feed, is_json }) => {
            import_commands::status(services, &feed, is_json)
        }
        Some(Commands::Reset { feed }) => import_commands::reset(services, &feed),
        Some(Commands::Kill { minutes, clear }) => {
            import_commands::kill(services, minutes, clear)
        }
        None => Ok(()),
    }
}
