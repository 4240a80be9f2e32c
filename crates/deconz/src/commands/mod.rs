//! Command dispatch: bridges CLI args -> gateway calls -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod events;
pub mod util;
pub mod watch;

use deconz_core::GatewayConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a gateway-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: GatewayConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Events(args) => events::handle(config, args, global).await,
        // Handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
