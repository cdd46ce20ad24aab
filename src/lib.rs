pub mod commands;
pub mod config;
pub mod error;
pub mod initiator;
pub mod logger;
pub mod peer;
pub mod relay;
pub mod responder;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::{RelayConfig, SessionPolicy};
pub use error::{Error, Result};
pub use initiator::{Initiator, InitiatorSession};
pub use responder::{Answer, Responder};
pub use session::{SessionInfo, SessionRegistry};
pub use signaling::build_router;

use clap::Parser;
use commands::Cli;

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(&cli.log_level, !cli.quiet);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(commands::dispatch(cli.command))
}
