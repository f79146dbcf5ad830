use tgaudio_core::config::ConfigError;
use tgaudio_core::error::{CoreError, FailureKind};
use tgaudio_core::logging;

mod cli;
mod metadata_lofty;
mod transport_grammers;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    if logging::init_logging().is_err() {
        logging::init_logging_stderr();
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("tgaudio error: {:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

/// Maps an error surfaced at the CLI boundary to one of the codes in the
/// configuration/exit-code table: 0 success, 1 generic, 2 config, 3
/// transport/network, 4 auth.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    if let Some(CoreError::Fatal { kind, .. }) = err.downcast_ref::<CoreError>() {
        return match kind {
            FailureKind::Auth => 4,
            FailureKind::Transient | FailureKind::FileReferenceExpired => 3,
            _ => 1,
        };
    }
    1
}
