use exchange_cli::{run_cli, CliError};
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!("CLI error: {}", e);
        eprintln!("error: {}", e);

        // Exit with appropriate code based on error type
        let exit_code = match e {
            CliError::Configuration(_) | CliError::Logging { .. } => 1,
            CliError::Connection(_) => 2,
            CliError::Request(_) | CliError::Responder(_) | CliError::Transport(_) => 3,
            CliError::Io(_) => 4,
        };

        std::process::exit(exit_code);
    }
}
