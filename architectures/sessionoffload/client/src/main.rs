use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use offload_client::logging::{logging, LogOutput};
use offload_client::{run_session_offload, DEFAULT_ADDR};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const LOG_FORMAT_ENV: &str = "SESSIONOFFLOAD_LOG_FORMAT";
const LOG_FILE_ENV: &str = "SESSIONOFFLOAD_LOG_FILE";
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "sessionoffload-client")]
#[command(about = "Offloads one session and reads back the session table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run_args: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // Prints the help, optionally as markdown. Used for docs generation.
    #[clap(hide = true)]
    PrintAllHelp {
        #[arg(long, required = true)]
        markdown: bool,
    },
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// the address to connect to
    #[arg(long, env = "SESSIONOFFLOAD_ADDR", default_value = DEFAULT_ADDR)]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let run_args = match cli.command {
        Some(Commands::PrintAllHelp { markdown }) => {
            assert!(markdown);
            clap_markdown::print_help_markdown::<Cli>();
            return Ok(());
        }
        None => cli.run_args,
    };

    logging()
        .with_output(LogOutput::from_env(LOG_FORMAT_ENV)?)
        .with_log_file_from_env(LOG_FILE_ENV)
        .init()?;

    let seed = clock_seed();
    info!(seed, addr = %run_args.addr, "Starting session offload client");

    let cancel = CancellationToken::new();
    tokio::spawn(handle_interrupts(cancel.clone()));

    match run_session_offload(&run_args.addr, ChaCha8Rng::seed_from_u64(seed), cancel).await {
        Ok(report) => {
            info!(
                offloaded = report.offload.is_ok(),
                background_notifications = report.background_notifications,
                "Client run finished"
            );
            Ok(())
        }
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    }
}

/// First Ctrl-C cancels the pending request, the second one exits.
async fn handle_interrupts(cancel: CancellationToken) {
    if signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("Interrupted, cancelling the pending request. Press Ctrl-C again to exit");
    cancel.cancel();

    if signal::ctrl_c().await.is_ok() {
        std::process::exit(INTERRUPTED_EXIT_CODE);
    }
}

// seconds since the epoch, seeded once per process
fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
