use clap::Parser;
use climate_beacon_listener::app::{Options, RunError, run_with_io};
use climate_beacon_listener::scanner::{self, EVENT_CHANNEL_BUFFER_SIZE};
use std::panic::{self, PanicHookInfo};
use tokio::sync::mpsc;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Initialize logging to stderr; `RUST_LOG` overrides the level chosen here.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

/// Resolves on Ctrl-C. If the signal handler cannot be installed the
/// listener runs until the event stream ends.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("interrupted, shutting down");
}

/// Open the selected backend and run the listener until interrupted.
async fn run(options: Options) -> Result<(), RunError> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);
    let source = scanner::open_source(options.backend, tx).await?;

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    run_with_io(
        options,
        source,
        rx,
        ctrl_c(),
        &mut stdout.lock(),
        &mut stderr.lock(),
    )
    .await?;

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, Telegraf execd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            log::error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
