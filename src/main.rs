use beacon_scan::app::{Options, RealScanner, run_with_io};
use clap::Parser;
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr so stdout carries only the device summary.
/// `RUST_LOG` overrides the default level.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "info,beacon_scan=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut err = std::io::stderr();

    match run_with_io(options, &RealScanner, &mut out, &mut err).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            log::error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
