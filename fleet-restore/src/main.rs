use clap::Parser;
use fleet_core::fleet_error;
use fleet_restore::cli::{self, Args};
use fleet_restore::report::EXIT_ABORTED;
use fleet_restore::CancelToken;
use tracing::warn;

/// SIGINT/SIGTERM request cancellation; the run stops at the next step
/// boundary and still removes its extraction directory.
#[cfg(unix)]
fn install_signal_handlers(cancel: &CancelToken) {
    use signal_hook::consts::{SIGINT, SIGTERM};

    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, cancel.flag()) {
            warn!("cannot install handler for signal {}: {}", signal, e);
        }
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_cancel: &CancelToken) {}

fn main() {
    let log_guard = fleet_logging::init_subscriber();
    let args = Args::parse();

    let cancel = CancelToken::new();
    install_signal_handlers(&cancel);

    let code = match cli::run(args, cancel) {
        Ok(code) => code,
        Err(e) => {
            fleet_error!("{:#}", e);
            EXIT_ABORTED
        }
    };

    drop(log_guard);
    std::process::exit(code);
}
