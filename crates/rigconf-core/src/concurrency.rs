use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Route Ctrl-C / SIGTERM into `exit_requested`.
///
/// The monitor loop observes the flag and performs a controlled stop. A second
/// signal while the first is still being handled exits immediately.
pub fn install_signal_handler(exit_requested: Arc<AtomicBool>) {
    let _ = ctrlc::set_handler(move || {
        if exit_requested.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        exit_requested.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, stopping the running configuration...");
    });
}
