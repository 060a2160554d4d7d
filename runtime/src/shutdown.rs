use std::sync::atomic::{AtomicBool, Ordering};

static REQUESTED: AtomicBool = AtomicBool::new(false);

/// Installs a `SIGINT`/Ctrl+C handler that flips [`requested`] instead of terminating the
/// process, so a transport's worker threads can drain and exit cleanly.
pub fn install() -> Result<(), ctrlc::Error> {
	ctrlc::set_handler(|| REQUESTED.store(true, Ordering::Relaxed))
}

/// Whether a shutdown has been requested since the process started.
pub fn requested() -> bool {
	REQUESTED.load(Ordering::Relaxed)
}
