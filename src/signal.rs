//! Convenience signal-intercept adaptor: lets a caller ask the library to
//! install a handler for a given Unix signal that sends a graceful-shutdown
//! request to a [`crate::finalizer::Finalizer`]-driven instance instead of
//! terminating the process outright.
//!
//! Grounded on `cw_register_signal_handler`/`cw_unregister_signal_handler`
//! of the C original; `signal-hook` replaces the original's raw `sigaction`
//! plumbing with the safe, already-idiomatic crate the wider example pack
//! reaches for when it needs to intercept process signals.

use std::sync::Arc;

use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;

use crate::error::{CwError, CwResult};

/// Signals this crate is willing to intercept on the caller's behalf. The
/// original supported the same small set appropriate to a foreground
/// terminal program: interrupt and terminate requests, but not e.g.
/// `SIGKILL`, which cannot be intercepted at all.
pub fn is_interceptable(signal: i32) -> bool {
    matches!(signal, SIGINT | SIGTERM | SIGHUP)
}

/// Spawn a background thread that waits for any of `signals` and invokes
/// `on_signal` once per delivery, passing the signal number received.
/// Returns a join handle the caller can detach or keep for shutdown.
pub fn install_handler(
    signals: &[i32],
    on_signal: Arc<dyn Fn(i32) + Send + Sync>,
) -> CwResult<std::thread::JoinHandle<()>> {
    for &signal in signals {
        if !is_interceptable(signal) {
            return Err(CwError::InvalidArgument { field: "signal", value: signal as i64 });
        }
    }

    let mut registered = Signals::new(signals).map_err(CwError::Io)?;
    let handle = std::thread::spawn(move || {
        for signal in registered.forever() {
            on_signal(signal);
        }
    });
    Ok(handle)
}
