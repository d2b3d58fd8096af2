//! Process hardening for a server that keeps secrets in RAM
//!
//! Sets `RLIMIT_CORE` to zero so a crash never writes sealed blobs, derived
//! keys or decrypted payloads into a core file. Failure is reported to the
//! caller and logged; the server keeps running either way.

use std::sync::atomic::{AtomicBool, Ordering};

/// Set once the limit has been applied successfully
static CORE_DUMPS_OFF: AtomicBool = AtomicBool::new(false);

/// Turn off core dumps for this process.
///
/// Call before the first secret is stored. Returns whether core dumps are now
/// off; repeated calls after a success are free.
///
/// # Example
/// ```
/// let _ = shhh_core::memory::disable_core_dumps();
/// ```
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_OFF.load(Ordering::SeqCst) {
        return true;
    }

    let applied = apply_zero_core_limit();
    if applied {
        CORE_DUMPS_OFF.store(true, Ordering::SeqCst);
    }
    applied
}

#[cfg(unix)]
fn apply_zero_core_limit() -> bool {
    let limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid rlimit for the duration of the call
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        log::warn!(
            "can't disable core dumps: {}",
            std::io::Error::last_os_error()
        );
        return false;
    }
    log::debug!("core dumps disabled");
    true
}

#[cfg(not(unix))]
fn apply_zero_core_limit() -> bool {
    log::warn!("core dump prevention not supported on this platform");
    false
}
