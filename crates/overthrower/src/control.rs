//! Activation lifecycle and the host-facing control API.
//!
//! The C symbols (`activateOverthrower` and friends) are what a preloading
//! test harness resolves; the Rust functions underneath are the same
//! operations for in-process use.

use std::ffi::c_uint;

use overthrower_core::config::Settings;

use crate::{diag, state, tls};

/// Begin failure injection and leak tracking.
///
/// Reads the `OVERTHROWER_*` environment, reseeds the generator and resets
/// the allocation sequence counter. Calling it while already active simply
/// installs a fresh configuration; blocks tracked so far are carried over.
pub fn activate() {
    #[cfg(target_os = "macos")]
    prewarm_stdio();

    state::reset_counter();

    diag::activation_banner();
    let settings = Settings::from_env();

    state::store_settings(&settings);
    state::set_activated(true);
}

/// Stop injecting and report.
///
/// Returns the number of tracked blocks that were never freed, printing one
/// line per block. Deactivating an inactive shim reports zero.
pub fn deactivate() -> u32 {
    state::set_activated(false);
    state::clear_self_overthrow();
    tls::with(|thread| thread.reset());

    diag::deactivation_banner();

    let leaked = state::registry().drain();
    if leaked.is_empty() {
        return 0;
    }
    diag::leak_report(&leaked);
    leaked.len() as u32
}

/// Let the next `duration` allocations on this thread pass unharmed; `0`
/// pauses until the matching [`resume`]. Pausing is strictly per-thread.
pub fn pause(duration: u32) {
    #[cfg(target_os = "macos")]
    tls::warm_thread_state();

    let duration = if duration == 0 {
        tls::PAUSE_INDEFINITELY
    } else {
        duration
    };
    let pushed = tls::with(|thread| thread.push_pause(duration));
    if !pushed {
        diag::pause_overflow();
    }
}

/// Undo one [`pause`] level.
pub fn resume() {
    let popped = tls::with(|thread| thread.pop_pause());
    if !popped {
        diag::pause_underflow();
    }
}

/// C entry point for [`activate`].
#[unsafe(export_name = "activateOverthrower")]
pub extern "C" fn activate_overthrower() {
    activate();
}

/// C entry point for [`deactivate`].
#[unsafe(export_name = "deactivateOverthrower")]
pub extern "C" fn deactivate_overthrower() -> c_uint {
    deactivate()
}

/// C entry point for [`pause`].
#[unsafe(export_name = "pauseOverthrower")]
pub extern "C" fn pause_overthrower(duration: c_uint) {
    pause(duration);
}

/// C entry point for [`resume`].
#[unsafe(export_name = "resumeOverthrower")]
pub extern "C" fn resume_overthrower() {
    resume();
}

/// Number formatting allocates its buffers lazily, and on Mach-O that first
/// use would otherwise land mid-injection, inside a diagnostic, where the
/// allocation is allowed to fail. A thousand throwaway conversions before
/// the activation flag flips force those buffers into existence while
/// allocations still cannot fail.
#[cfg(target_os = "macos")]
fn prewarm_stdio() {
    use std::fmt::Write as _;

    let mut scratch = String::new();
    for i in 0..1000u64 {
        scratch.clear();
        let _ = write!(
            scratch,
            "{}{}",
            22_708_089_u64.wrapping_mul(i * i),
            22_708_089.862_725_008_f64 * (i * i) as f64
        );
    }
    std::hint::black_box(&scratch);
}

/// Load-time banner; runs before `main`.
#[used]
#[cfg_attr(not(target_os = "macos"), unsafe(link_section = ".init_array"))]
#[cfg_attr(target_os = "macos", unsafe(link_section = "__DATA,__mod_init_func"))]
static BANNER: unsafe extern "C" fn() = {
    unsafe extern "C" fn banner() {
        diag::load_banner();
    }
    banner
};

/// Unload safety net: a still-active shim is deactivated on the way out so
/// the leak report is never silently lost.
#[used]
#[cfg_attr(not(target_os = "macos"), unsafe(link_section = ".fini_array"))]
#[cfg_attr(target_os = "macos", unsafe(link_section = "__DATA,__mod_term_func"))]
static SHUTDOWN: unsafe extern "C" fn() = {
    unsafe extern "C" fn shutdown() {
        if state::activated() {
            diag::implicit_deactivation();
            deactivate();
        }
    }
    shutdown
};
