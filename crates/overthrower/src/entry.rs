//! The instrumented allocation entry points.
//!
//! [`fault_malloc`], [`fault_free`] and [`fault_realloc`] carry the full
//! semantics and are what the integration tests drive. The exported C
//! symbols wrapping them are compiled only into optimized builds, so debug
//! and test binaries do not route their own runtime through the shim; on
//! Mach-O the wrappers keep their own names and a dyld interpose table does
//! the rewiring instead.

use std::ffi::c_void;
use std::ptr;

use overthrower_core::config::Verbosity;
use overthrower_core::knowledge::SiteClass;
use overthrower_core::registry::BlockInfo;

use crate::{diag, platform, stack, state, tls};

/// Classify the current call site, unless this thread is already inside the
/// walker: reentrant allocations are treated as white-listed so they can
/// never fail, and the forced pause slot keeps them out of the books.
fn classify_call_site() -> SiteClass {
    if tls::is_tracing() {
        return SiteClass {
            white_listed: true,
            ignored: false,
        };
    }
    tls::traced(stack::search_knowledge_base)
}

/// Instrumented `malloc`.
///
/// Not activated: a straight pass-through. Activated: the call site is
/// classified, pauses are honored, a sequence number is claimed, and the
/// configured policy decides between `NULL` + `ENOMEM` and a real block,
/// which is then tracked unless the site is on the ignore list.
pub fn fault_malloc(size: usize) -> *mut c_void {
    #[cfg(target_os = "macos")]
    {
        if tls::thread_state_initializing() {
            return platform::non_failing_malloc(size);
        }
        tls::warm_thread_state();
    }

    platform::ensure_initialized();

    if !state::activated() {
        return platform::non_failing_malloc(size);
    }

    let site = classify_call_site();

    let paused = tls::with(|thread| {
        if thread.pause_remaining() > 0 {
            thread.consume_pause();
            true
        } else {
            false
        }
    });
    if paused {
        return platform::non_failing_malloc(size);
    }

    let seq_num = state::next_seq_num();

    if site.white_listed || size == 0 {
        return platform::non_failing_malloc(size);
    }

    if state::policy().should_fail(seq_num, state::rng()) {
        if state::verbosity() >= Verbosity::FailedAllocations {
            tls::traced(|| {
                diag::trace_allocation("Failed", seq_num);
                stack::print_call_stack();
            });
        }
        platform::set_errno(libc::ENOMEM);
        return ptr::null_mut();
    }

    let pointer = platform::non_failing_malloc(size);
    if pointer.is_null() {
        // Real OOM; nothing to track.
        return ptr::null_mut();
    }

    if !site.ignored {
        let info = BlockInfo { seq_num, size };
        if state::registry().insert(pointer as usize, info).is_err() {
            // The registry itself hit a real OOM. The block must not escape
            // untracked, so the caller sees the failure instead.
            platform::non_failing_free(pointer);
            platform::set_errno(libc::ENOMEM);
            return ptr::null_mut();
        }
        if state::verbosity() >= Verbosity::AllAllocations {
            tls::traced(|| {
                diag::trace_allocation("Successful", seq_num);
                stack::print_call_stack();
            });
        }
    }

    pointer
}

/// Instrumented `free`.
///
/// `errno` is preserved across the registry erase: callers legitimately
/// inspect it after a failed `malloc` even if a cleanup `free` runs in
/// between.
///
/// # Safety
///
/// `pointer` must be NULL or an allocation obtained from the instrumented
/// `malloc`/`realloc` that has not been freed yet.
pub unsafe fn fault_free(pointer: *mut c_void) {
    if pointer.is_null() {
        // Nothing to do, and possibly nothing to do it with: the native
        // free is only resolved on the first allocation.
        return;
    }

    if state::activated() {
        let saved_errno = platform::errno();
        state::registry().remove(pointer as usize);
        platform::set_errno(saved_errno);
    }

    platform::non_failing_free(pointer);
}

/// Instrumented `realloc`.
///
/// Tracked pointers are moved through the instrumented `malloc`/`free`
/// pair, so growth is subject to the full injection semantics; a failed
/// inner allocation leaves the old block untouched. Untracked pointers
/// (allocated before activation or by an ignored site) go to the native
/// `realloc` and stay untracked.
///
/// # Safety
///
/// Standard C `realloc` contract: `pointer` is NULL or live, and never used
/// again after a successful move.
pub unsafe fn fault_realloc(pointer: *mut c_void, size: usize) -> *mut c_void {
    if pointer.is_null() {
        return fault_malloc(size);
    }
    if size == 0 {
        // SAFETY: non-null live pointer per the caller contract.
        unsafe { fault_free(pointer) };
        return ptr::null_mut();
    }

    platform::ensure_initialized();

    let tracked = if state::activated() {
        state::registry().lookup(pointer as usize)
    } else {
        None
    };
    let Some(info) = tracked else {
        // SAFETY: forwarded caller contract.
        return unsafe { platform::native_realloc(pointer, size) };
    };

    let new_pointer = fault_malloc(size);
    if new_pointer.is_null() {
        return ptr::null_mut();
    }

    // SAFETY: both blocks are live and at least min(old, new) bytes long.
    unsafe {
        ptr::copy_nonoverlapping(
            pointer.cast::<u8>(),
            new_pointer.cast::<u8>(),
            info.size.min(size),
        );
    }
    // SAFETY: the old block is live and no longer referenced.
    unsafe { fault_free(pointer) };

    new_pointer
}

/// Interposed `malloc` (ELF). The loader resolves the host's references to
/// this export because the shim precedes libc in the search order.
///
/// # Safety
///
/// Standard C `malloc` contract.
#[cfg(not(target_os = "macos"))]
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    fault_malloc(size)
}

/// Interposed `realloc` (ELF).
///
/// # Safety
///
/// Standard C `realloc` contract.
#[cfg(not(target_os = "macos"))]
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(pointer: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { fault_realloc(pointer, size) }
}

/// Interposed `free` (ELF).
///
/// # Safety
///
/// Standard C `free` contract.
#[cfg(not(target_os = "macos"))]
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(pointer: *mut c_void) {
    // SAFETY: forwarded caller contract.
    unsafe { fault_free(pointer) }
}

/// Interposed `malloc` (Mach-O; reached through the interpose table below).
///
/// # Safety
///
/// Standard C `malloc` contract.
#[cfg(target_os = "macos")]
pub unsafe extern "C" fn my_malloc(size: usize) -> *mut c_void {
    fault_malloc(size)
}

/// Interposed `realloc` (Mach-O).
///
/// # Safety
///
/// Standard C `realloc` contract.
#[cfg(target_os = "macos")]
pub unsafe extern "C" fn my_realloc(pointer: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { fault_realloc(pointer, size) }
}

/// Interposed `free` (Mach-O).
///
/// # Safety
///
/// Standard C `free` contract.
#[cfg(target_os = "macos")]
pub unsafe extern "C" fn my_free(pointer: *mut c_void) {
    // SAFETY: forwarded caller contract.
    unsafe { fault_free(pointer) }
}

// dyld consumes this table and rewrites every call to the original symbol
// (outside this image) into a call to the substitute.
#[cfg(all(target_os = "macos", not(debug_assertions)))]
mod interpose {
    use super::{my_free, my_malloc, my_realloc};

    #[repr(C)]
    struct InterposeEntry {
        substitute: *const (),
        original: *const (),
    }

    // SAFETY: immutable function pointers, fixed at load time.
    unsafe impl Sync for InterposeEntry {}

    #[used]
    #[unsafe(link_section = "__DATA,__interpose")]
    static INTERPOSED_ALLOCATORS: [InterposeEntry; 3] = [
        InterposeEntry {
            substitute: my_malloc as *const (),
            original: libc::malloc as *const (),
        },
        InterposeEntry {
            substitute: my_realloc as *const (),
            original: libc::realloc as *const (),
        },
        InterposeEntry {
            substitute: my_free as *const (),
            original: libc::free as *const (),
        },
    ];
}
