//! Shared scaffolding for the shim lifecycle tests.
//!
//! The shim is process-wide state configured through the process
//! environment, so every test that activates it serializes on one lock and
//! scopes its variable edits to the session guard's lifetime. Allocations go
//! through the instrumented entry points directly; in a test build the
//! allocator symbols are not interposed, so the test runtime itself stays
//! out of the books.

#![allow(dead_code)]

use std::ffi::c_void;

use parking_lot::{Mutex, MutexGuard};

static SHIM_LOCK: Mutex<()> = Mutex::new(());

/// One serialized activation of the shim; deactivates and restores the
/// environment on drop.
pub struct ShimSession {
    _lock: MutexGuard<'static, ()>,
    vars: Vec<&'static str>,
}

impl Drop for ShimSession {
    fn drop(&mut self) {
        overthrower::deactivate();
        for name in &self.vars {
            // SAFETY: still behind the shim lock; nothing reads the
            // environment concurrently.
            unsafe { std::env::remove_var(name) };
        }
    }
}

/// Take the shim lock without activating yet: for tests whose setup must
/// allocate while the shim is guaranteed inactive.
pub fn lock_shim() -> MutexGuard<'static, ()> {
    SHIM_LOCK.lock()
}

pub fn activate_with(vars: &[(&'static str, String)]) -> ShimSession {
    activate_locked(lock_shim(), vars)
}

pub fn activate_locked(
    lock: MutexGuard<'static, ()>,
    vars: &[(&'static str, String)],
) -> ShimSession {
    for (name, value) in vars {
        // SAFETY: the shim lock serializes every test that touches the
        // activation environment.
        unsafe { std::env::set_var(name, value) };
    }
    overthrower::activate();
    ShimSession {
        _lock: lock,
        vars: vars.iter().map(|(name, _)| *name).collect(),
    }
}

pub fn none_session() -> ShimSession {
    activate_with(&[("OVERTHROWER_STRATEGY", "3".into())])
}

pub fn step_session(delay: u32) -> ShimSession {
    activate_with(&[
        ("OVERTHROWER_STRATEGY", "1".into()),
        ("OVERTHROWER_DELAY", delay.to_string()),
    ])
}

pub fn pulse_session(delay: u32, duration: u32) -> ShimSession {
    activate_with(&[
        ("OVERTHROWER_STRATEGY", "2".into()),
        ("OVERTHROWER_DELAY", delay.to_string()),
        ("OVERTHROWER_DURATION", duration.to_string()),
    ])
}

pub fn random_session(seed: u32, duty_cycle: u32) -> ShimSession {
    activate_with(&[
        ("OVERTHROWER_STRATEGY", "0".into()),
        ("OVERTHROWER_SEED", seed.to_string()),
        ("OVERTHROWER_DUTY_CYCLE", duty_cycle.to_string()),
    ])
}

pub fn malloc(size: usize) -> *mut c_void {
    overthrower::entry::fault_malloc(size)
}

pub fn free(pointer: *mut c_void) {
    // SAFETY: every pointer handed to this helper came from `malloc` above.
    unsafe { overthrower::entry::fault_free(pointer) }
}

/// Allocate-and-release loop that must survive injected OOM.
pub fn fragile_code(iterations: usize) {
    for _ in 0..iterations {
        let pointer = malloc(128);
        if !pointer.is_null() {
            free(pointer);
        }
    }
}

/// One `+` (success) or `-` (failure) per allocation attempt.
pub fn failure_pattern(iterations: usize) -> String {
    let mut pattern = String::with_capacity(iterations);
    for _ in 0..iterations {
        let pointer = malloc(128);
        pattern.push(if pointer.is_null() { '-' } else { '+' });
        if !pointer.is_null() {
            free(pointer);
        }
    }
    pattern
}

pub fn failure_count(iterations: usize) -> usize {
    failure_pattern(iterations).matches('-').count()
}

/// `"+" * delay + "-" * duration`, padded with `+` to `iterations`: the
/// shape every step/pulse run is checked against (a step is a pulse that
/// never ends).
pub fn expected_pattern(iterations: usize, delay: usize, duration: usize) -> String {
    let mut pattern = String::with_capacity(iterations);
    while pattern.len() < delay.min(iterations) {
        pattern.push('+');
    }
    while pattern.len() < (delay + duration).min(iterations) {
        pattern.push('-');
    }
    while pattern.len() < iterations {
        pattern.push('+');
    }
    pattern
}
