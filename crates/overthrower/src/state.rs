//! Process-wide runtime state: the activation flag, the configuration in
//! force and the registry of live tracked blocks.
//!
//! Configuration scalars are individual atomics, written only by
//! `activate`/`deactivate` and read relaxed on the hot path. A test run
//! configures once and then hammers `malloc`, so while it matters these
//! behave as constants; a stale read during the activation edge itself is
//! harmless.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use overthrower_core::config::{Settings, Verbosity};
use overthrower_core::policy::{FailurePolicy, Strategy};
use overthrower_core::registry::AllocationRegistry;
use overthrower_core::rng::Lcg;

use crate::platform::NativeAlloc;

static ACTIVATED: AtomicBool = AtomicBool::new(false);
static SELF_OVERTHROW: AtomicBool = AtomicBool::new(false);
static STRATEGY: AtomicU8 = AtomicU8::new(Strategy::None as u8);
static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::No as u8);
static DUTY_CYCLE: AtomicU32 = AtomicU32::new(1024);
static DELAY: AtomicU32 = AtomicU32::new(0);
static DURATION: AtomicU32 = AtomicU32::new(1);

static MALLOC_COUNTER: AtomicU32 = AtomicU32::new(0);

static RNG: Lcg = Lcg::new(0);

static REGISTRY: AllocationRegistry<NativeAlloc> = AllocationRegistry::new_in(NativeAlloc);

pub(crate) fn activated() -> bool {
    ACTIVATED.load(Ordering::Acquire)
}

pub(crate) fn set_activated(on: bool) {
    ACTIVATED.store(on, Ordering::Release);
}

pub(crate) fn self_overthrow() -> bool {
    SELF_OVERTHROW.load(Ordering::Relaxed)
}

pub(crate) fn clear_self_overthrow() {
    SELF_OVERTHROW.store(false, Ordering::Relaxed);
}

pub(crate) fn verbosity() -> Verbosity {
    Verbosity::from_u32(u32::from(VERBOSITY.load(Ordering::Relaxed)))
}

pub(crate) fn rng() -> &'static Lcg {
    &RNG
}

pub(crate) fn registry() -> &'static AllocationRegistry<NativeAlloc> {
    &REGISTRY
}

/// Claim the next allocation sequence number.
pub(crate) fn next_seq_num() -> u32 {
    MALLOC_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn reset_counter() {
    MALLOC_COUNTER.store(0, Ordering::Relaxed);
}

/// Install a fresh activation-time configuration. The activation flag is
/// flipped separately, after everything else is in place.
pub(crate) fn store_settings(settings: &Settings) {
    STRATEGY.store(settings.strategy as u8, Ordering::Relaxed);
    DUTY_CYCLE.store(settings.duty_cycle, Ordering::Relaxed);
    DELAY.store(settings.delay, Ordering::Relaxed);
    DURATION.store(settings.duration, Ordering::Relaxed);
    SELF_OVERTHROW.store(settings.self_overthrow, Ordering::Relaxed);
    VERBOSITY.store(settings.verbosity as u8, Ordering::Relaxed);
    RNG.reseed(settings.seed);
}

/// The failure policy currently in force.
pub(crate) fn policy() -> FailurePolicy {
    match Strategy::from_u32(u32::from(STRATEGY.load(Ordering::Relaxed))) {
        Strategy::Random => FailurePolicy::Random {
            duty_cycle: DUTY_CYCLE.load(Ordering::Relaxed),
        },
        Strategy::Step => FailurePolicy::Step {
            delay: DELAY.load(Ordering::Relaxed),
        },
        Strategy::Pulse => FailurePolicy::Pulse {
            delay: DELAY.load(Ordering::Relaxed),
            duration: DURATION.load(Ordering::Relaxed),
        },
        Strategy::None => FailurePolicy::None,
    }
}
