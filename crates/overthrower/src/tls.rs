//! Per-thread shim state: the reentrancy flag and the pause stack.
//!
//! Nothing here is shared between threads, so plain `Cell`s suffice. The
//! state deliberately avoids `RefCell`: the stack walker allocates, an
//! interposed build routes that allocation back into the shim on the same
//! thread, and a held borrow would turn the recursion into a panic.

use std::cell::Cell;

pub(crate) const MAX_PAUSE_DEPTH: u32 = 16;
const PAUSE_SLOTS: usize = MAX_PAUSE_DEPTH as usize + 1;

/// Stored for a `pause(0)` request: never counts down to zero in any
/// realistic run.
pub(crate) const PAUSE_INDEFINITELY: u32 = u32::MAX;

pub(crate) struct ThreadState {
    /// Set while the stack walker or a verbose dump runs on this thread.
    is_tracing: Cell<bool>,
    /// `paused[depth] == 0`: not paused. Any other value: that many more
    /// allocations pass through untouched ([`PAUSE_INDEFINITELY`] is just a
    /// countdown too large to expire).
    paused: [Cell<u32>; PAUSE_SLOTS],
    depth: Cell<u32>,
}

impl ThreadState {
    const fn new() -> Self {
        Self {
            is_tracing: Cell::new(false),
            paused: [const { Cell::new(0) }; PAUSE_SLOTS],
            depth: Cell::new(0),
        }
    }

    pub(crate) fn is_tracing(&self) -> bool {
        self.is_tracing.get()
    }

    /// Pause-stack slot for the current depth, clamped to the last real
    /// slot after an overflow.
    fn slot(&self) -> usize {
        self.depth.get().min(MAX_PAUSE_DEPTH) as usize
    }

    pub(crate) fn pause_remaining(&self) -> u32 {
        self.paused[self.slot()].get()
    }

    /// Consume one paused allocation at the current level.
    pub(crate) fn consume_pause(&self) {
        let slot = self.slot();
        self.paused[slot].set(self.paused[slot].get().wrapping_sub(1));
    }

    /// Push one pause level; false when the stack is full and the top slot
    /// was overwritten instead.
    pub(crate) fn push_pause(&self, duration: u32) -> bool {
        if self.depth.get() == MAX_PAUSE_DEPTH {
            self.paused[MAX_PAUSE_DEPTH as usize].set(duration);
            return false;
        }
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        self.paused[depth as usize].set(duration);
        true
    }

    /// Pop one pause level; false on underflow.
    pub(crate) fn pop_pause(&self) -> bool {
        if self.depth.get() == 0 {
            return false;
        }
        self.depth.set(self.depth.get() - 1);
        true
    }

    /// Forget everything (deactivation).
    pub(crate) fn reset(&self) {
        self.is_tracing.set(false);
        self.depth.set(0);
        for slot in &self.paused {
            slot.set(0);
        }
    }
}

thread_local! {
    static THREAD_STATE: ThreadState = const { ThreadState::new() };
}

pub(crate) fn with<R>(body: impl FnOnce(&ThreadState) -> R) -> R {
    THREAD_STATE.with(body)
}

pub(crate) fn is_tracing() -> bool {
    with(ThreadState::is_tracing)
}

/// Run `body` with this thread marked as tracing and the current pause level
/// forced to indefinite, so any allocation `body` makes is neither
/// classified, failed nor tracked. The previous pause countdown is restored
/// afterwards.
pub(crate) fn traced<R>(body: impl FnOnce() -> R) -> R {
    let (slot, saved) = with(|state| {
        state.is_tracing.set(true);
        let slot = state.slot();
        let saved = state.paused[slot].get();
        state.paused[slot].set(PAUSE_INDEFINITELY);
        (slot, saved)
    });
    let result = body();
    with(|state| {
        state.paused[slot].set(saved);
        state.is_tracing.set(false);
    });
    result
}

#[cfg(target_os = "macos")]
pub(crate) use early::{thread_state_initializing, warm_thread_state};

/// Native thread-locals are not usable while dyld is still running image
/// initializers, but `pthread_getspecific` always is. One keyed word per
/// flag carries the early-start state until the real thread-local is safe.
#[cfg(target_os = "macos")]
mod early {
    use std::sync::OnceLock;

    struct KeyedFlag {
        key: OnceLock<libc::pthread_key_t>,
    }

    impl KeyedFlag {
        const fn new() -> Self {
            Self {
                key: OnceLock::new(),
            }
        }

        fn key(&self) -> libc::pthread_key_t {
            *self.key.get_or_init(|| {
                let mut key: libc::pthread_key_t = 0;
                // If key creation fails this early there is nothing left to
                // do; the flag then reads as permanently false, which only
                // skips the warm-up guard.
                // SAFETY: plain key creation, no destructor.
                unsafe { libc::pthread_key_create(&mut key, None) };
                key
            })
        }

        fn get(&self) -> bool {
            // SAFETY: the key comes from pthread_key_create.
            !unsafe { libc::pthread_getspecific(self.key()) }.is_null()
        }

        fn set(&self, value: bool) {
            // SAFETY: stores a word-sized tag that is never dereferenced.
            unsafe {
                libc::pthread_setspecific(self.key(), value as usize as *mut libc::c_void);
            }
        }
    }

    static INITIALIZING: KeyedFlag = KeyedFlag::new();
    static WARMED: KeyedFlag = KeyedFlag::new();

    /// True while this thread's native state is being set up; allocations in
    /// that window pass straight through to the native allocator.
    pub(crate) fn thread_state_initializing() -> bool {
        INITIALIZING.get()
    }

    /// Touch the native thread-local once per thread, with the keyed flag
    /// raised so the touch's own allocations stay out of the instrumented
    /// path.
    pub(crate) fn warm_thread_state() {
        if WARMED.get() {
            return;
        }
        INITIALIZING.set(true);
        super::with(super::ThreadState::reset);
        INITIALIZING.set(false);
        WARMED.set(true);
    }
}
