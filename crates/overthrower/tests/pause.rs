//! Pause semantics: finite and indefinite pauses, nesting, saturation at
//! the stack limits, and per-thread independence.

mod common;

use common::{
    expected_pattern, failure_count, failure_pattern, fragile_code, malloc, none_session,
    random_session, step_session,
};

/// Under step(0), a `pause(duration)` admits exactly `duration` allocations.
fn check_short_pause_patterns() {
    for duration in [1usize, 2, 3, 5] {
        let iterations = 10;
        overthrower::pause(duration as u32);
        let pattern = failure_pattern(iterations);
        overthrower::resume();
        assert_eq!(
            pattern,
            expected_pattern(iterations, duration, iterations - duration),
            "duration = {duration}"
        );
    }
}

#[test]
fn indefinite_pause_suspends_injection_until_resume() {
    let _session = random_session(3, 1);
    overthrower::pause(0);
    fragile_code(1024);
    overthrower::resume();
    assert_eq!(overthrower::deactivate(), 0);
}

#[test]
fn short_pauses_admit_exactly_their_duration() {
    let _session = step_session(0);
    check_short_pause_patterns();
    assert_eq!(overthrower::deactivate(), 0);
}

#[test]
fn pauses_are_thread_local() {
    let _session = step_session(0);
    overthrower::pause(0);

    let threads: Vec<_> = (0..128)
        .map(|_| std::thread::spawn(check_short_pause_patterns))
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    overthrower::resume();
    assert_eq!(overthrower::deactivate(), 0);
}

#[test]
fn nested_pauses_unwind_level_by_level() {
    let _session = step_session(0);

    overthrower::pause(1);
    assert_eq!(failure_count(1), 0);

    overthrower::pause(2);
    assert_eq!(failure_count(2), 0);
    // This level is exhausted; the next allocation fails.
    assert!(malloc(128).is_null());
    overthrower::resume();

    // The outer level was already used up before nesting.
    assert!(malloc(128).is_null());
    overthrower::resume();

    assert_eq!(overthrower::deactivate(), 0);
}

#[test]
fn pause_stack_saturates_at_its_limit_and_recovers() {
    let _session = step_session(0);

    for _ in 0..128 {
        overthrower::pause(1);
        fragile_code(1);
    }

    // The stack has long been full: these reuse the top slot.
    overthrower::pause(0);
    fragile_code(1);
    overthrower::pause(1);
    fragile_code(1);
    let buffer1 = malloc(128);
    overthrower::resume();
    let buffer2 = malloc(128);
    overthrower::resume();
    assert!(buffer1.is_null());
    assert!(buffer2.is_null());

    // Unwinding past the bottom is reported but harmless.
    for _ in 0..256 {
        overthrower::resume();
    }

    overthrower::pause(1);
    fragile_code(1);
    overthrower::resume();

    assert_eq!(overthrower::deactivate(), 0);
}

#[test]
fn pause_and_resume_work_without_activation() {
    let _session = none_session();
    assert_eq!(overthrower::deactivate(), 0);

    for _ in 0..32 {
        overthrower::pause(1);
    }

    let thread = std::thread::spawn(|| {
        for _ in 0..32 {
            overthrower::pause(1);
        }
    });

    fragile_code(1024);
    thread.join().unwrap();

    for _ in 0..48 {
        overthrower::resume();
    }
}

#[test]
fn pause_balance_restores_injection() {
    let _session = step_session(0);

    overthrower::pause(0);
    overthrower::pause(0);
    assert_eq!(failure_count(8), 0);
    overthrower::resume();
    overthrower::resume();

    assert!(malloc(128).is_null());
    assert_eq!(overthrower::deactivate(), 0);
}
