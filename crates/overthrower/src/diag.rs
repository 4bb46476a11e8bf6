//! Shim diagnostics. Everything goes to stderr, unconditionally: the shim
//! has no business configuring the host's logging, and a test harness
//! scrapes these lines as they are.

use overthrower_core::registry::BlockInfo;

pub(crate) fn load_banner() {
    eprintln!("overthrower is waiting for the activation signal ...");
    eprintln!("Invoke activateOverthrower and overthrower will start his job.");
}

pub(crate) fn activation_banner() {
    eprintln!("overthrower got activation signal.");
    eprintln!("overthrower will use following parameters for failing allocations:");
}

pub(crate) fn deactivation_banner() {
    eprintln!("overthrower got deactivation signal.");
    eprintln!("overthrower will not fail allocations anymore.");
}

pub(crate) fn implicit_deactivation() {
    eprintln!("overthrower has not been deactivated explicitly, doing it anyway.");
}

pub(crate) fn pause_overflow() {
    eprintln!("pause stack overflow detected.");
}

pub(crate) fn pause_underflow() {
    eprintln!("pause stack underflow detected.");
}

/// One line per leaked block, then a legend for the columns.
pub(crate) fn leak_report(leaked: &[(usize, BlockInfo)]) {
    eprintln!("overthrower has detected not freed memory blocks with following addresses:");
    for (address, info) in leaked {
        eprintln!("{address:#018x}  -  {:6}  -  {:10}", info.seq_num, info.size);
    }
    eprintln!("^^^^^^^^^^^^^^^^^^  |  ^^^^^^  |  ^^^^^^^^^^");
    eprintln!("      pointer       |  malloc  |  block size");
    eprintln!("                    |invocation|");
    eprintln!("                    |  number  |");
}

/// Header of a verbose per-allocation trace; the caller follows up with the
/// call stack.
pub(crate) fn trace_allocation(outcome: &str, seq_num: u32) {
    eprintln!();
    eprintln!("### {outcome} allocation, sequential number: {seq_num} ###");
}
