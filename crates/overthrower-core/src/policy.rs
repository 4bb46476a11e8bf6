//! The failure-decision engine: which allocation sequence numbers fail.

use crate::rng::Lcg;

/// Injection strategy, selected at activation via `OVERTHROWER_STRATEGY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Strategy {
    /// Each allocation fails independently with probability `1/duty_cycle`.
    Random = 0,
    /// The first `delay` allocations succeed, every later one fails.
    Step = 1,
    /// `delay` successes, `duration` failures, then success forever.
    Pulse = 2,
    /// Never fail; tracking only.
    None = 3,
}

impl Strategy {
    /// Clamping conversion; out-of-range values disable injection.
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Random,
            1 => Self::Step,
            2 => Self::Pulse,
            _ => Self::None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Step => "step",
            Self::Pulse => "pulse",
            Self::None => "none",
        }
    }
}

/// A fully-parameterized failure decision rule.
///
/// `seq_num` is the zero-based allocation sequence number assigned by the
/// shim's monotonic counter. STEP fails from `seq_num == delay` onwards and
/// PULSE fails for exactly the `duration` sequence numbers starting there,
/// so within one thread the success/failure pattern over `n` allocations is
/// `"+" * delay + "-" * duration + "+" * rest`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    Random { duty_cycle: u32 },
    Step { delay: u32 },
    Pulse { delay: u32, duration: u32 },
    None,
}

impl FailurePolicy {
    /// Should the allocation holding `seq_num` fail?
    #[must_use]
    pub fn should_fail(&self, seq_num: u32, rng: &Lcg) -> bool {
        match *self {
            Self::Random { duty_cycle } => rng.next_u32() % duty_cycle == 0,
            Self::Step { delay } => seq_num >= delay,
            Self::Pulse { delay, duration } => seq_num >= delay && seq_num - delay < duration,
            Self::None => false,
        }
    }
}
