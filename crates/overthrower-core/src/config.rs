//! Activation-time configuration from the `OVERTHROWER_*` environment.
//!
//! Every value is read once, at activation, and echoed to stderr so a test
//! log always states which parameters were in force. Missing or unusable
//! values never abort anything: with an explicit default the default wins,
//! otherwise a replacement is drawn from `/dev/urandom` and reported.

use std::fs::File;
use std::io::Read;

use thiserror::Error;

use crate::policy::{FailurePolicy, Strategy};

pub const MIN_DUTY_CYCLE: u32 = 1;
pub const MAX_DUTY_CYCLE: u32 = 4096;

pub const MIN_DELAY: u32 = 0;
pub const MAX_DELAY: u32 = 1_000_000;
/// Randomized-fallback ceiling for the delay; a surprise six-figure delay
/// would make a fault-injection run look like a pass.
pub const MAX_RANDOM_DELAY: u32 = 1000;

pub const MIN_DURATION: u32 = 1;
pub const MAX_DURATION: u32 = 100;

/// How chatty the per-allocation tracing is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Verbosity {
    #[default]
    No = 0,
    FailedAllocations = 1,
    AllAllocations = 2,
}

impl Verbosity {
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::FailedAllocations,
            2 => Self::AllAllocations,
            _ => Self::No,
        }
    }
}

/// Why an environment variable could not be used as-is.
#[derive(Debug, Error)]
enum EnvValueError {
    #[error("not set")]
    Unset,
    #[error("`{0}` is not an unsigned decimal")]
    Malformed(String),
    #[error("{0} is outside [{1}, {2}]")]
    OutOfRange(u64, u32, u32),
}

fn parse_env_u32(name: &str, min: u32, max: u32) -> Result<u32, EnvValueError> {
    let raw = std::env::var_os(name).ok_or(EnvValueError::Unset)?;
    let raw = raw
        .into_string()
        .map_err(|raw| EnvValueError::Malformed(raw.to_string_lossy().into_owned()))?;
    let value: u64 = raw
        .parse()
        .map_err(|_| EnvValueError::Malformed(raw.clone()))?;
    if value < u64::from(min) || value > u64::from(max) {
        return Err(EnvValueError::OutOfRange(value, min, max));
    }
    Ok(value as u32)
}

/// Uniform draw from `[min, max]` using `/dev/urandom`, falling back to the
/// midpoint of the range when the entropy read fails.
fn random_in_range(min: u32, max: u32) -> u32 {
    let mut value = min / 2 + max / 2;
    if let Ok(mut urandom) = File::open("/dev/urandom") {
        let mut bytes = [0u8; 4];
        if urandom.read_exact(&mut bytes).is_ok() {
            value = u32::from_ne_bytes(bytes);
        }
    }
    // The +1 for an inclusive range would wrap at the full u32 span; the
    // draw is then taken modulo the open range instead, which is close
    // enough for a fallback.
    let span = (max - min).wrapping_add(if max == u32::MAX { 0 } else { 1 });
    if span != 0 {
        value %= span;
    }
    min + value
}

/// Read one `OVERTHROWER_*` value with the activation fallback policy.
///
/// With a `default`, an unset variable takes it silently and a bad one takes
/// it with a warning. Without one, both cases fall back to a random draw
/// from `[min, max_random or max]`, reported on stderr.
pub fn read_env_u32(
    name: &str,
    min: u32,
    max: u32,
    max_random: Option<u32>,
    default: Option<u32>,
) -> u32 {
    let fallback = |error: &EnvValueError| -> u32 {
        if let Some(default) = default {
            if !matches!(error, EnvValueError::Unset) {
                eprintln!("{name} has incorrect value ({error}). Using a default value ({default}).");
            }
            return default;
        }
        let value = random_in_range(min, max_random.unwrap_or(max));
        match error {
            EnvValueError::Unset => {
                eprintln!("{name} environment variable not set. Using a random value ({value}).");
            }
            _ => eprintln!("{name} has incorrect value ({error}). Using a random value ({value})."),
        }
        value
    };

    parse_env_u32(name, min, max).unwrap_or_else(|error| fallback(&error))
}

/// Everything `activate` decides about a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub strategy: Strategy,
    pub seed: u32,
    pub duty_cycle: u32,
    pub delay: u32,
    pub duration: u32,
    pub self_overthrow: bool,
    pub verbosity: Verbosity,
}

impl Settings {
    /// Read the `OVERTHROWER_*` variables in activation order, echoing each
    /// chosen parameter to stderr.
    ///
    /// Only the variables relevant to the chosen strategy are consulted; the
    /// randomized strategy fallback is capped at pulse so that an unset
    /// strategy never spontaneously disables injection.
    #[must_use]
    pub fn from_env() -> Self {
        let strategy = Strategy::from_u32(read_env_u32(
            "OVERTHROWER_STRATEGY",
            Strategy::Random as u32,
            Strategy::None as u32,
            Some(Strategy::Pulse as u32),
            None,
        ));
        eprintln!("Strategy = {}", strategy.name());

        let mut settings = Self {
            strategy,
            seed: 0,
            duty_cycle: 1024,
            delay: MIN_DELAY,
            duration: MIN_DURATION,
            self_overthrow: false,
            verbosity: Verbosity::No,
        };

        match strategy {
            Strategy::Random => {
                settings.seed = read_env_u32("OVERTHROWER_SEED", 0, u32::MAX, None, None);
                settings.duty_cycle = read_env_u32(
                    "OVERTHROWER_DUTY_CYCLE",
                    MIN_DUTY_CYCLE,
                    MAX_DUTY_CYCLE,
                    None,
                    None,
                );
                eprintln!("Duty cycle = {}", settings.duty_cycle);
                eprintln!("Seed = {}", settings.seed);
            }
            Strategy::Step | Strategy::Pulse => {
                settings.delay = read_env_u32(
                    "OVERTHROWER_DELAY",
                    MIN_DELAY,
                    MAX_DELAY,
                    Some(MAX_RANDOM_DELAY),
                    None,
                );
                eprintln!("Delay = {}", settings.delay);
                if strategy == Strategy::Pulse {
                    settings.duration = read_env_u32(
                        "OVERTHROWER_DURATION",
                        MIN_DURATION,
                        MAX_DURATION,
                        None,
                        None,
                    );
                    eprintln!("Duration = {}", settings.duration);
                }
            }
            Strategy::None => {}
        }

        settings.self_overthrow = std::env::var_os("OVERTHROWER_SELF_OVERTHROW").is_some();
        eprintln!(
            "Self overthrow mode = {}",
            if settings.self_overthrow {
                "enabled"
            } else {
                "disabled"
            }
        );

        settings.verbosity = Verbosity::from_u32(read_env_u32(
            "OVERTHROWER_VERBOSE",
            Verbosity::No as u32,
            Verbosity::AllAllocations as u32,
            None,
            Some(Verbosity::No as u32),
        ));
        eprintln!("Verbose mode = {}", settings.verbosity as u32);

        settings
    }

    /// The decision rule these settings describe.
    #[must_use]
    pub fn policy(&self) -> FailurePolicy {
        match self.strategy {
            Strategy::Random => FailurePolicy::Random {
                duty_cycle: self.duty_cycle,
            },
            Strategy::Step => FailurePolicy::Step { delay: self.delay },
            Strategy::Pulse => FailurePolicy::Pulse {
                delay: self.delay,
                duration: self.duration,
            },
            Strategy::None => FailurePolicy::None,
        }
    }
}
