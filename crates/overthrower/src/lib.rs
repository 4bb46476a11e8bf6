//! Preloadable fault-injection allocator shim.
//!
//! Loaded ahead of libc (`LD_PRELOAD` on ELF; `DYLD_INSERT_LIBRARIES` plus a
//! dyld interpose table on Mach-O), this library owns the process-wide
//! `malloc`, `realloc` and `free`. Until [`activate`] is called every request
//! passes straight through to the native allocator. Afterwards the strategy
//! configured through the `OVERTHROWER_*` environment decides which
//! allocations fail with `ENOMEM`, every surviving tracked block is
//! remembered until its `free`, and [`deactivate`] reports whatever is still
//! live as a leak.
//!
//! The allocator symbols are only exported from optimized builds: a debug or
//! test binary would otherwise route its own Rust runtime through the shim.
//! The entry points in [`entry`] and the lifecycle API in [`control`] carry
//! the full semantics either way, which is what the integration tests drive.

mod diag;
mod platform;
mod stack;
mod state;
mod tls;

pub mod control;
pub mod entry;

pub use control::{activate, deactivate, pause, resume};
