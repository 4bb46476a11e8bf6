//! Core logic of the overthrower fault-injection allocator shim.
//!
//! Everything here is ordinary Rust with no knowledge of symbol
//! interposition: the failure-decision engine, the activation-time
//! configuration reader, the call-site knowledge base and the registry of
//! live tracked allocations. The `overthrower` crate wires these into the
//! process-wide `malloc`/`realloc`/`free` entry points.

pub mod config;
pub mod knowledge;
pub mod policy;
pub mod registry;
pub mod rng;
