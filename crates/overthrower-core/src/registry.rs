//! Registry of live tracked allocations: everything between its `malloc`
//! and its `free`. Whatever is still here at deactivation is the leak
//! report.

use std::cell::RefCell;

use allocator_api2::alloc::{Allocator, Global};
use hashbrown::HashMap;
use parking_lot::ReentrantMutex;
use thiserror::Error;

/// What is known about one live block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Allocation sequence number assigned when the block was handed out.
    pub seq_num: u32,
    /// Requested size in bytes.
    pub size: usize,
}

/// The registry's own backing store could not grow: a real OOM, to be
/// propagated to the caller as their allocation failing.
#[derive(Debug, Error)]
#[error("allocation registry backing store exhausted")]
pub struct RegistryExhausted;

// Fixed hasher seeds keep construction const: the registry lives in a
// `static` and must be usable before any entropy source is.
const HASHER: ahash::RandomState =
    ahash::RandomState::with_seeds(0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344, 0xa409_3822_299f_31d0, 0x082e_fa98_ec4e_6c89);

type BlockMap<A> = HashMap<usize, BlockInfo, ahash::RandomState, A>;

/// Address-keyed map of live blocks behind a reentrant lock.
///
/// The mutex is reentrant because diagnostic printing can allocate, and on
/// an interposed build that allocation re-enters the shim on the same
/// thread. Interior mutability is scoped to each operation, so a reentrant
/// caller never meets a held borrow.
///
/// The backing allocator is a type parameter: the shim instantiates the
/// registry over the raw native allocator so that growing the map can never
/// recurse into the tracked path, while tests run it on the global one.
pub struct AllocationRegistry<A: Allocator + Clone = Global> {
    blocks: ReentrantMutex<RefCell<BlockMap<A>>>,
}

impl AllocationRegistry<Global> {
    #[must_use]
    pub const fn new() -> Self {
        Self::new_in(Global)
    }
}

impl Default for AllocationRegistry<Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Allocator + Clone> AllocationRegistry<A> {
    #[must_use]
    pub const fn new_in(alloc: A) -> Self {
        Self {
            blocks: ReentrantMutex::new(RefCell::new(BlockMap::with_hasher_in(HASHER, alloc))),
        }
    }

    /// Start tracking `address`. Capacity is reserved ahead of the insert so
    /// a backing-store failure leaves the map untouched.
    pub fn insert(&self, address: usize, info: BlockInfo) -> Result<(), RegistryExhausted> {
        let guard = self.blocks.lock();
        let mut blocks = guard.borrow_mut();
        blocks.try_reserve(1).map_err(|_| RegistryExhausted)?;
        blocks.insert(address, info);
        Ok(())
    }

    /// Stop tracking `address`. Unknown addresses are not an error: the
    /// block may predate activation or come from an ignored site.
    pub fn remove(&self, address: usize) -> Option<BlockInfo> {
        self.blocks.lock().borrow_mut().remove(&address)
    }

    #[must_use]
    pub fn lookup(&self, address: usize) -> Option<BlockInfo> {
        self.blocks.lock().borrow().get(&address).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.lock().borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().borrow().is_empty()
    }

    /// Remove and return every tracked block; the length of the result is
    /// the leak count. The backing store is released as well, so a
    /// deactivated shim holds no allocator memory.
    pub fn drain(&self) -> Vec<(usize, BlockInfo)> {
        let guard = self.blocks.lock();
        let mut blocks = guard.borrow_mut();
        let drained: Vec<(usize, BlockInfo)> = blocks.drain().collect();
        blocks.shrink_to_fit();
        drained
    }
}
