//! Fixed-size block pool with wait-for-availability semantics.

use super::block::{BlockState, SlotHeader};
use crate::error::{Error, Result};
use crate::observability::record_pool_available;
use crate::sync::Semaphore;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for a [`BlockPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Size of each block in bytes.
    pub block_size: usize,
    /// Number of blocks in the pool.
    pub block_count: usize,
    /// Allocation granularity: 1 for single blocks, k for contiguous
    /// k-aligned runs of k blocks.
    pub cluster_size: usize,
    /// Bus address of the first block, for devices that DMA into the
    /// pool. `None` for pools that are never handed to hardware.
    pub physical_base: Option<usize>,
}

impl PoolConfig {
    /// Config for an unclustered pool.
    pub fn new(block_size: usize, block_count: usize) -> Self {
        Self {
            block_size,
            block_count,
            cluster_size: 1,
            physical_base: None,
        }
    }

    /// Set the cluster size.
    pub fn clustered(mut self, cluster_size: usize) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    /// Set the physical base address.
    pub fn physical_base(mut self, base: usize) -> Self {
        self.physical_base = Some(base);
        self
    }
}

/// A pool of fixed-size, reference-counted memory blocks.
///
/// Allocation scans from a rotating cursor so the pool is visited evenly;
/// callers that cannot be satisfied block on a semaphore and retry the
/// whole scan after every release. The scan is idempotent, which makes
/// the wait loop safe against spurious wakeups.
///
/// Release is atomics plus one semaphore post: no allocation, no
/// blocking, callable from interrupt context.
///
/// # Example
///
/// ```rust
/// use strand::pool::{BlockPool, PoolConfig};
///
/// let pool = BlockPool::new("demo", PoolConfig::new(4096, 16)).unwrap();
///
/// // Claim two blocks, waiting for at least one.
/// let blocks = pool.get_blocks(2, 1, Some("demo-writer")).unwrap();
/// assert!(!blocks.is_empty());
///
/// // Blocks return to the pool when the handles drop.
/// drop(blocks);
/// assert_eq!(pool.free_blocks(), 16);
/// ```
pub struct BlockPool {
    name: String,
    storage: Box<[u8]>,
    block_size: usize,
    block_count: usize,
    cluster_size: usize,
    physical_base: Option<usize>,
    slots: Box<[SlotHeader]>,
    /// Rotating search cursor, in cluster units.
    cursor: AtomicUsize,
    /// Posted on every release; waiters rescan after each wakeup.
    available: Semaphore,
}

impl BlockPool {
    /// Create a new pool.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Result<Arc<Self>> {
        if config.block_size == 0 {
            return Err(Error::InvalidParameter("block size must be > 0".into()));
        }
        if config.block_count == 0 {
            return Err(Error::InvalidParameter("block count must be > 0".into()));
        }
        if config.cluster_size == 0 {
            return Err(Error::InvalidParameter("cluster size must be > 0".into()));
        }
        if config.block_count % config.cluster_size != 0 {
            return Err(Error::InvalidParameter(format!(
                "block count {} is not a multiple of cluster size {}",
                config.block_count, config.cluster_size
            )));
        }

        let storage = vec![0u8; config.block_size * config.block_count].into_boxed_slice();
        let slots: Vec<SlotHeader> = (0..config.block_count).map(|_| SlotHeader::new()).collect();

        Ok(Arc::new(Self {
            name: name.into(),
            storage,
            block_size: config.block_size,
            block_count: config.block_count,
            cluster_size: config.cluster_size,
            physical_base: config.physical_base,
            slots: slots.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
            available: Semaphore::new(0),
        }))
    }

    /// Claim up to `number` clusters of blocks.
    ///
    /// Scans from the rotating cursor, wrapping once. If at least
    /// `min_wait` clusters are found they are claimed and returned
    /// immediately, possibly fewer than `number`. Otherwise everything
    /// provisionally claimed is released and the caller blocks until a
    /// release is signalled, then the whole scan is retried.
    ///
    /// `min_wait == 0` never blocks; an empty result is the pool's
    /// pushback signal. `holder` labels the claim in trace output.
    pub fn get_blocks(
        self: &Arc<Self>,
        number: usize,
        min_wait: usize,
        holder: Option<&'static str>,
    ) -> Result<Vec<BlockRef>> {
        if number == 0 {
            return Err(Error::InvalidParameter("requested zero blocks".into()));
        }
        if min_wait > number {
            return Err(Error::InvalidParameter(format!(
                "min_wait {} exceeds requested count {}",
                min_wait, number
            )));
        }
        if min_wait > self.cluster_capacity() {
            return Err(Error::InvalidParameter(format!(
                "min_wait {} exceeds pool capacity of {} clusters",
                min_wait,
                self.cluster_capacity()
            )));
        }

        loop {
            let leaders = self.scan_claim(number);
            if leaders.len() >= min_wait {
                tracing::trace!(
                    pool = %self.name,
                    holder = holder.unwrap_or("-"),
                    claimed = leaders.len(),
                    requested = number,
                    "blocks claimed"
                );
                record_pool_available(&self.name, self.free_blocks());
                return Ok(leaders
                    .into_iter()
                    .map(|index| BlockRef {
                        generation: self.slots[index].generation(),
                        pool: Arc::clone(self),
                        index,
                    })
                    .collect());
            }

            // Not enough free: give back what we grabbed so another
            // waiter can be satisfied, then sleep until a release. Each
            // give-back posts, like any release, so a sleeping waiter
            // whose request is now satisfiable rescans.
            for leader in leaders {
                self.force_free_cluster(leader);
                self.available.post();
            }
            crate::observability::record_pool_wait(&self.name);
            self.available.wait();
        }
    }

    /// Forcibly return blocks to the pool.
    ///
    /// Every cluster member is unconditionally marked free regardless of
    /// its outstanding refcount: the caller asserts ownership of the
    /// whole cluster. Used both for ordinary release and forced
    /// reclamation; straggling references dropped afterwards are
    /// absorbed (with a diagnostic) rather than underflowing.
    ///
    /// Atomics plus one semaphore post per cluster: callable from
    /// interrupt context.
    pub fn return_blocks(&self, blocks: Vec<BlockRef>) {
        for block in blocks {
            debug_assert!(
                std::ptr::eq(Arc::as_ptr(&block.pool), self),
                "block returned to a foreign pool"
            );
            let block = ManuallyDrop::new(block);
            self.force_free_cluster(block.index);
            // One post per cluster, like any release: a second waiter
            // satisfiable by the second cluster must also wake.
            self.available.post();
            // Drop the Arc without running BlockRef::drop (the slot is
            // already free; an ordinary drop would be an underflow).
            unsafe {
                std::ptr::read(&block.pool);
            }
        }
    }

    /// Get the pool's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of one block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks.
    pub fn capacity(&self) -> usize {
        self.block_count
    }

    /// Allocation granularity in blocks.
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Total number of allocatable clusters.
    pub fn cluster_capacity(&self) -> usize {
        self.block_count / self.cluster_size
    }

    /// Number of free blocks (snapshot; may change immediately).
    pub fn free_blocks(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state() == BlockState::Free)
            .count()
    }

    /// Claim up to `want` clusters starting at the cursor, wrapping once.
    ///
    /// Returns the leader indices claimed. A run with any occupied
    /// member is skipped whole: the scan jumps to the next aligned
    /// boundary instead of re-probing member by member.
    fn scan_claim(&self, want: usize) -> Vec<usize> {
        let clusters = self.cluster_capacity();
        let start = self.cursor.load(Ordering::Relaxed) % clusters;
        let mut found = Vec::with_capacity(want.min(clusters));
        let mut next_cursor = start;

        for step in 0..clusters {
            if found.len() >= want {
                break;
            }
            let cluster = (start + step) % clusters;
            let leader = cluster * self.cluster_size;
            if self.try_claim_cluster(leader) {
                found.push(leader);
            }
            next_cursor = (cluster + 1) % clusters;
        }

        self.cursor.store(next_cursor, Ordering::Relaxed);
        found
    }

    /// Atomically claim all members of the cluster led by `leader`.
    fn try_claim_cluster(&self, leader: usize) -> bool {
        for j in 0..self.cluster_size {
            if !self.slots[leader + j].try_claim() {
                // Roll back the members we took; the run is occupied.
                for k in 0..j {
                    self.slots[leader + k].force_free();
                }
                return false;
            }
        }
        true
    }

    /// Force-free every member of the cluster led by `leader`.
    pub(super) fn force_free_cluster(&self, leader: usize) {
        for j in 0..self.cluster_size {
            self.slots[leader + j].force_free();
        }
    }

    /// Called by the last `BlockRef` drop: free the cluster and wake a
    /// waiter. Atomics plus one post, interrupt-safe.
    pub(super) fn release_cluster(&self, leader: usize) {
        self.force_free_cluster(leader);
        self.available.post();
    }

    pub(super) fn slot(&self, index: usize) -> &SlotHeader {
        &self.slots[index]
    }

    fn block_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.block_count);
        unsafe { (self.storage.as_ptr() as *mut u8).add(index * self.block_size) }
    }
}

// SAFETY: block data is only reachable through claimed BlockRefs, and
// claiming is serialized by the per-slot atomic state. Distinct claimed
// clusters never alias.
unsafe impl Send for BlockPool {}
unsafe impl Sync for BlockPool {}

impl std::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("name", &self.name)
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("cluster_size", &self.cluster_size)
            .field("free", &self.free_blocks())
            .finish()
    }
}

/// A claimed cluster of blocks.
///
/// Cloning retains the underlying slot; the last drop frees the whole
/// cluster and wakes one pool waiter. Every handle is stamped with the
/// slot's claim generation, so a handle that survives a forced return
/// becomes inert instead of disturbing the cluster's next owner.
pub struct BlockRef {
    pool: Arc<BlockPool>,
    /// Leader index of the claimed cluster.
    index: usize,
    /// Claim generation this handle was stamped with.
    generation: u32,
}

impl BlockRef {
    /// Leader block index within the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Total usable length in bytes (cluster size × block size).
    pub fn len(&self) -> usize {
        self.pool.block_size * self.pool.cluster_size
    }

    /// Returns true if the cluster has zero length (cannot happen for a
    /// validly constructed pool).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bus address of the cluster, if the pool has one.
    pub fn physical_address(&self) -> Option<usize> {
        self.pool
            .physical_base
            .map(|base| base + self.index * self.pool.block_size)
    }

    /// The owning pool.
    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    /// Current refcount (snapshot, for diagnostics and tests).
    pub fn refcount(&self) -> u32 {
        self.pool.slot(self.index).refcount()
    }

    /// Get a pointer to the cluster's memory.
    pub fn as_ptr(&self) -> *const u8 {
        self.pool.block_ptr(self.index)
    }

    /// Get a mutable pointer to the cluster's memory.
    ///
    /// The raw-pointer escape hatch for shared clusters; the caller is
    /// responsible for not racing other handles.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.pool.block_ptr(self.index)
    }

    /// Get the cluster's data as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    /// Get the cluster's data as a mutable byte slice.
    ///
    /// Refused while other handles to the cluster exist: with the
    /// refcount at 1 no aliasing view can be produced from safe code.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if self.refcount() != 1 {
            return Err(Error::IllegalState {
                operation: "as_mut_slice",
                required: "an unshared cluster",
                actual: "shared",
            });
        }
        Ok(unsafe { std::slice::from_raw_parts_mut(self.pool.block_ptr(self.index), self.len()) })
    }

    /// Write bytes at the start of the cluster.
    ///
    /// Fails on oversized data or while other handles to the cluster
    /// exist (see [`as_mut_slice`](Self::as_mut_slice)).
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.len() {
            return Err(Error::InvalidParameter(format!(
                "data ({} bytes) exceeds cluster size ({} bytes)",
                data.len(),
                self.len()
            )));
        }
        self.as_mut_slice()?[..data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl Clone for BlockRef {
    fn clone(&self) -> Self {
        self.pool.slot(self.index).retain(self.generation);
        Self {
            pool: Arc::clone(&self.pool),
            index: self.index,
            generation: self.generation,
        }
    }
}

impl Drop for BlockRef {
    fn drop(&mut self) {
        if self.pool.slot(self.index).release(self.generation) {
            self.pool.release_cluster(self.index);
        }
    }
}

// SAFETY: aliasing of cluster memory is governed by the refcount; the
// mutable accessors require &mut self and exclusive clusters never
// overlap.
unsafe impl Send for BlockRef {}
unsafe impl Sync for BlockRef {}

impl std::fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRef")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .field("len", &self.len())
            .field("refcount", &self.refcount())
            .finish()
    }
}
