//! Per-block slot state and the reference-counted block handle.
//!
//! Each block in a [`BlockPool`](crate::pool::BlockPool) has an atomic
//! slot header carrying an explicit tagged state: `Free` or
//! `Allocated(count)`. The two are separate atomic fields, so no
//! sentinel value is shared between "free" and "live refcount" and the
//! ambiguity between the two is structurally impossible.
//!
//! All transitions are lock-free and allocation-free, which keeps the
//! release path legal from interrupt context.

use std::sync::atomic::{AtomicU32, Ordering};

/// Slot allocation states.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Block is free and can be claimed.
    Free = 0,
    /// Block is claimed and has active references.
    Allocated = 1,
}

impl BlockState {
    fn from_u32(v: u32) -> Self {
        match v {
            1 => BlockState::Allocated,
            _ => BlockState::Free,
        }
    }
}

/// Atomic per-block header.
///
/// Naturally aligned, three words. The state field gates claim/free; the
/// refcount field tracks live [`BlockRef`](crate::pool::BlockRef) and
/// [`DataRange`](crate::pool::DataRange) handles while allocated. The
/// generation counter advances on every free, so a handle stamped with
/// an older generation can be told apart from the slot's next owner.
#[repr(C, align(8))]
#[derive(Debug)]
pub(crate) struct SlotHeader {
    refcount: AtomicU32,
    state: AtomicU32,
    generation: AtomicU32,
}

impl SlotHeader {
    pub(crate) fn new() -> Self {
        Self {
            refcount: AtomicU32::new(0),
            state: AtomicU32::new(BlockState::Free as u32),
            generation: AtomicU32::new(0),
        }
    }

    /// The slot's current claim generation.
    ///
    /// Read by a fresh handle at claim time; checked by retain/release
    /// so stale handles from before a forced return become no-ops.
    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Try to claim this slot (Free -> Allocated with refcount 1).
    ///
    /// Returns true on success, false if the slot was not free.
    pub(crate) fn try_claim(&self) -> bool {
        let claimed = self
            .state
            .compare_exchange(
                BlockState::Free as u32,
                BlockState::Allocated as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if claimed {
            self.refcount.store(1, Ordering::Release);
        }
        claimed
    }

    /// Increment the refcount (handle clone).
    ///
    /// A stale handle (generation mismatch after a forced return) is
    /// ignored with a diagnostic: the slot belongs to someone else now.
    ///
    /// # Panics
    ///
    /// Panics on refcount overflow.
    pub(crate) fn retain(&self, generation: u32) {
        if self.generation() != generation {
            tracing::warn!("stale block reference retained after forced return");
            return;
        }
        let old = self.refcount.fetch_add(1, Ordering::AcqRel);
        if old > i32::MAX as u32 {
            self.refcount.fetch_sub(1, Ordering::AcqRel);
            panic!("block refcount overflow");
        }
    }

    /// Decrement the refcount (handle drop).
    ///
    /// Returns true if this was the last reference. A stale handle
    /// (the slot was forced free since the handle was stamped, whether
    /// or not it has been re-claimed) is absorbed with a diagnostic
    /// instead of disturbing the slot's next owner.
    pub(crate) fn release(&self, generation: u32) -> bool {
        if self.generation() != generation {
            tracing::warn!("stale block reference released after forced return");
            return false;
        }
        if self.state() == BlockState::Free {
            tracing::warn!("block released after forced return; refcount underflow avoided");
            return false;
        }
        let old = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "block refcount underflow");
        old == 1
    }

    /// Unconditionally mark the slot free, regardless of refcount.
    ///
    /// Advances the generation first, so handles stamped before the
    /// free can no longer touch the slot. Used both for ordinary
    /// zero-reached release and forced reclamation. Atomics only:
    /// callable from interrupt context.
    pub(crate) fn force_free(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.refcount.store(0, Ordering::Release);
        self.state.store(BlockState::Free as u32, Ordering::Release);
    }

    /// Current state.
    pub(crate) fn state(&self) -> BlockState {
        BlockState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Current refcount (snapshot, for diagnostics and tests).
    pub(crate) fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_claim_and_state() {
        let slot = SlotHeader::new();
        assert_eq!(slot.state(), BlockState::Free);
        assert_eq!(slot.refcount(), 0);

        assert!(slot.try_claim());
        assert_eq!(slot.state(), BlockState::Allocated);
        assert_eq!(slot.refcount(), 1);

        // Second claim fails while allocated
        assert!(!slot.try_claim());
    }

    #[test]
    fn test_slot_retain_release() {
        let slot = SlotHeader::new();
        assert!(slot.try_claim());
        let gen = slot.generation();

        slot.retain(gen);
        assert_eq!(slot.refcount(), 2);

        assert!(!slot.release(gen));
        assert!(slot.release(gen)); // Last reference
    }

    #[test]
    fn test_slot_force_free_overrides_refcount() {
        let slot = SlotHeader::new();
        assert!(slot.try_claim());
        let gen = slot.generation();
        slot.retain(gen);
        slot.retain(gen);
        assert_eq!(slot.refcount(), 3);

        slot.force_free();
        assert_eq!(slot.state(), BlockState::Free);
        assert_eq!(slot.refcount(), 0);

        // A straggling release after forced free is absorbed
        assert!(!slot.release(gen));
        assert_eq!(slot.state(), BlockState::Free);
    }

    #[test]
    fn test_stale_handle_cannot_touch_reclaimed_slot() {
        let slot = SlotHeader::new();
        assert!(slot.try_claim());
        let old_gen = slot.generation();

        // Forced return, then a new owner claims the slot
        slot.force_free();
        assert!(slot.try_claim());
        let new_gen = slot.generation();
        assert_ne!(old_gen, new_gen);

        // Stale release and retain are both no-ops
        assert!(!slot.release(old_gen));
        assert_eq!(slot.refcount(), 1);
        slot.retain(old_gen);
        assert_eq!(slot.refcount(), 1);

        // The new owner's handle still works
        assert!(slot.release(new_gen));
    }

    #[test]
    fn test_slot_reclaim_cycle() {
        let slot = SlotHeader::new();
        for _ in 0..3 {
            assert!(slot.try_claim());
            assert!(slot.release(slot.generation()));
            slot.force_free();
            assert_eq!(slot.state(), BlockState::Free);
        }
    }
}
