//! Typed views into allocated blocks.
//!
//! A packet does not carry raw blocks: it carries [`DataRange`]s, each a
//! (block, offset, length, kind) view. Several ranges can share one
//! block; the underlying cluster stays allocated until every range over
//! it has been dropped, because each range holds its own
//! [`BlockRef`](super::BlockRef) clone.

use super::BlockRef;

/// What a range's bytes mean to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeKind {
    /// Ordinary payload data.
    Payload,
    /// Stream header or side information.
    Header,
    /// Codec-private configuration bytes.
    CodecConfig,
}

/// A view into part of an allocated block cluster.
///
/// Cloning a range retains the underlying cluster; narrowing with
/// [`slice`](Self::slice) does the same, so a sub-range keeps its
/// backing memory alive on its own.
#[derive(Debug, Clone)]
pub struct DataRange {
    block: BlockRef,
    offset: usize,
    len: usize,
    kind: RangeKind,
}

impl DataRange {
    /// Create a range over part of a cluster.
    ///
    /// # Panics
    ///
    /// Panics if `offset + len` exceeds the cluster's length.
    pub fn new(block: BlockRef, offset: usize, len: usize, kind: RangeKind) -> Self {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= block.len()),
            "range {}+{} exceeds cluster of {} bytes",
            offset,
            len,
            block.len()
        );
        Self {
            block,
            offset,
            len,
            kind,
        }
    }

    /// A payload range covering the whole cluster.
    pub fn whole(block: BlockRef) -> Self {
        let len = block.len();
        Self::new(block, 0, len, RangeKind::Payload)
    }

    /// The range's kind.
    pub fn kind(&self) -> RangeKind {
        self.kind
    }

    /// Offset within the cluster.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The backing cluster.
    pub fn block(&self) -> &BlockRef {
        &self.block
    }

    /// The range's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.block.as_slice()[self.offset..self.offset + self.len]
    }

    /// Narrow to a sub-range (relative to this range's start).
    ///
    /// The sub-range retains the cluster independently.
    ///
    /// # Panics
    ///
    /// Panics if `offset + len` exceeds this range's length.
    pub fn slice(&self, offset: usize, len: usize, kind: RangeKind) -> Self {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "sub-range {}+{} exceeds range of {} bytes",
            offset,
            len,
            self.len
        );
        Self {
            block: self.block.clone(),
            offset: self.offset + offset,
            len,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BlockPool, PoolConfig};

    #[test]
    fn test_whole_block_range() {
        let pool = BlockPool::new("test", PoolConfig::new(128, 2)).unwrap();
        let mut blocks = pool.get_blocks(1, 1, None).unwrap();
        blocks[0].write(b"abcdef").unwrap();

        let range = DataRange::whole(blocks.pop().unwrap());
        assert_eq!(range.len(), 128);
        assert_eq!(range.kind(), RangeKind::Payload);
        assert_eq!(&range.as_slice()[..6], b"abcdef");
    }

    #[test]
    fn test_slice_narrows_and_retains() {
        let pool = BlockPool::new("test", PoolConfig::new(128, 2)).unwrap();
        let mut blocks = pool.get_blocks(1, 1, None).unwrap();
        blocks[0].write(b"abcdef").unwrap();

        let range = DataRange::whole(blocks.pop().unwrap());
        let sub = range.slice(2, 3, RangeKind::Header);
        assert_eq!(sub.as_slice(), b"cde");
        assert_eq!(sub.kind(), RangeKind::Header);
        assert_eq!(sub.offset(), 2);

        // The sub-range keeps the cluster alive on its own
        drop(range);
        assert_eq!(pool.free_blocks(), 1);
        assert_eq!(sub.as_slice(), b"cde");

        drop(sub);
        assert_eq!(pool.free_blocks(), 2);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_range_bounds_checked() {
        let pool = BlockPool::new("test", PoolConfig::new(64, 1)).unwrap();
        let mut blocks = pool.get_blocks(1, 1, None).unwrap();
        DataRange::new(blocks.pop().unwrap(), 60, 8, RangeKind::Payload);
    }
}
