// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{Error, Result};
use crate::GlobalAddr;
use spin::Mutex;
use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

/// Alignment applied to every allocation; matches the natural alignment of
/// an LCO's vtable-pointer prefix (see `rt-lco`).
const ALIGN: u64 = 16;

struct Block {
    len: usize,
    pins: usize,
}

/// The byte-addressable heap backing one locality's share of the global
/// address space.
///
/// Allocation is a simple bump pointer over a fixed-size arena with a
/// first-fit free list for reuse; this is not meant to be a general-purpose
/// allocator, only enough to back LCOs, parcel payload spill, and
/// application data cheaply. Metadata (block length, pin count) is tracked
/// out of band in `blocks`; the arena bytes themselves are reached only
/// through [`Heap::pin`], so that pinned regions can be written through a
/// shared reference to the `Heap`.
pub struct Heap {
    arena: UnsafeCell<Box<[u8]>>,
    bump: AtomicU64,
    /// Bump pointer for block-cyclically distributed allocations, kept
    /// separate so that every locality running the same sequence of
    /// `alloc_cyclic_share` calls agrees on offsets without communicating.
    cyclic_bump: AtomicU64,
    blocks: Mutex<BTreeMap<u64, Block>>,
    free_list: Mutex<Vec<(u64, usize)>>,
}

// Safety: the arena is only accessed through `pin`, which hands out raw
// pointers whose aliasing the caller is responsible for (exactly as with a
// `pin`ned pointer into any other process's memory).
unsafe impl Send for Heap {}
unsafe impl Sync for Heap {}

impl Heap {
    #[must_use]
    pub fn new(bytes: usize) -> Self {
        Self {
            arena: UnsafeCell::new(vec![0u8; bytes].into_boxed_slice()),
            // offset 0 is reserved for `GlobalAddr::NULL` / `of_locality_root`.
            bump: AtomicU64::new(ALIGN),
            cyclic_bump: AtomicU64::new(0),
            blocks: Mutex::new(BTreeMap::new()),
            free_list: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        // Safety: length never changes after construction.
        unsafe { (*self.arena.get()).len() }
    }

    fn align_up(n: usize) -> usize {
        let align = ALIGN as usize;
        (n + align - 1) & !(align - 1)
    }

    /// Allocates `n` bytes, returning the offset of the new block.
    pub fn alloc(&self, n: usize) -> Result<u64> {
        let n = Self::align_up(n.max(1));

        {
            let mut free = self.free_list.lock();
            if let Some(idx) = free.iter().position(|&(_, len)| len >= n) {
                let (offset, len) = free.remove(idx);
                self.blocks.lock().insert(offset, Block { len, pins: 0 });
                return Ok(offset);
            }
        }

        let offset = self.bump.fetch_add(n as u64, Ordering::Relaxed);
        if offset as usize + n > self.capacity() {
            return Err(Error::OutOfMemory);
        }
        self.blocks.lock().insert(offset, Block { len: n, pins: 0 });
        Ok(offset)
    }

    /// Reserves this locality's share of a block-cyclically distributed
    /// allocation of `blocks` blocks of `block_bytes` each. Must be called
    /// with identical arguments on every locality, in the same relative
    /// order as every other cyclic allocation, so that offsets agree.
    pub fn alloc_cyclic_share(&self, share_blocks: u64, block_bytes: u32) -> Result<u64> {
        let share_bytes = share_blocks * u64::from(block_bytes);
        let offset = self.cyclic_bump.fetch_add(share_bytes, Ordering::Relaxed);
        // Cyclic space is carved out of the tail of the arena, after the
        // bump-allocated region, so the two never collide in this simple
        // single-arena design.
        let cyclic_base = self.capacity() as u64 / 2;
        let absolute = cyclic_base + offset;
        if absolute + share_bytes > self.capacity() as u64 {
            return Err(Error::OutOfMemory);
        }
        self.blocks.lock().insert(
            absolute,
            Block {
                len: share_bytes as usize,
                pins: 0,
            },
        );
        Ok(absolute)
    }

    /// Releases the block starting at `offset`.
    pub fn free(&self, offset: u64) -> Result<()> {
        let mut blocks = self.blocks.lock();
        let block = blocks.get(&offset).ok_or(Error::NotAllocated)?;
        if block.pins > 0 {
            return Err(Error::StillPinned);
        }
        let len = block.len;
        blocks.remove(&offset);
        drop(blocks);
        self.free_list.lock().push((offset, len));
        Ok(())
    }

    /// Attempts to pin `offset`, returning a pointer to the start of the
    /// allocation and the number of bytes available from `offset` to the
    /// end of its block. Fails if `offset` does not fall within a tracked
    /// allocation.
    pub fn pin(&self, offset: u64) -> Option<(NonNull<u8>, usize)> {
        let mut blocks = self.blocks.lock();
        let (&start, block) = blocks.range_mut(..=offset).next_back()?;
        if offset >= start + block.len as u64 {
            return None;
        }
        block.pins += 1;
        let remaining = (start + block.len as u64 - offset) as usize;

        // Safety: `offset` was checked to fall within a live, tracked block.
        let ptr = unsafe { (*self.arena.get()).as_mut_ptr().add(offset as usize) };
        Some((NonNull::new(ptr).unwrap(), remaining))
    }

    /// Releases a reference acquired by [`Heap::pin`].
    ///
    /// # Panics
    ///
    /// Panics if `offset` does not name a pinned allocation, or is not
    /// currently pinned at all — this mirrors the debug-only lock
    /// discipline checks elsewhere in the runtime: unbalanced pin/unpin is
    /// always a caller bug, never a recoverable condition.
    pub fn unpin(&self, offset: u64) {
        let mut blocks = self.blocks.lock();
        let (&start, block) = blocks
            .range_mut(..=offset)
            .next_back()
            .expect("unpin of an address with no tracked allocation");
        debug_assert!(offset < start + block.len as u64);
        assert!(block.pins > 0, "unbalanced unpin");
        block.pins -= 1;
    }

    /// Copies `n` bytes from `src` to `dst`, both local offsets. Pins both
    /// ranges for the duration of the copy.
    pub fn memcpy(&self, dst: u64, src: u64, n: usize) -> Result<()> {
        let (dst_ptr, dst_len) = self.pin(dst).ok_or(Error::NotAllocated)?;
        let (src_ptr, src_len) = match self.pin(src) {
            Some(v) => v,
            None => {
                self.unpin(dst);
                return Err(Error::NotAllocated);
            }
        };
        debug_assert!(dst_len >= n && src_len >= n);

        // Safety: both pointers were just pinned and cover at least `n` bytes.
        unsafe {
            std::ptr::copy(src_ptr.as_ptr(), dst_ptr.as_ptr(), n);
        }

        self.unpin(src);
        self.unpin(dst);
        Ok(())
    }
}

/// A locality's view of the global address space: its own [`Heap`] plus the
/// topology (`rank`, `ranks`) needed to decide whether an address is local.
pub struct Gas {
    rank: u32,
    ranks: u32,
    heap: Heap,
}

impl Gas {
    #[must_use]
    pub fn new(rank: u32, ranks: u32, heap_bytes: usize) -> Self {
        Self {
            rank,
            ranks,
            heap: Heap::new(heap_bytes),
        }
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    #[must_use]
    pub fn ranks(&self) -> u32 {
        self.ranks
    }

    /// The well-known address of this locality.
    #[must_use]
    pub fn here(&self) -> GlobalAddr {
        GlobalAddr::of_locality_root(self.rank)
    }

    #[must_use]
    pub fn is_local(&self, addr: GlobalAddr) -> bool {
        addr.locality() == self.rank
    }

    #[tracing::instrument(level = "trace", skip(self))]
    pub fn alloc_local(&self, n: usize) -> Result<GlobalAddr> {
        let offset = self.heap.alloc(n)?;
        Ok(GlobalAddr::new(self.rank, offset))
    }

    /// Reserves this locality's share of a block-cyclically distributed
    /// array and returns the address of *this locality's* base block. The
    /// caller is expected to have already agreed on `blocks`/`block_bytes`
    /// globally (e.g. via a broadcast), since every locality must call this
    /// with identical arguments for addresses to line up.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn alloc_cyclic_share(&self, blocks: u64, block_bytes: u32) -> Result<GlobalAddr> {
        let share = blocks.div_ceil(u64::from(self.ranks));
        let offset = self.heap.alloc_cyclic_share(share, block_bytes)?;
        Ok(GlobalAddr::new(self.rank, offset))
    }

    pub fn free(&self, addr: GlobalAddr) -> Result<()> {
        debug_assert!(self.is_local(addr), "free() of a non-local address");
        self.heap.free(addr.offset())
    }

    /// Attempts to pin `addr`. Returns `None` if the address is not local or
    /// does not name a tracked allocation — in either case the caller must
    /// forward the operation to the owning locality.
    pub fn pin(&self, addr: GlobalAddr) -> Option<(NonNull<u8>, usize)> {
        if !self.is_local(addr) {
            return None;
        }
        self.heap.pin(addr.offset())
    }

    pub fn unpin(&self, addr: GlobalAddr) {
        debug_assert!(self.is_local(addr), "unpin() of a non-local address");
        self.heap.unpin(addr.offset());
    }

    /// Synchronous, local-only memcpy between two addresses on this
    /// locality. Cross-locality copies are implemented in `rt-net` on top
    /// of the transport and the rendezvous protocol.
    pub fn memcpy_local(&self, dst: GlobalAddr, src: GlobalAddr, n: usize) -> Result<()> {
        debug_assert!(self.is_local(dst) && self.is_local(src));
        self.heap.memcpy(dst.offset(), src.offset(), n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_pin_unpin_roundtrip() {
        let gas = Gas::new(0, 1, 4096);
        let addr = gas.alloc_local(64).unwrap();
        let (ptr, len) = gas.pin(addr).unwrap();
        assert!(len >= 64);
        unsafe { ptr.as_ptr().write(42) };
        gas.unpin(addr);

        let (ptr2, _) = gas.pin(addr).unwrap();
        assert_eq!(unsafe { ptr2.as_ptr().read() }, 42);
        gas.unpin(addr);
    }

    #[test]
    fn free_while_pinned_fails() {
        let gas = Gas::new(0, 1, 4096);
        let addr = gas.alloc_local(16).unwrap();
        let _pin = gas.pin(addr).unwrap();
        assert!(matches!(gas.free(addr), Err(Error::StillPinned)));
        gas.unpin(addr);
        assert!(gas.free(addr).is_ok());
    }

    #[test]
    fn remote_address_does_not_pin() {
        let gas = Gas::new(0, 4, 4096);
        let remote = GlobalAddr::new(1, 64);
        assert!(gas.pin(remote).is_none());
    }

    #[test]
    fn memcpy_copies_bytes() {
        let gas = Gas::new(0, 1, 4096);
        let src = gas.alloc_local(8).unwrap();
        let dst = gas.alloc_local(8).unwrap();
        {
            let (ptr, _) = gas.pin(src).unwrap();
            unsafe { ptr.as_ptr().write(7) };
            gas.unpin(src);
        }
        gas.memcpy_local(dst, src, 1).unwrap();
        let (ptr, _) = gas.pin(dst).unwrap();
        assert_eq!(unsafe { ptr.as_ptr().read() }, 7);
        gas.unpin(dst);
    }
}
