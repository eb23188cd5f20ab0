/*
 * Created on Mon Mar 18 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

/*
    block pool impl
    ---
    Fixed-size node storage served off a Treiber stack that threads every free block in
    every arena through its first word. The hot path (pop/push) is lock-free; growth is
    the slow path and is serialized by the arena-list mutex with a double-check, so only
    one waiter ever maps a new arena.

    The stack is the textbook ABA-prone kind and we knowingly run it that way: tree
    mutations sit behind the writer lock upstairs (see idx::mtobt::imp), so a pop and a
    push of the same logical block can never race. If that serialization model is ever
    relaxed, this stack has to move to tagged pointers first.
    -- Sayan (@ohsayan)
*/

use {
    super::{ll::CachePadded, unsafe_apis},
    crate::{
        error::{Error, RuntimeResult},
        sync::{ORD_ACQ, ORD_REL, ORD_RLX},
    },
    core::{mem, ptr, ptr::NonNull, sync::atomic::AtomicPtr},
    log::{debug, trace},
    parking_lot::Mutex,
    std::{alloc::Layout, sync::OnceLock, thread},
};

/// Size of a single pool block. Node records must fit this; the allocation site pins
/// that at compile time
pub const BLOCK_SIZE: usize = 64;
/// Alignment of every pool block
pub const BLOCK_ALIGN: usize = 16;
/// Number of blocks carved out of every arena
pub const INITIAL_BLOCK_COUNT: usize = 1024;
/// Failed CAS rounds before the pop loop gives up (and before the push loop resets after
/// yielding)
pub const MAX_RETRY_ATTEMPTS: usize = 100;
/// Yield to the scheduler every this many failed CAS rounds
const YIELD_INTERVAL: usize = 10;

#[repr(C)]
/// A block on the free stack. The first word of a free block doubles as the intrusive
/// link to the next free block; a live block stores a node record instead
struct FreeBlock {
    next: AtomicPtr<FreeBlock>,
}

const _: () = assert!(mem::size_of::<FreeBlock>() <= BLOCK_SIZE);
const _: () = assert!(mem::align_of::<FreeBlock>() <= BLOCK_ALIGN);

/// One contiguous slab of [`INITIAL_BLOCK_COUNT`] blocks
struct Arena {
    base: NonNull<u8>,
}

impl Arena {
    const LAYOUT: Layout =
        match Layout::from_size_align(BLOCK_SIZE * INITIAL_BLOCK_COUNT, BLOCK_ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("illegal arena layout"),
        };
    /// Map a fresh arena. Returns `None` if the host allocator refuses
    fn try_new() -> Option<Self> {
        let base = unsafe {
            // UNSAFE(@ohsayan): constant nonzero layout
            unsafe_apis::alloc_layout(Self::LAYOUT)
        };
        NonNull::new(base).map(|base| Self { base })
    }
    /// Pointer to the `idx`th block of this arena
    fn block_at(&self, idx: usize) -> *mut FreeBlock {
        debug_assert!(idx < INITIAL_BLOCK_COUNT);
        unsafe {
            // UNSAFE(@ohsayan): in bounds of the arena mapping
            self.base.as_ptr().add(idx * BLOCK_SIZE) as *mut FreeBlock
        }
    }
    /// Thread every block of this arena into a local chain, returning `(head, tail)`.
    /// The tail link is left null; splicing it onto a live stack is the caller's business
    fn thread_chain(&self) -> (NonNull<FreeBlock>, NonNull<FreeBlock>) {
        let mut prev: *mut FreeBlock = ptr::null_mut();
        for idx in 0..INITIAL_BLOCK_COUNT {
            let block = self.block_at(idx);
            unsafe {
                // UNSAFE(@ohsayan): raw arena memory that nobody else can see yet; this
                // write initializes the link word
                (*block).next = AtomicPtr::new(prev);
            }
            prev = block;
        }
        unsafe {
            // UNSAFE(@ohsayan): the arena carries a nonzero block count
            (
                NonNull::new_unchecked(prev),
                NonNull::new_unchecked(self.block_at(0)),
            )
        }
    }
}

// owned raw memory; access is mediated by the pool
unsafe impl Send for Arena {}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe {
            // UNSAFE(@ohsayan): mapped with the very same layout in try_new
            unsafe_apis::dealloc_layout(self.base.as_ptr(), Self::LAYOUT);
        }
    }
}

/// The node block pool. Blocks are served LIFO off a lock-free stack threading every
/// free block in every arena; observed exhaustion grows the pool one arena at a time
pub struct BlockPool {
    free_head: CachePadded<AtomicPtr<FreeBlock>>,
    arenas: Mutex<Vec<Arena>>,
}

static GLOBAL: OnceLock<BlockPool> = OnceLock::new();

impl BlockPool {
    /// Returns the process-wide pool, initializing it on first use
    pub fn instance() -> &'static Self {
        GLOBAL.get_or_init(Self::new)
    }
    /// Initialize a pool with one fully threaded arena.
    ///
    /// Panics if the host allocator cannot serve this very first arena; later growth is
    /// fallible instead (see [`BlockPool::allocate`])
    pub fn new() -> Self {
        let slf = Self {
            free_head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            arenas: Mutex::new(Vec::new()),
        };
        let arena = match Arena::try_new() {
            Some(arena) => arena,
            None => panic!("malloc failed"),
        };
        let (head, _tail) = arena.thread_chain();
        slf.free_head.store(head.as_ptr(), ORD_REL);
        slf.arenas.lock().push(arena);
        trace!("block pool initialized with {INITIAL_BLOCK_COUNT} blocks");
        slf
    }
    /// Pop a free block, growing the pool if the stack is observed empty. On success the
    /// returned region is uninitialized, [`BLOCK_ALIGN`]-aligned and [`BLOCK_SIZE`] bytes
    /// long
    pub fn allocate(&self) -> RuntimeResult<NonNull<u8>> {
        if let Some(block) = self.try_pop() {
            return Ok(block);
        }
        self.expand()?;
        self.try_pop().ok_or(Error::OutOfMemory)
    }
    /// Push a block back onto the free stack. A null pointer is a no-op.
    ///
    /// ## Safety
    /// `block` must have come out of [`BlockPool::allocate`] on this very pool and must
    /// not be referenced again
    pub unsafe fn deallocate(&self, block: *mut u8) {
        if block.is_null() {
            return;
        }
        let block = block as *mut FreeBlock;
        let mut head = self.free_head.load(ORD_ACQ);
        let mut retries = 0;
        loop {
            // UNSAFE(@ohsayan): the caller just returned this block to us, so its link
            // word is ours again
            (*block).next = AtomicPtr::new(head);
            match self
                .free_head
                .compare_exchange_weak(head, block, ORD_REL, ORD_RLX)
            {
                Ok(_) => return,
                Err(current) => {
                    head = current;
                    retries += 1;
                    if retries > MAX_RETRY_ATTEMPTS {
                        thread::yield_now();
                        retries = 0;
                    }
                }
            }
        }
    }
    /// Bounded Treiber pop: gives up after [`MAX_RETRY_ATTEMPTS`] failed CAS rounds or on
    /// an observed-empty stack, yielding every [`YIELD_INTERVAL`]th failure
    fn try_pop(&self) -> Option<NonNull<u8>> {
        let mut head = self.free_head.load(ORD_ACQ);
        let mut retries = 0;
        while !head.is_null() && retries < MAX_RETRY_ATTEMPTS {
            let next = unsafe {
                // UNSAFE(@ohsayan): a non-null head is a live free block
                (*head).next.load(ORD_RLX)
            };
            match self
                .free_head
                .compare_exchange_weak(head, next, ORD_ACQ, ORD_RLX)
            {
                Ok(popped) => {
                    return Some(unsafe {
                        // UNSAFE(@ohsayan): the CAS winner owns the popped block
                        NonNull::new_unchecked(popped as *mut u8)
                    });
                }
                Err(current) => head = current,
            }
            retries += 1;
            if retries % YIELD_INTERVAL == 0 {
                thread::yield_now();
            }
        }
        None
    }
    /// Grow the pool by one arena. Serialized by the arena-list mutex; the stack is
    /// re-tested after acquisition so only one waiter actually grows
    fn expand(&self) -> RuntimeResult<()> {
        let mut arenas = self.arenas.lock();
        if !self.free_head.load(ORD_ACQ).is_null() {
            // somebody else already grew the pool while we waited on the lock
            return Ok(());
        }
        let arena = Arena::try_new().ok_or(Error::OutOfMemory)?;
        let (chain_head, chain_tail) = arena.thread_chain();
        let mut old = self.free_head.load(ORD_ACQ);
        let mut retries = 0;
        loop {
            unsafe {
                // UNSAFE(@ohsayan): the chain stays ours until the CAS below publishes it
                (*chain_tail.as_ptr()).next = AtomicPtr::new(old);
            }
            match self
                .free_head
                .compare_exchange_weak(old, chain_head.as_ptr(), ORD_REL, ORD_RLX)
            {
                Ok(_) => break,
                Err(current) => {
                    old = current;
                    retries += 1;
                    if retries > MAX_RETRY_ATTEMPTS {
                        thread::yield_now();
                        retries = 0;
                    }
                }
            }
        }
        arenas.push(arena);
        debug!("block pool grown by {INITIAL_BLOCK_COUNT} blocks");
        Ok(())
    }
    #[cfg(test)]
    pub(super) fn arena_count(&self) -> usize {
        self.arenas.lock().len()
    }
}
