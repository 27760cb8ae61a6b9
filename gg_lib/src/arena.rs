// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Bump allocator over a caller-supplied buffer, with recursive claiming of
//! object graphs.

use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::slice;

use log::*;

use crate::{GgError, Kv, Map, Object, MAX_OBJECT_DEPTH};

/// Arena allocator backed by a fixed buffer.
///
/// Individual allocations cannot be freed; only the most recent allocation
/// may be resized, and the whole arena can be rewound to a saved
/// [`ArenaMark`]. Allocations are handed out as `&'m mut` slices tied to the
/// backing buffer's borrow, so anything built from arena memory shares the
/// backing buffer's fate.
///
/// Arenas are single-threaded by design; callers own their arenas.
pub struct Arena<'m> {
    mem: NonNull<u8>,
    capacity: u32,
    index: u32,
    _backing: PhantomData<&'m mut [u8]>,
}

/// A saved allocation index, for rewinding after a failed claim.
#[derive(Debug, Clone, Copy)]
pub struct ArenaMark(u32);

impl<'m> Arena<'m> {
    /// Create an arena over `backing`. Capacity is capped at `u32::MAX`
    /// bytes.
    pub fn new(backing: &'m mut [u8]) -> Self {
        let capacity = u32::try_from(backing.len()).unwrap_or(u32::MAX);
        // SAFETY: slice pointers are never null.
        let mem = unsafe { NonNull::new_unchecked(backing.as_mut_ptr()) };
        Arena {
            mem,
            capacity,
            index: 0,
            _backing: PhantomData,
        }
    }

    /// Current allocation index, in bytes.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Total capacity, in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Allocate `size` bytes at the given power-of-two alignment.
    ///
    /// Returns `None` if the arena cannot satisfy the request; the arena is
    /// unchanged in that case.
    pub fn alloc_raw(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");

        let align = u32::try_from(align).ok()?;
        let pad = (align - (self.index & (align - 1))) & (align - 1);

        if pad > self.capacity - self.index {
            debug!("insufficient arena memory for {pad} padding bytes");
            return None;
        }

        let idx = self.index + pad;

        if size > (self.capacity - idx) as usize {
            debug!("insufficient arena memory to alloc {size} bytes");
            return None;
        }

        self.index = idx + size as u32;

        // SAFETY: idx <= capacity, so the offset stays within (or one past)
        // the backing allocation.
        Some(unsafe { NonNull::new_unchecked(self.mem.as_ptr().add(idx as usize)) })
    }

    /// Allocate a byte slice.
    pub fn alloc_bytes(&mut self, len: usize) -> Option<&'m mut [u8]> {
        let ptr = self.alloc_raw(len, 1)?;
        // SAFETY: the region is inside the backing `&'m mut [u8]` (so the
        // bytes are initialized and live for 'm) and the bump index is
        // monotonic, so it is disjoint from every other allocation.
        Some(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Allocate an array of `n` default-initialized `T`.
    pub fn alloc_array<T: Copy + Default>(&mut self, n: usize) -> Option<&'m mut [T]> {
        let size = n.checked_mul(mem::size_of::<T>())?;
        let ptr = self.alloc_raw(size, mem::align_of::<T>())?.cast::<T>();
        // SAFETY: the region is inside the backing buffer, aligned for T,
        // disjoint from all other allocations, and every slot is written
        // before the slice is formed.
        unsafe {
            for i in 0..n {
                ptr.as_ptr().add(i).write(T::default());
            }
            Some(slice::from_raw_parts_mut(ptr.as_ptr(), n))
        }
    }

    /// Allocate whatever is left in the arena as one byte slice.
    pub fn alloc_rest(&mut self) -> &'m mut [u8] {
        let remaining = (self.capacity - self.index) as usize;
        match self.alloc_bytes(remaining) {
            Some(buf) => buf,
            // No padding at alignment 1 and the size fits by construction.
            None => unreachable!("tail allocation cannot fail"),
        }
    }

    /// Resize the most recent allocation in place.
    ///
    /// `ptr` and `old_size` must describe the last allocation; anything else
    /// fails with `Invalid`. Growing past capacity fails with `Nomem`.
    pub fn resize_last(
        &mut self,
        ptr: *const u8,
        old_size: usize,
        new_size: usize,
    ) -> Result<(), GgError> {
        if !self.owns(ptr) {
            error!("resize of pointer not owned by this arena");
            return Err(GgError::Invalid);
        }

        let idx = (ptr as usize - self.mem.as_ptr() as usize) as u32;

        if idx > self.index || (self.index - idx) as usize != old_size {
            error!("resize pointer + old size does not match the last allocation");
            return Err(GgError::Invalid);
        }

        if new_size > (self.capacity - idx) as usize {
            debug!("insufficient arena memory to resize to {new_size}");
            return Err(GgError::Nomem);
        }

        self.index = idx + new_size as u32;
        Ok(())
    }

    /// Returns whether `ptr` points into this arena's backing memory.
    pub fn owns(&self, ptr: *const u8) -> bool {
        let mem = self.mem.as_ptr() as usize;
        let p = ptr as usize;
        p >= mem && p < mem + self.capacity as usize
    }

    /// Save the current allocation index.
    pub fn mark(&self) -> ArenaMark {
        ArenaMark(self.index)
    }

    /// Rewind the allocation index to a previously saved mark, recovering
    /// the memory of a partial claim.
    ///
    /// # Safety
    ///
    /// No reference into memory allocated after `mark` was taken may be used
    /// afterwards; the rewound region will be handed out again.
    pub unsafe fn reset_to(&mut self, mark: ArenaMark) {
        assert!(mark.0 <= self.index, "mark is ahead of the arena index");
        self.index = mark.0;
    }

    /// Copy `buf` into the arena unless it already lives there.
    pub fn claim_bytes<'b>(&mut self, buf: &'b [u8]) -> Result<&'m [u8], GgError> {
        if buf.is_empty() {
            return Ok(&[]);
        }

        if self.owns(buf.as_ptr()) {
            // SAFETY: the bytes are inside the backing buffer, which lives
            // for 'm.
            return Ok(unsafe { slice::from_raw_parts(buf.as_ptr(), buf.len()) });
        }

        let copy = self.alloc_bytes(buf.len()).ok_or(GgError::Nomem)?;
        copy.copy_from_slice(buf);
        Ok(&*copy)
    }

    /// Recursively copy an object graph's external references into the
    /// arena, so the returned graph is self-contained within it.
    ///
    /// A graph that is already entirely arena-owned is returned as-is, so
    /// claiming twice makes no further copies. On `Nomem` the arena may hold
    /// a partial copy; rewind to a mark taken beforehand to recover.
    pub fn claim_obj<'b>(&mut self, obj: Object<'b>) -> Result<Object<'m>, GgError> {
        self.claim_obj_depth(obj, MAX_OBJECT_DEPTH)
    }

    fn claim_obj_depth<'b>(
        &mut self,
        obj: Object<'b>,
        depth: usize,
    ) -> Result<Object<'m>, GgError> {
        match obj {
            Object::Null => Ok(Object::Null),
            Object::Bool(b) => Ok(Object::Bool(b)),
            Object::I64(v) => Ok(Object::I64(v)),
            Object::F64(v) => Ok(Object::F64(v)),
            Object::Buf(buf) => Ok(Object::Buf(self.claim_bytes(buf)?)),
            Object::List(items) => Ok(Object::List(self.claim_list(items, depth)?)),
            Object::Map(map) => Ok(Object::Map(Map {
                pairs: self.claim_pairs(map.pairs, depth)?,
            })),
        }
    }

    fn claim_list<'b>(
        &mut self,
        items: &'b [Object<'b>],
        depth: usize,
    ) -> Result<&'m [Object<'m>], GgError> {
        if depth == 0 {
            error!("object exceeds maximum nesting depth");
            return Err(GgError::Range);
        }

        if items.is_empty() {
            return Ok(&[]);
        }

        if self.owns(items.as_ptr().cast())
            && items.iter().all(|item| self.fully_owned(*item, depth - 1))
        {
            // SAFETY: the array and every reference reachable from it are
            // inside the backing buffer, which lives for 'm.
            return Ok(unsafe {
                slice::from_raw_parts(items.as_ptr().cast::<Object<'m>>(), items.len())
            });
        }

        let copy = self
            .alloc_array::<Object<'m>>(items.len())
            .ok_or(GgError::Nomem)?;
        for (slot, item) in copy.iter_mut().zip(items) {
            *slot = self.claim_obj_depth(*item, depth - 1)?;
        }
        Ok(&*copy)
    }

    fn claim_pairs<'b>(
        &mut self,
        pairs: &'b [Kv<'b>],
        depth: usize,
    ) -> Result<&'m [Kv<'m>], GgError> {
        if depth == 0 {
            error!("object exceeds maximum nesting depth");
            return Err(GgError::Range);
        }

        if pairs.is_empty() {
            return Ok(&[]);
        }

        if self.owns(pairs.as_ptr().cast())
            && pairs.iter().all(|kv| {
                (kv.key.is_empty() || self.owns(kv.key.as_ptr()))
                    && self.fully_owned(kv.val, depth - 1)
            })
        {
            // SAFETY: as in claim_list; the pair array and its contents are
            // all inside the backing buffer.
            return Ok(unsafe {
                slice::from_raw_parts(pairs.as_ptr().cast::<Kv<'m>>(), pairs.len())
            });
        }

        let copy = self.alloc_array::<Kv<'m>>(pairs.len()).ok_or(GgError::Nomem)?;
        for (slot, kv) in copy.iter_mut().zip(pairs) {
            slot.key = self.claim_bytes(kv.key)?;
            slot.val = self.claim_obj_depth(kv.val, depth - 1)?;
        }
        Ok(&*copy)
    }

    /// Whether every reference reachable from `obj` is arena-owned.
    ///
    /// A container with any external descendant is copied wholesale by the
    /// claim functions; this check is what makes re-claiming an already
    /// claimed graph a no-op.
    fn fully_owned(&self, obj: Object<'_>, depth: usize) -> bool {
        match obj {
            Object::Null | Object::Bool(_) | Object::I64(_) | Object::F64(_) => true,
            Object::Buf(buf) => buf.is_empty() || self.owns(buf.as_ptr()),
            Object::List(items) => {
                depth > 0
                    && (items.is_empty() || self.owns(items.as_ptr().cast()))
                    && items.iter().all(|item| self.fully_owned(*item, depth - 1))
            }
            Object::Map(map) => {
                depth > 0
                    && (map.pairs.is_empty() || self.owns(map.pairs.as_ptr().cast()))
                    && map.pairs.iter().all(|kv| {
                        (kv.key.is_empty() || self.owns(kv.key.as_ptr()))
                            && self.fully_owned(kv.val, depth - 1)
                    })
            }
        }
    }
}
