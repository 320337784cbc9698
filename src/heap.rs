use std::ptr::{self, NonNull};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{trace, warn};

use crate::align::MAX_SCALAR_ALIGN;
use crate::block::{BlockHeader, HEADER_SIZE};
use crate::error::AllocError;
use crate::region::{ProgramBreak, RegionSource};

/// A first-fit, free-list heap over a LIFO-growable region.
///
/// Every block ever carved from the region stays on one chain, free or not.
/// Allocation scans the chain head-to-tail for the first free block that is
/// large enough and hands the whole block out (no splitting); on a miss the
/// region is extended by one header stride plus the rounded-up payload.
/// Deallocation marks a block free, except for blocks sitting at the end of
/// the region, which are given back to the region source.
///
/// One internal mutex serializes all chain mutation and all region calls, so
/// a single instance can be shared across threads by reference.
pub struct HeapManager<R: RegionSource = ProgramBreak> {
  state: Mutex<HeapState<R>>,
}

struct HeapState<R> {
  region: R,
  /// Arena of block records; indices are the chain links.
  blocks: Vec<BlockHeader>,
  head: Option<usize>,
  tail: Option<usize>,
}

impl HeapManager<ProgramBreak> {
  /// A heap over the process program break.
  ///
  /// The break is process-global, so only one program-break-backed heap
  /// should exist at a time.
  pub fn new() -> Self {
    Self::with_region(ProgramBreak)
  }
}

impl<R: RegionSource> HeapManager<R> {
  pub fn with_region(region: R) -> Self {
    Self {
      state: Mutex::new(HeapState {
        region,
        blocks: Vec::new(),
        head: None,
        tail: None,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, HeapState<R>> {
    // all state mutation happens under the lock, so a poisoned guard still
    // holds a consistent heap
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Allocates at least `size` bytes and returns a pointer to the payload.
  ///
  /// The payload is aligned to the maximal scalar alignment and exclusively
  /// owned by the caller until it is passed back to [`deallocate`]. A
  /// zero-size request is rejected as [`AllocError::InvalidRequest`], which
  /// keeps it distinguishable from [`AllocError::ResourceExhausted`].
  ///
  /// [`deallocate`]: Self::deallocate
  pub fn allocate(
    &self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size == 0 {
      return Err(AllocError::InvalidRequest {
        reason: "zero-size allocation",
      });
    }

    self.state().allocate(size)
  }

  /// Returns a block to the heap.
  ///
  /// A null pointer is a no-op. A pointer that was never produced by this
  /// heap is logged and ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must either be null or come from this heap's allocate family, and
  /// the caller must not touch the payload afterwards. Freeing a block twice
  /// while its address has been reused hands someone else's live block back.
  pub unsafe fn deallocate(
    &self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    self.state().deallocate(ptr as usize);
  }

  /// Allocates a zero-filled array of `count` elements of `element_size`
  /// bytes each.
  ///
  /// A zero count, a zero element size, or an overflowing product is
  /// rejected before any heap state is touched.
  pub fn zero_allocate(
    &self,
    count: usize,
    element_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if count == 0 || element_size == 0 {
      return Err(AllocError::InvalidRequest {
        reason: "zero element count or element size",
      });
    }

    let total = count
      .checked_mul(element_size)
      .ok_or(AllocError::InvalidRequest {
        reason: "count * element_size overflows",
      })?;

    let payload = self.allocate(total)?;

    // the fresh block is not visible to any other caller yet, so the fill
    // can run outside the lock
    unsafe { ptr::write_bytes(payload.as_ptr(), 0, total) };

    Ok(payload)
  }

  /// Grows a block to at least `new_size` bytes, preserving its contents.
  ///
  /// A null `ptr` or a zero `new_size` delegates to [`allocate`], so
  /// resizing to zero does *not* free the original block; it surfaces the
  /// zero-size rejection instead. A block whose capacity already covers
  /// `new_size` is returned unchanged (blocks never shrink in place).
  /// Otherwise the contents move to a fresh block and the old one is freed;
  /// on allocation failure the original block is left untouched.
  ///
  /// # Safety
  ///
  /// `ptr` must either be null or point at a live payload of this heap that
  /// the caller still owns. On success the old pointer must not be used
  /// again.
  ///
  /// [`allocate`]: Self::allocate
  pub unsafe fn resize(
    &self,
    ptr: *mut u8,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if ptr.is_null() || new_size == 0 {
      return self.allocate(new_size);
    }

    let old_size = {
      let state = self.state();

      let Some(index) = state.block_for_payload(ptr as usize) else {
        warn!("resize: {:#x} does not belong to this heap", ptr as usize);

        return Err(AllocError::InvalidRequest {
          reason: "pointer not managed by this heap",
        });
      };

      state.blocks[index].size
    };

    if old_size >= new_size {
      // the block keeps its original capacity; the header is not updated
      return Ok(unsafe { NonNull::new_unchecked(ptr) });
    }

    let replacement = self.allocate(new_size)?;

    // the copy runs outside the lock; the replacement block is not visible
    // to any other caller until this returns
    unsafe {
      ptr::copy_nonoverlapping(ptr, replacement.as_ptr(), old_size);
      self.deallocate(ptr);
    }

    Ok(replacement)
  }

  /// True when no blocks exist.
  pub fn is_empty(&self) -> bool {
    let state = self.state();

    debug_assert_eq!(state.head.is_none(), state.tail.is_none());

    state.head.is_none()
  }

  /// Number of blocks on the chain, free ones included.
  pub fn block_count(&self) -> usize {
    self.state().blocks.len()
  }
}

impl<R: RegionSource> HeapState<R> {
  fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if let Some(index) = self.find_free_block(size) {
      let block = &mut self.blocks[index];
      block.is_free = false;

      trace!(
        "reusing block {index} at {:#x} ({} bytes) for a {size} byte request",
        block.addr, block.size
      );

      return Ok(payload_ptr(block.addr));
    }

    // one header stride plus the payload, rounded up so the next block's
    // header lands maximally aligned as well
    let Some(raw) = size.checked_add(HEADER_SIZE + MAX_SCALAR_ALIGN - 1) else {
      return Err(AllocError::InvalidRequest {
        reason: "request size overflows",
      });
    };
    let total = raw & !(MAX_SCALAR_ALIGN - 1);
    let Ok(delta) = isize::try_from(total) else {
      return Err(AllocError::InvalidRequest {
        reason: "request size overflows",
      });
    };

    let base = self
      .region
      .grow(delta)
      .ok_or(AllocError::ResourceExhausted)?;
    let addr = base.as_ptr() as usize;

    let index = self.blocks.len();
    self.blocks.push(BlockHeader::new(addr, total - HEADER_SIZE));

    match self.tail {
      Some(tail) => self.blocks[tail].next = Some(index),
      None => self.head = Some(index),
    }
    self.tail = Some(index);

    trace!("grew region by {total} bytes for block {index} at {addr:#x}");

    Ok(payload_ptr(addr))
  }

  fn deallocate(
    &mut self,
    payload: usize,
  ) {
    let Some(index) = self.block_for_payload(payload) else {
      warn!("deallocate: {payload:#x} does not belong to this heap");
      return;
    };

    self.blocks[index].is_free = true;
    trace!(
      "block {index} at {:#x} marked free",
      self.blocks[index].addr
    );

    self.release_trailing_free();
  }

  /// First-fit scan over the whole chain.
  fn find_free_block(
    &self,
    size: usize,
  ) -> Option<usize> {
    let mut current = self.head;

    while let Some(index) = current {
      let block = &self.blocks[index];

      if block.is_free && block.size >= size {
        return Some(index);
      }

      current = block.next;
    }

    None
  }

  /// Maps a payload address back to its block via the fixed backward
  /// stride. `None` when no block owns that address.
  fn block_for_payload(
    &self,
    payload: usize,
  ) -> Option<usize> {
    let addr = payload.checked_sub(HEADER_SIZE)?;
    let mut current = self.head;

    while let Some(index) = current {
      let block = &self.blocks[index];

      if block.addr == addr {
        return Some(index);
      }

      current = block.next;
    }

    None
  }

  /// Gives every free block that abuts the current region boundary back to
  /// the region, newest first. Stops at the first block still in use; free
  /// blocks behind it stay on the chain for reuse.
  fn release_trailing_free(&mut self) {
    loop {
      let Some(index) = self.tail else {
        return;
      };

      let block = &self.blocks[index];
      if !block.is_free {
        return;
      }

      let boundary = self.region.grow(0).map(|p| p.as_ptr() as usize);
      if boundary != Some(block.end()) {
        return;
      }

      let total = HEADER_SIZE + block.size;
      if self.region.grow(-(total as isize)).is_none() {
        // the region refused to shrink; keep the block available for reuse
        return;
      }

      self.unlink_tail(index);
      trace!("gave block {index} back to the region ({total} bytes)");
    }
  }

  /// Unlinks the chain tail and drops its record.
  fn unlink_tail(
    &mut self,
    index: usize,
  ) {
    debug_assert_eq!(self.tail, Some(index));

    if self.head == self.tail {
      self.head = None;
      self.tail = None;
    } else {
      let mut current = self.head;

      while let Some(i) = current {
        if self.blocks[i].next == Some(index) {
          self.blocks[i].next = None;
          self.tail = Some(i);
          break;
        }

        current = self.blocks[i].next;
      }
    }

    // blocks are appended and destroyed only at the tail, so the tail is
    // always the arena's last record
    debug_assert_eq!(index, self.blocks.len() - 1);
    self.blocks.pop();
  }
}

fn payload_ptr(addr: usize) -> NonNull<u8> {
  // the region never hands out address zero
  unsafe { NonNull::new_unchecked((addr + HEADER_SIZE) as *mut u8) }
}

#[cfg(test)]
mod tests {
  use std::slice;
  use std::sync::Arc;
  use std::thread;

  use super::*;
  use crate::region::FixedRegion;

  fn small_heap() -> HeapManager<FixedRegion> {
    HeapManager::with_region(FixedRegion::new(4096))
  }

  fn assert_chain_consistent<R: RegionSource>(heap: &HeapManager<R>) {
    let state = heap.state();

    let Some(head) = state.head else {
      assert!(state.tail.is_none());
      assert!(state.blocks.is_empty());
      return;
    };

    let mut walked = 0;
    let mut last = head;
    let mut previous_addr = None;
    let mut current = Some(head);

    while let Some(index) = current {
      walked += 1;
      assert!(walked <= state.blocks.len(), "cycle in block chain");

      let block = &state.blocks[index];
      if let Some(previous) = previous_addr {
        assert!(block.addr > previous, "chain order must follow addresses");
      }
      previous_addr = Some(block.addr);

      last = index;
      current = block.next;
    }

    assert_eq!(Some(last), state.tail);
    assert_eq!(walked, state.blocks.len());
  }

  #[test]
  fn zero_size_allocate_is_rejected_up_front() {
    let heap = small_heap();

    assert!(matches!(
      heap.allocate(0),
      Err(AllocError::InvalidRequest { .. })
    ));
    assert!(heap.is_empty());
  }

  #[test]
  fn allocate_then_deallocate_round_trips() {
    let heap = small_heap();

    let p = heap.allocate(24).unwrap();
    assert_eq!(heap.state().region.in_use(), HEADER_SIZE + crate::align!(24));
    assert_eq!(heap.block_count(), 1);

    unsafe { heap.deallocate(p.as_ptr()) };

    assert!(heap.is_empty());
    assert_eq!(heap.state().region.in_use(), 0);
    assert_chain_consistent(&heap);
  }

  #[test]
  fn payloads_are_maximally_aligned() {
    let heap = small_heap();
    let mut payloads = Vec::new();

    for size in [1, 3, 7, 13, 24, 40, 100] {
      let p = heap.allocate(size).unwrap();
      assert_eq!(p.as_ptr() as usize % MAX_SCALAR_ALIGN, 0);
      payloads.push(p);
    }

    assert_chain_consistent(&heap);

    for p in payloads {
      unsafe { heap.deallocate(p.as_ptr()) };
    }

    assert!(heap.is_empty());
    assert_eq!(heap.state().region.in_use(), 0);
  }

  #[test]
  fn first_fit_reuses_the_first_adequate_block() {
    let heap = small_heap();

    let a = heap.allocate(32).unwrap();
    let b = heap.allocate(64).unwrap();

    unsafe { heap.deallocate(a.as_ptr()) };
    assert_eq!(heap.block_count(), 2);

    let c = heap.allocate(16).unwrap();
    assert_eq!(c, a);
    assert_ne!(c, b);
    assert_eq!(heap.block_count(), 2);
  }

  #[test]
  fn only_the_terminal_block_shrinks_the_region() {
    let heap = small_heap();

    let a = heap.allocate(32).unwrap();
    let b = heap.allocate(32).unwrap();
    let before = heap.state().region.in_use();

    unsafe { heap.deallocate(a.as_ptr()) };
    assert_eq!(heap.state().region.in_use(), before);
    assert_eq!(heap.block_count(), 2);
    assert!(heap.state().blocks[0].is_free);

    unsafe { heap.deallocate(b.as_ptr()) };

    // the terminal block shrinks the region, and the already-free block in
    // front of it abuts the boundary next, so it is swept out right after
    assert!(heap.is_empty());
    assert_eq!(heap.state().region.in_use(), 0);
  }

  #[test]
  fn deallocating_a_foreign_pointer_is_ignored() {
    let heap = small_heap();
    let p = heap.allocate(8).unwrap();

    let mut local = 0u8;
    unsafe { heap.deallocate(&mut local as *mut u8) };
    assert_eq!(heap.block_count(), 1);

    unsafe { heap.deallocate(p.as_ptr()) };
    assert!(heap.is_empty());
  }

  #[test]
  fn growth_failure_is_resource_exhausted() {
    let heap = HeapManager::with_region(FixedRegion::new(64));

    assert_eq!(heap.allocate(64), Err(AllocError::ResourceExhausted));
    assert!(heap.is_empty());

    // a smaller request still fits afterwards
    assert!(heap.allocate(16).is_ok());
  }

  #[test]
  fn oversized_requests_are_rejected() {
    let heap = small_heap();

    assert!(matches!(
      heap.allocate(usize::MAX),
      Err(AllocError::InvalidRequest { .. })
    ));
    assert!(heap.is_empty());
  }

  #[test]
  fn zero_allocate_zero_fills_reused_blocks() {
    let heap = small_heap();

    let a = heap.allocate(24).unwrap();
    let _b = heap.allocate(8).unwrap();

    unsafe {
      ptr::write_bytes(a.as_ptr(), 0xAB, 24);
      heap.deallocate(a.as_ptr());
    }

    let zeroed = heap.zero_allocate(3, 8).unwrap();
    assert_eq!(zeroed, a);

    let bytes = unsafe { slice::from_raw_parts(zeroed.as_ptr(), 24) };
    assert!(bytes.iter().all(|&byte| byte == 0));
  }

  #[test]
  fn zero_allocate_rejects_degenerate_requests() {
    let heap = small_heap();

    for (count, element_size) in [(0, 8), (8, 0), (usize::MAX, 2)] {
      assert!(matches!(
        heap.zero_allocate(count, element_size),
        Err(AllocError::InvalidRequest { .. })
      ));
    }

    assert!(heap.is_empty());
  }

  #[test]
  fn resize_preserves_existing_bytes() {
    let heap = small_heap();

    let old = heap.allocate(8).unwrap();

    unsafe {
      for i in 0..8 {
        old.as_ptr().add(i).write(0xA0 + i as u8);
      }

      let new = heap.resize(old.as_ptr(), 100).unwrap();
      assert_ne!(new, old);

      for i in 0..8 {
        assert_eq!(new.as_ptr().add(i).read(), 0xA0 + i as u8);
      }

      heap.deallocate(new.as_ptr());
    }

    assert!(heap.is_empty());
  }

  #[test]
  fn resize_within_capacity_returns_the_same_pointer() {
    let heap = small_heap();

    let p = heap.allocate(40).unwrap();

    unsafe {
      assert_eq!(heap.resize(p.as_ptr(), 16).unwrap(), p);
      assert_eq!(heap.resize(p.as_ptr(), 40).unwrap(), p);
    }

    assert_eq!(heap.block_count(), 1);
  }

  #[test]
  fn resize_to_zero_keeps_the_original_block() {
    let heap = small_heap();

    let p = heap.allocate(16).unwrap();
    unsafe { p.as_ptr().write(7) };

    let result = unsafe { heap.resize(p.as_ptr(), 0) };
    assert!(matches!(result, Err(AllocError::InvalidRequest { .. })));

    // the original block is still allocated and readable
    assert_eq!(heap.block_count(), 1);
    assert!(!heap.state().blocks[0].is_free);
    assert_eq!(unsafe { p.as_ptr().read() }, 7);
  }

  #[test]
  fn resize_of_null_behaves_like_allocate() {
    let heap = small_heap();

    let p = unsafe { heap.resize(ptr::null_mut(), 32) }.unwrap();
    assert_eq!(heap.block_count(), 1);

    unsafe { heap.deallocate(p.as_ptr()) };
    assert!(heap.is_empty());
  }

  #[test]
  fn resize_of_a_foreign_pointer_is_an_error() {
    let heap = small_heap();
    let mut local = 0u8;

    let result = unsafe { heap.resize(&mut local as *mut u8, 8) };
    assert!(matches!(result, Err(AllocError::InvalidRequest { .. })));
  }

  #[test]
  fn resize_failure_leaves_the_original_block() {
    let heap = HeapManager::with_region(FixedRegion::new(96));

    let p = heap.allocate(16).unwrap();
    unsafe { p.as_ptr().write(9) };

    let result = unsafe { heap.resize(p.as_ptr(), 4096) };
    assert_eq!(result, Err(AllocError::ResourceExhausted));

    assert_eq!(heap.block_count(), 1);
    assert!(!heap.state().blocks[0].is_free);
    assert_eq!(unsafe { p.as_ptr().read() }, 9);
  }

  #[test]
  fn string_round_trip_empties_the_heap() {
    let heap = small_heap();

    let t1 = heap.allocate(4).unwrap();
    let t2 = heap.allocate(6).unwrap();
    assert_ne!(t1, t2);

    unsafe {
      ptr::copy_nonoverlapping(b"hi!\0".as_ptr(), t1.as_ptr(), 4);
      ptr::copy_nonoverlapping(b"test1\0".as_ptr(), t2.as_ptr(), 6);

      assert_eq!(slice::from_raw_parts(t1.as_ptr(), 4), b"hi!\0");
      assert_eq!(slice::from_raw_parts(t2.as_ptr(), 6), b"test1\0");

      heap.deallocate(t1.as_ptr());
      heap.deallocate(t2.as_ptr());
    }

    assert!(heap.is_empty());
    assert_eq!(heap.state().region.in_use(), 0);
  }

  #[test]
  fn concurrent_callers_leave_the_chain_well_formed() {
    let heap = Arc::new(HeapManager::with_region(FixedRegion::new(1 << 20)));

    let mut workers = Vec::new();

    for t in 0..4u8 {
      let heap = Arc::clone(&heap);

      workers.push(thread::spawn(move || {
        for i in 0..64usize {
          let size = 1 + (t as usize * 7 + i * 13) % 96;
          let p = heap.allocate(size).unwrap();

          unsafe {
            ptr::write_bytes(p.as_ptr(), t, size);

            for offset in 0..size {
              assert_eq!(p.as_ptr().add(offset).read(), t);
            }

            heap.deallocate(p.as_ptr());
          }
        }
      }));
    }

    for worker in workers {
      worker.join().unwrap();
    }

    assert_chain_consistent(&heap);
    assert!(heap.is_empty());
    assert_eq!(heap.state().region.in_use(), 0);
  }
}
