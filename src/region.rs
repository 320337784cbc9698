use std::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};
use static_assertions::const_assert_eq;

use crate::align::MAX_SCALAR_ALIGN;

/// A contiguous byte range that can only grow and shrink at its end, in
/// LIFO order, like the classic program break.
///
/// `grow` moves the boundary by `delta` bytes and returns the *previous*
/// boundary, so `grow(0)` queries the current boundary without side effects.
/// `None` is the failure sentinel; implementations must leave the boundary
/// untouched when they fail.
///
/// A region has a single logical owner. The allocator serializes every call
/// behind its lock; implementations are not required to be reentrant.
pub trait RegionSource {
  fn grow(
    &mut self,
    delta: isize,
  ) -> Option<NonNull<u8>>;
}

/// The process program break, driven through `sbrk(2)`.
///
/// The break is per process, so at most one allocator should sit on top of
/// it; two `ProgramBreak`-backed allocators in the same process would clobber
/// each other's extents.
pub struct ProgramBreak;

impl RegionSource for ProgramBreak {
  fn grow(
    &mut self,
    delta: isize,
  ) -> Option<NonNull<u8>> {
    let previous = unsafe { sbrk(delta as intptr_t) };

    if previous == usize::MAX as *mut c_void {
      return None;
    }

    NonNull::new(previous as *mut u8)
  }
}

const CELL: usize = MAX_SCALAR_ALIGN;

#[derive(Clone, Copy)]
#[repr(align(16))]
struct Cell {
  _bytes: [u8; CELL],
}

const_assert_eq!(std::mem::align_of::<Cell>(), MAX_SCALAR_ALIGN);
const_assert_eq!(std::mem::size_of::<Cell>(), CELL);

/// A fixed-capacity, maximally aligned slab with a software break cursor.
///
/// Behaves like a bounded program break: grows and shrinks only at the end,
/// refuses to grow past its capacity or shrink below zero. Meant for
/// exercising allocator instances hermetically, without touching the real
/// process break.
pub struct FixedRegion {
  cells: Box<[Cell]>,
  brk: usize,
}

impl FixedRegion {
  /// Creates a region able to hold at least `capacity` bytes.
  pub fn new(capacity: usize) -> Self {
    let cells = capacity.div_ceil(CELL);

    Self {
      cells: vec![Cell { _bytes: [0; CELL] }; cells].into_boxed_slice(),
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.cells.len() * CELL
  }

  /// Bytes currently inside the boundary.
  pub fn in_use(&self) -> usize {
    self.brk
  }

  fn base(&mut self) -> *mut u8 {
    self.cells.as_mut_ptr() as *mut u8
  }
}

impl RegionSource for FixedRegion {
  fn grow(
    &mut self,
    delta: isize,
  ) -> Option<NonNull<u8>> {
    let next = self.brk.checked_add_signed(delta)?;

    if next > self.capacity() {
      return None;
    }

    let previous = self.brk;
    self.brk = next;

    NonNull::new(unsafe { self.base().add(previous) })
  }
}
