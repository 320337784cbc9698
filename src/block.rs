use static_assertions::const_assert_eq;

use crate::align::MAX_SCALAR_ALIGN;

/// Fixed stride reserved in front of every payload inside the managed
/// region.
///
/// The stride equals the maximal scalar alignment, so a payload placed right
/// after it stays maximally aligned no matter what the metadata record
/// contains. The record itself lives out of band (see [`BlockHeader`]), which
/// is why the stride does not depend on the record's field widths.
pub(crate) const HEADER_SIZE: usize = MAX_SCALAR_ALIGN;

const_assert_eq!(HEADER_SIZE % MAX_SCALAR_ALIGN, 0);

/// Metadata for one block carved from the managed region.
///
/// Records are owned by the allocator state in an arena (`Vec<BlockHeader>`)
/// and refer to each other by index instead of raw pointers, so the chain can
/// be walked and mutated without ever reinterpreting region bytes.
#[derive(Debug)]
pub(crate) struct BlockHeader {
  /// Region address of the block's header slot. The payload starts
  /// `HEADER_SIZE` bytes later.
  pub addr: usize,
  /// Payload capacity in bytes, already rounded up to the maximal scalar
  /// alignment.
  pub size: usize,
  pub is_free: bool,
  /// Arena index of the next block in carve order.
  pub next: Option<usize>,
}

impl BlockHeader {
  pub fn new(
    addr: usize,
    size: usize,
  ) -> Self {
    Self {
      addr,
      size,
      is_free: false,
      next: None,
    }
  }

  /// Address handed out to the caller.
  pub fn payload(&self) -> usize {
    self.addr + HEADER_SIZE
  }

  /// First region address past the block.
  pub fn end(&self) -> usize {
    self.payload() + self.size
  }
}
