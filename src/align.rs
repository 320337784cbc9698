use std::mem;

use static_assertions::const_assert;

/// The strictest alignment any scalar type demands on this platform.
///
/// Block payloads start on a multiple of this value, so any scalar (or any
/// `#[repr(C)]` aggregate of scalars) can live at the start of a payload.
pub const MAX_SCALAR_ALIGN: usize = mem::align_of::<u128>();

const_assert!(MAX_SCALAR_ALIGN.is_power_of_two());

/// Rounds the given byte count up to the maximal scalar alignment.
///
/// # Examples
///
/// ```rust
/// assert_eq!(brkalloc::align!(13), 16);
/// assert_eq!(brkalloc::align!(16), 16);
/// assert_eq!(brkalloc::align!(17), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::MAX_SCALAR_ALIGN - 1) & !($crate::align::MAX_SCALAR_ALIGN - 1)
  };
}

#[cfg(test)]
mod tests {
  use super::MAX_SCALAR_ALIGN;

  #[test]
  fn test_align() {
    assert_eq!(align!(0), 0);

    for i in 0..10 {
      let sizes = (MAX_SCALAR_ALIGN * i + 1)..=(MAX_SCALAR_ALIGN * (i + 1));

      let expected_alignment = MAX_SCALAR_ALIGN * (i + 1);

      for size in sizes {
        assert_eq!(expected_alignment, align!(size));
      }
    }
  }
}
