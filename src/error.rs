use thiserror::Error;

/// Errors surfaced by the allocation operations.
///
/// Misusing pointers (freeing twice, resizing a pointer after handing it
/// back) is not part of this taxonomy; those contracts live on the `unsafe`
/// operations themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The request was malformed: zero-size allocation, zero element count or
  /// size, or an arithmetic overflow while sizing the request. Detected
  /// before any heap state is touched.
  #[error("invalid allocation request: {reason}")]
  InvalidRequest { reason: &'static str },

  /// The region source refused to extend the managed range. The chain and
  /// the region are left exactly as they were.
  #[error("heap region could not be grown")]
  ResourceExhausted,
}
