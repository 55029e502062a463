//! Error types for the parts of this crate that are not bound by the
//! allocator's null/`Option`-returning public contract.
//!
//! `allocate`, `free`, `reallocate` and `zero_allocate` keep returning raw
//! pointers / `Option<NonNull<u8>>` as their contract requires; only
//! [`Allocator::init`](crate::Allocator::init) and
//! [`Allocator::check_heap`](crate::Allocator::check_heap) can fail in a way
//! that is worth a structured error rather than a sentinel value.

use thiserror::Error;

/// Failure modes outside the four-operation allocation contract.
#[derive(Debug, Error)]
pub enum HeapError {
  /// The sbrk provider refused to extend the heap.
  #[error("sbrk provider failed to grow the heap by {requested} bytes")]
  SbrkFailed {
    /// Number of bytes that were requested.
    requested: usize,
  },

  /// `check_heap` found a violated invariant. Diagnostic only: the heap
  /// itself is left untouched by the check, so this is a report, not a
  /// recovery obligation.
  #[error("heap consistency check failed: {0}")]
  CorruptHeap(String),
}
