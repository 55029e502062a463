//! The sbrk provider: a monotonic heap extender.
//!
//! [`SbrkSource`] is the contract the rest of this crate builds on.
//! [`ProcessSbrk`] backs it with the real `sbrk(2)` syscall, the same one
//! the teacher crate's `BumpAllocator` uses. [`BufferSbrk`] backs it with a
//! fixed, pre-allocated buffer so the segregated allocator's logic can run
//! under `cargo test` without mutating the real process break.

use libc::{c_void, intptr_t, sbrk};
use std::ptr;

/// A monotonic heap extender. Never shrinks.
pub trait SbrkSource {
  /// Extends the heap by `n` bytes, returning the address of the
  /// newly-available region's start, or `None` if the provider refused.
  fn grow(&mut self, n: usize) -> Option<*mut u8>;

  /// Address of the first byte ever handed out by this provider, or null
  /// if `grow` has never succeeded.
  fn heap_lo(&self) -> *mut u8;

  /// Address one past the last byte ever handed out.
  fn heap_hi(&self) -> *mut u8;
}

/// Production [`SbrkSource`] backed by `libc::sbrk`.
#[derive(Default)]
pub struct ProcessSbrk {
  lo: Option<*mut u8>,
  hi: *mut u8,
}

// Addresses in the process's own break segment, not thread-affine. Safe to
// move across threads as long as access stays serialized (see `GlobalSegAlloc`).
unsafe impl Send for ProcessSbrk {}

impl ProcessSbrk {
  pub fn new() -> Self {
    Self { lo: None, hi: ptr::null_mut() }
  }
}

impl SbrkSource for ProcessSbrk {
  fn grow(&mut self, n: usize) -> Option<*mut u8> {
    if n == 0 {
      return Some(self.hi);
    }

    let result = unsafe { sbrk(n as intptr_t) };
    if result == usize::MAX as *mut c_void {
      log::warn!("sbrk failed to grow heap by {n} bytes");
      return None;
    }

    let base = result as *mut u8;
    if self.lo.is_none() {
      self.lo = Some(base);
    }
    self.hi = unsafe { base.add(n) };
    log::trace!("sbrk grew heap by {n} bytes: base={base:p}, new break={:p}", self.hi);
    Some(base)
  }

  fn heap_lo(&self) -> *mut u8 {
    self.lo.unwrap_or(ptr::null_mut())
  }

  fn heap_hi(&self) -> *mut u8 {
    self.hi
  }
}

/// Test-only [`SbrkSource`] backed by a fixed-size, pre-allocated buffer.
///
/// The buffer is boxed once at construction and never reallocated, so
/// pointers handed out by `grow` stay valid for the buffer's lifetime —
/// unlike a `Vec<u8>` that could move its storage on reallocation.
pub struct BufferSbrk {
  buffer: Box<[u8]>,
  len: usize,
}

impl BufferSbrk {
  pub fn new(capacity: usize) -> Self {
    Self { buffer: vec![0u8; capacity].into_boxed_slice(), len: 0 }
  }
}

impl SbrkSource for BufferSbrk {
  fn grow(&mut self, n: usize) -> Option<*mut u8> {
    if self.len + n > self.buffer.len() {
      log::warn!(
        "simulated sbrk out of capacity: requested {n}, have {} of {}",
        self.buffer.len() - self.len,
        self.buffer.len()
      );
      return None;
    }
    let base = unsafe { self.buffer.as_mut_ptr().add(self.len) };
    self.len += n;
    Some(base)
  }

  fn heap_lo(&self) -> *mut u8 {
    self.buffer.as_ptr() as *mut u8
  }

  fn heap_hi(&self) -> *mut u8 {
    unsafe { self.buffer.as_ptr().add(self.len) as *mut u8 }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buffer_sbrk_grows_monotonically_and_refuses_overflow() {
    let mut sbrk = BufferSbrk::new(64);
    let first = sbrk.grow(16).unwrap();
    let second = sbrk.grow(16).unwrap();
    assert_eq!(unsafe { first.add(16) }, second);
    assert!(sbrk.grow(1000).is_none());
    assert_eq!(sbrk.heap_hi(), unsafe { first.add(32) });
  }

  #[test]
  fn buffer_sbrk_heap_lo_is_stable_across_grows() {
    let mut sbrk = BufferSbrk::new(64);
    let lo_before = sbrk.heap_lo();
    sbrk.grow(8).unwrap();
    sbrk.grow(8).unwrap();
    assert_eq!(sbrk.heap_lo(), lo_before);
  }
}
