//! Adapter implementing [`GlobalAlloc`] so this crate's [`Allocator`] can be
//! installed as a process's `#[global_allocator]`.
//!
//! [`Allocator`] itself takes `&mut self` throughout and is not `Sync`; this
//! wraps one behind a [`Mutex`], lazily initialized on first use, to satisfy
//! `GlobalAlloc`'s `&self` + `Sync` contract.

use std::alloc::{GlobalAlloc, Layout};
use std::sync::{Mutex, OnceLock};

use crate::allocator::Allocator;
use crate::sbrk::ProcessSbrk;

/// `#[global_allocator]`-installable wrapper.
///
/// ```no_run
/// use segalloc::GlobalSegAlloc;
///
/// #[global_allocator]
/// static ALLOCATOR: GlobalSegAlloc = GlobalSegAlloc::new();
/// ```
pub struct GlobalSegAlloc {
  inner: OnceLock<Mutex<Allocator<ProcessSbrk>>>,
}

impl GlobalSegAlloc {
  /// Creates an uninitialized global allocator. The underlying heap is not
  /// touched until the first allocation request.
  pub const fn new() -> Self {
    Self { inner: OnceLock::new() }
  }

  fn allocator(&self) -> &Mutex<Allocator<ProcessSbrk>> {
    self.inner.get_or_init(|| {
      let mut allocator = Allocator::new(ProcessSbrk::new());
      allocator.init().expect("failed to initialize global heap");
      Mutex::new(allocator)
    })
  }
}

impl Default for GlobalSegAlloc {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl GlobalAlloc for GlobalSegAlloc {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    debug_assert!(layout.align() <= crate::align::ALIGNMENT, "alignment above 16 bytes is not supported");
    let mut allocator = self.allocator().lock().unwrap_or_else(|e| e.into_inner());
    allocator.allocate(layout.size()).map_or(std::ptr::null_mut(), |p| p.as_ptr())
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    let mut allocator = self.allocator().lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
      allocator.free(ptr);
    }
  }

  unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
    let mut allocator = self.allocator().lock().unwrap_or_else(|e| e.into_inner());
    unsafe { allocator.reallocate(ptr, new_size) }.map_or(std::ptr::null_mut(), |p| p.as_ptr())
  }

  unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
    let mut allocator = self.allocator().lock().unwrap_or_else(|e| e.into_inner());
    allocator.zero_allocate(1, layout.size()).map_or(std::ptr::null_mut(), |p| p.as_ptr())
  }
}
