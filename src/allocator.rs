//! Public API: `init`, `allocate`, `free`, `reallocate`, `zero_allocate`,
//! and `check_heap`, composing the placement-policy primitives in
//! [`crate::heap`].

use std::collections::HashSet;
use std::ptr::NonNull;

use crate::align::{ALIGNMENT, align_up};
use crate::block;
use crate::error::HeapError;
use crate::freelist::NUM_BUCKETS;
use crate::heap::Heap;
use crate::sbrk::SbrkSource;
use crate::size_class::bucket_index;
use crate::tag::{self, PREVFREE, USED, Word, WSIZE};

/// A prologue sized so the first real block's payload lands 16-aligned:
/// header (4) + payload (12) + footer (4).
const PROLOGUE_SIZE: usize = 20;

/// Segregated-fit allocator over a growable heap.
///
/// Single-threaded and non-reentrant: every public call here must run to
/// completion before the next one starts, matching the sbrk provider's own
/// synchronous, non-reentrant contract.
pub struct Allocator<S: SbrkSource> {
  sbrk: S,
  heap: Option<Heap>,
}

impl<S: SbrkSource> Allocator<S> {
  /// Creates an allocator over the given sbrk provider. Call [`init`](Self::init)
  /// before using it.
  pub fn new(sbrk: S) -> Self {
    Self { sbrk, heap: None }
  }

  /// Installs the prologue and epilogue sentinels and resets the
  /// segregated free lists. Idempotent only across distinct heap
  /// incarnations (a fresh `Allocator`), matching the historical contract.
  pub fn init(&mut self) -> Result<(), HeapError> {
    // Reserve enough slack to both realign to ALIGNMENT and fit the
    // prologue + epilogue, regardless of how the provider's base address
    // happens to be aligned.
    let reserve = ALIGNMENT + PROLOGUE_SIZE + WSIZE;
    let base = self
      .sbrk
      .grow(reserve)
      .ok_or(HeapError::SbrkFailed { requested: reserve })? as usize;

    // heap_start (= prologue_header + PROLOGUE_SIZE) must be congruent to
    // `ALIGNMENT - WSIZE` mod ALIGNMENT, so the first real block's payload
    // (header + WSIZE) lands on an ALIGNMENT boundary.
    let want = (ALIGNMENT - WSIZE) as isize - PROLOGUE_SIZE as isize;
    let want = want.rem_euclid(ALIGNMENT as isize) as usize;
    let pad = (want + ALIGNMENT - base % ALIGNMENT) % ALIGNMENT;

    let prologue_header = (base + pad) as *mut Word;
    let heap_start = unsafe { (prologue_header as *mut u8).add(PROLOGUE_SIZE) as *mut Word };

    unsafe {
      // Prologue and epilogue are one-time sentinels written directly;
      // there is no valid heap_end to hand to `block::make` until they
      // exist.
      prologue_header.write(tag::pack(PROLOGUE_SIZE, USED));
      heap_start.write(tag::pack(0, USED));
    }

    debug_assert_eq!(unsafe { block::payload_of(heap_start) } as usize % ALIGNMENT, 0);

    self.heap = Some(Heap {
      heap_start,
      heap_end: heap_start,
      last: None,
      free_lists: crate::freelist::FreeLists::new(),
    });

    log::debug!("allocator initialized: heap_start={heap_start:?}");
    Ok(())
  }

  /// Allocates `requested` bytes, returning a 16-aligned payload pointer.
  /// Returns `None` for a zero-size request or on OOM.
  pub fn allocate(&mut self, requested: usize) -> Option<NonNull<u8>> {
    if requested == 0 {
      return None;
    }

    let asize = align_up(requested + WSIZE);
    let heap = self.heap.as_mut().expect("Allocator::init must be called before use");

    if let Some(block) = heap.find_fit(asize) {
      unsafe {
        heap.place(block, asize);
        let payload = block::payload_of(block);
        log::trace!("allocate({requested}) -> {payload:p} (reused block, asize={asize})");
        return NonNull::new(payload);
      }
    }

    let mut extend = asize;
    if let Some(last) = heap.last
      && unsafe { tag::is_free(last) }
    {
      extend -= unsafe { tag::size(last) };
    }

    unsafe {
      let block = heap.extend_heap(&mut self.sbrk, extend)?;
      let payload = block::payload_of(block);
      log::trace!("allocate({requested}) -> {payload:p} (extended heap by {extend} bytes)");
      NonNull::new(payload)
    }
  }

  /// Frees a block previously returned by `allocate`/`reallocate`/`zero_allocate`.
  /// A null pointer is a no-op.
  ///
  /// # Safety
  /// `ptr`, if non-null, must have been returned by this allocator and not
  /// already freed.
  pub unsafe fn free(&mut self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }

    let heap = self.heap.as_mut().expect("Allocator::init must be called before use");
    unsafe {
      let block = block::header_of(ptr);
      let prevfree = tag::is_prevfree(block);
      let size = tag::size(block);
      let flags = if prevfree { PREVFREE } else { 0 };
      block::make(block, size, flags, heap.heap_end);

      let next_is_free = block::next(block, heap.heap_end).is_some_and(|n| tag::is_free(n));
      if prevfree || next_is_free {
        heap.coalesce(block);
      } else {
        heap.insert_free(block);
      }
      log::trace!("free({ptr:p})");
    }
  }

  /// Resizes the allocation at `ptr` to `size` bytes.
  ///
  /// A null `ptr` behaves as `allocate`. A zero `size` behaves as `free`
  /// and returns `None`. On OOM the original block is left intact.
  ///
  /// # Safety
  /// `ptr`, if non-null, must have been returned by this allocator and not
  /// already freed.
  pub unsafe fn reallocate(&mut self, ptr: *mut u8, size: usize) -> Option<NonNull<u8>> {
    if ptr.is_null() {
      return self.allocate(size);
    }
    if size == 0 {
      unsafe {
        self.free(ptr);
      }
      return None;
    }

    let asize = align_up(size + WSIZE);
    let heap = self.heap.as_mut().expect("Allocator::init must be called before use");

    unsafe {
      let block = block::header_of(ptr);
      let cur = tag::size(block);

      let next = block::next(block, heap.heap_end);
      let next_free = next.is_some_and(|n| tag::is_free(n));
      let avail = cur + if next_free { tag::size(next.unwrap()) } else { 0 };
      let was_last = Some(block) == heap.last || (next_free && next == heap.last);

      // Cases 1 and 2 unify: a free right neighbor is folded into the
      // available span whenever it exists, even if `cur` alone already
      // satisfied the request — otherwise splitting off only `cur`'s tail
      // would leave it adjacent to the untouched free neighbor, violating
      // the no-adjacent-free-blocks invariant.
      if avail >= asize {
        if next_free {
          heap.unlink_free(next.unwrap());
        }
        let prevfree = tag::is_prevfree(block);
        let carried = if prevfree { PREVFREE } else { 0 };

        if avail - asize >= ALIGNMENT {
          block::make(block, asize, USED | carried, heap.heap_end);
          let tail = block::next(block, heap.heap_end).expect("split remainder must exist");
          block::make(tail, avail - asize, 0, heap.heap_end);
          heap.insert_free(tail);
          // `tail`, not `block`, is now the physically-last block whenever
          // the original block (or its absorbed neighbor) held that spot.
          if was_last || heap.last.is_none_or(|last| tail > last) {
            heap.last = Some(tail);
          }
        } else {
          block::make(block, avail, USED | carried, heap.heap_end);
          if was_last {
            heap.last = Some(block);
          }
        }
        log::trace!("reallocate({ptr:p}, {size}): resized in place to {asize} bytes");
        return NonNull::new(ptr);
      }

      if was_last {
        let shortfall = asize - avail;
        heap.extend_heap(&mut self.sbrk, shortfall)?;
        let prevfree = tag::is_prevfree(block);
        let carried = if prevfree { PREVFREE } else { 0 };
        block::make(block, asize, USED | carried, heap.heap_end);
        heap.last = Some(block);
        log::trace!("reallocate({ptr:p}, {size}): extended heap by {shortfall} bytes");
        return NonNull::new(ptr);
      }

      let copy_len = std::cmp::min(cur - WSIZE, size);
      let new_ptr = self.allocate(size)?;
      std::ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), copy_len);
      self.free(ptr);
      log::trace!("reallocate({ptr:p}, {size}): moved to {new_ptr:p}");
      Some(new_ptr)
    }
  }

  /// Allocates `n * s` bytes and zero-initializes the payload.
  ///
  /// Matches the historical contract: the product is not checked for
  /// overflow.
  pub fn zero_allocate(&mut self, n: usize, s: usize) -> Option<NonNull<u8>> {
    let bytes = n * s;
    let ptr = self.allocate(bytes)?;
    unsafe {
      std::ptr::write_bytes(ptr.as_ptr(), 0, bytes);
    }
    Some(ptr)
  }

  /// Diagnostic consistency check. Side-effect-free on allocator state;
  /// walks every block and every bucket list, verifying P1–P8 from the
  /// allocator's testable properties. Returns `Err` describing the first
  /// violation found.
  pub fn check_heap(&self, verbose: bool) -> Result<(), HeapError> {
    let heap = self.heap.as_ref().expect("Allocator::init must be called before use");
    let mut free_blocks: HashSet<usize> = HashSet::new();
    let mut block_count = 0usize;

    let mut cursor = Some(heap.heap_start);
    while let Some(bt) = cursor {
      let size = unsafe { tag::size(bt) };
      if size == 0 {
        // Epilogue: must be the terminal, allocated, zero-sized sentinel.
        if bt as *mut u8 != heap.heap_end as *mut u8 || unsafe { !tag::is_used(bt) } {
          return Err(HeapError::CorruptHeap(format!(
            "epilogue at {bt:?} is not the allocated zero-size sentinel at heap_end"
          )));
        }
        break;
      }

      if size < ALIGNMENT || size % ALIGNMENT != 0 {
        return Err(HeapError::CorruptHeap(format!("block {bt:?} has invalid size {size}")));
      }

      if verbose {
        log::debug!(
          "block {bt:?} size={size} used={} prevfree={}",
          unsafe { tag::is_used(bt) },
          unsafe { tag::is_prevfree(bt) }
        );
      }

      if unsafe { tag::is_free(bt) } {
        let footer = unsafe { block::footer_of(bt) };
        if unsafe { *footer } != unsafe { *bt } {
          return Err(HeapError::CorruptHeap(format!("block {bt:?} header/footer mismatch")));
        }
        let payload = unsafe { block::payload_of(bt) };
        if !(payload as usize).is_multiple_of(ALIGNMENT) {
          return Err(HeapError::CorruptHeap(format!("block {bt:?} payload is not {ALIGNMENT}-aligned")));
        }
        free_blocks.insert(bt as usize);
      } else {
        let payload = unsafe { block::payload_of(bt) };
        if !(payload as usize).is_multiple_of(ALIGNMENT) {
          return Err(HeapError::CorruptHeap(format!("block {bt:?} payload is not {ALIGNMENT}-aligned")));
        }
      }

      let next = unsafe { block::next(bt, heap.heap_end) };
      if let Some(n) = next {
        let succ_prevfree = unsafe { tag::is_prevfree(n) };
        let this_is_free = unsafe { tag::is_free(bt) };
        if succ_prevfree != this_is_free {
          return Err(HeapError::CorruptHeap(format!(
            "PREVFREE mismatch between {bt:?} and successor {n:?}"
          )));
        }
        if this_is_free && unsafe { tag::is_free(n) } {
          return Err(HeapError::CorruptHeap(format!("adjacent free blocks at {bt:?} and {n:?}")));
        }
      }

      block_count += 1;
      cursor = next;
    }

    if verbose {
      log::debug!("heap_start={:?} heap_end={:?} last={:?}", heap.heap_start, heap.heap_end, heap.last);
    }

    let mut seen_in_buckets: HashSet<usize> = HashSet::new();
    for index in 0..NUM_BUCKETS {
      if verbose {
        log::debug!("bucket {index}:");
      }
      let mut prev: Option<*mut Word> = None;
      for bt in heap.free_lists.iter_bucket(heap.heap_start, index) {
        if verbose {
          log::debug!("  block {bt:?} size={}", unsafe { tag::size(bt) });
        }
        if !seen_in_buckets.insert(bt as usize) {
          return Err(HeapError::CorruptHeap(format!("block {bt:?} appears twice in free lists (cycle?)")));
        }
        let size = unsafe { tag::size(bt) };
        if bucket_index(size) != index {
          return Err(HeapError::CorruptHeap(format!(
            "block {bt:?} of size {size} misclassified on bucket {index}"
          )));
        }
        let actual_prev = unsafe { crate::freelist::get_prev(bt, heap.heap_start) };
        if actual_prev != prev {
          return Err(HeapError::CorruptHeap(format!("block {bt:?} prev link does not match list order")));
        }
        prev = Some(bt);
      }
      if heap.free_lists.head(index).is_some() {
        let head = heap.free_lists.head(index).unwrap();
        if unsafe { crate::freelist::get_prev(head, heap.heap_start) }.is_some() {
          return Err(HeapError::CorruptHeap(format!("bucket {index} head has a non-null prev link")));
        }
      }
    }

    if seen_in_buckets != free_blocks {
      return Err(HeapError::CorruptHeap(
        "free-list membership does not match the set of physically free blocks".to_string(),
      ));
    }

    if verbose {
      log::debug!("check_heap: {block_count} real blocks, {} free", free_blocks.len());
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sbrk::BufferSbrk;

  fn new_allocator(capacity: usize) -> Allocator<BufferSbrk> {
    let mut allocator = Allocator::new(BufferSbrk::new(capacity));
    allocator.init().unwrap();
    allocator
  }

  #[test]
  fn init_produces_aligned_first_allocation() {
    let mut allocator = new_allocator(4096);
    let p = allocator.allocate(24).unwrap();
    assert_eq!(p.as_ptr() as usize % ALIGNMENT, 0);
    assert!(allocator.check_heap(false).is_ok());
  }

  #[test]
  fn zero_size_allocate_returns_none() {
    let mut allocator = new_allocator(4096);
    assert!(allocator.allocate(0).is_none());
  }

  #[test]
  fn free_then_check_heap_is_consistent() {
    let mut allocator = new_allocator(4096);
    let p = allocator.allocate(24).unwrap();
    unsafe { allocator.free(p.as_ptr()) };
    assert!(allocator.check_heap(false).is_ok());
  }

  /// S2: freeing two physically adjacent blocks merges them into one that
  /// spans both, coalescing right.
  #[test]
  fn coalesce_right_merges_into_one_block() {
    let mut allocator = new_allocator(4096);
    let p1 = allocator.allocate(32).unwrap();
    let p2 = allocator.allocate(48).unwrap();
    let p3 = allocator.allocate(64).unwrap();
    unsafe {
      allocator.free(p2.as_ptr());
      allocator.free(p3.as_ptr());
    }

    let merged = unsafe { block::header_of(p2.as_ptr()) };
    let expected = align_up(48 + WSIZE) + align_up(64 + WSIZE);
    unsafe {
      assert!(tag::is_free(merged));
      assert_eq!(tag::size(merged), expected);
    }
    assert!(allocator.check_heap(false).is_ok());
    // p1 stays allocated so only the p2/p3 pair could have coalesced.
    unsafe { allocator.free(p1.as_ptr()) };
  }

  /// S3: same setup, opposite free order, coalesces left instead.
  #[test]
  fn coalesce_left_merges_into_one_block() {
    let mut allocator = new_allocator(4096);
    let p1 = allocator.allocate(32).unwrap();
    let p2 = allocator.allocate(48).unwrap();
    let p3 = allocator.allocate(64).unwrap();
    unsafe {
      allocator.free(p2.as_ptr());
      allocator.free(p1.as_ptr());
    }

    let merged = unsafe { block::header_of(p1.as_ptr()) };
    let expected = align_up(32 + WSIZE) + align_up(48 + WSIZE);
    unsafe {
      assert!(tag::is_free(merged));
      assert_eq!(tag::size(merged), expected);
    }
    assert!(allocator.check_heap(false).is_ok());
    unsafe { allocator.free(p3.as_ptr()) };
  }

  /// S4 analog: within one bucket, best-fit beats first-fit. Bucket 2 (the
  /// `(32, 64]` class) only contains the multiples of 16 in that range —
  /// 48 and 64 — so the three-member scenario in the spec's literal prose
  /// is exercised directly against the placement policy in `heap.rs`
  /// instead; here we confirm the same property through the public API
  /// with the two members this classifier's bucket 2 actually admits.
  #[test]
  fn find_fit_prefers_best_fit_within_bucket() {
    let mut allocator = new_allocator(4096);
    let big = allocator.allocate(60).unwrap(); // asize 64
    let barrier = allocator.allocate(8).unwrap(); // keeps the two apart so freeing both doesn't coalesce them
    let small = allocator.allocate(44).unwrap(); // asize 48
    unsafe {
      allocator.free(big.as_ptr());
      allocator.free(small.as_ptr());
    }
    let reused = allocator.allocate(44).unwrap();
    assert_eq!(reused.as_ptr(), small.as_ptr());
    unsafe { allocator.free(barrier.as_ptr()) };
  }

  /// S5: reallocating into a freed right neighbor grows in place.
  #[test]
  fn realloc_grows_in_place_by_consuming_free_neighbor() {
    let mut allocator = new_allocator(4096);
    let p = allocator.allocate(32).unwrap();
    let neighbor = allocator.allocate(16).unwrap();
    unsafe { allocator.free(neighbor.as_ptr()) };

    let grown = unsafe { allocator.reallocate(p.as_ptr(), 64) }.unwrap();
    assert_eq!(grown.as_ptr(), p.as_ptr());
    assert!(allocator.check_heap(false).is_ok());
  }

  /// S6: reallocating the physically-last block grows the heap by exactly
  /// the shortfall, not the full requested size.
  #[test]
  fn realloc_at_heap_end_extends_by_shortfall_only() {
    let mut allocator = new_allocator(4096);
    let p = allocator.allocate(32).unwrap();
    let hi_before = allocator.sbrk.heap_hi();

    let grown = unsafe { allocator.reallocate(p.as_ptr(), 64) }.unwrap();
    assert_eq!(grown.as_ptr(), p.as_ptr());

    let hi_after = allocator.sbrk.heap_hi();
    let shortfall = align_up(64 + WSIZE) - align_up(32 + WSIZE);
    assert_eq!(unsafe { hi_after.offset_from(hi_before) } as usize, shortfall);
  }

  /// Shrinking the heap's physically-last block with a split must hand
  /// `last` off to the newly-created free tail, not leave it on the shrunk,
  /// still-allocated block.
  #[test]
  fn realloc_shrink_at_heap_end_moves_last_to_split_tail() {
    let mut allocator = new_allocator(1 << 16);
    let p = allocator.allocate(64).unwrap();

    let shrunk = unsafe { allocator.reallocate(p.as_ptr(), 8) }.unwrap();
    assert_eq!(shrunk.as_ptr(), p.as_ptr());

    let shrunk_block = unsafe { block::header_of(shrunk.as_ptr()) };
    let tail = unsafe { block::next(shrunk_block, allocator.heap.as_ref().unwrap().heap_end) }.unwrap();
    assert_eq!(allocator.heap.as_ref().unwrap().last, Some(tail));
    assert!(allocator.check_heap(false).is_ok());

    // A later allocation that needs to extend the heap must fold only the
    // true free tail, not silently rebase off the stale, shrunk block.
    let hi_before = allocator.sbrk.heap_hi();
    allocator.allocate(4096).unwrap();
    let hi_after = allocator.sbrk.heap_hi();
    assert!(unsafe { hi_after.offset_from(hi_before) } > 0);
    assert!(allocator.check_heap(false).is_ok());
  }

  /// S7: with no room to grow in place, reallocate copies to a fresh block
  /// and frees the old one.
  #[test]
  fn realloc_with_no_room_copies_and_frees_old_block() {
    let mut allocator = new_allocator(4096);
    let a = allocator.allocate(16).unwrap();
    let b = allocator.allocate(16).unwrap();
    let c = allocator.allocate(16).unwrap();
    unsafe { (b.as_ptr() as *mut u64).write(0xDEAD_BEEF_u64) };

    let moved = unsafe { allocator.reallocate(b.as_ptr(), 64) }.unwrap();
    assert_ne!(moved.as_ptr(), b.as_ptr());
    assert_eq!(unsafe { (moved.as_ptr() as *const u64).read() }, 0xDEAD_BEEF_u64);

    let old_block = unsafe { block::header_of(b.as_ptr()) };
    assert!(unsafe { tag::is_free(old_block) });
    assert!(allocator.check_heap(false).is_ok());
    unsafe {
      allocator.free(a.as_ptr());
      allocator.free(c.as_ptr());
    }
  }

  /// S8: allocating past a freed tail block only requests the shortfall
  /// from the sbrk provider.
  #[test]
  fn allocate_past_free_tail_extends_by_shortfall_only() {
    let mut allocator = new_allocator(4096);
    let p = allocator.allocate(32).unwrap();
    unsafe { allocator.free(p.as_ptr()) };

    let hi_before = allocator.sbrk.heap_hi();
    allocator.allocate(64).unwrap();
    let hi_after = allocator.sbrk.heap_hi();

    let shortfall = align_up(64 + WSIZE) - align_up(32 + WSIZE);
    assert_eq!(unsafe { hi_after.offset_from(hi_before) } as usize, shortfall);
  }

  /// L1: freeing an allocation restores the pre-allocate state (the same
  /// address is handed back for an equal-sized request).
  #[test]
  fn law_free_allocate_restores_prior_state() {
    let mut allocator = new_allocator(4096);
    assert!(allocator.check_heap(false).is_ok());
    let p = allocator.allocate(40).unwrap();
    unsafe { allocator.free(p.as_ptr()) };
    assert!(allocator.check_heap(false).is_ok());
    let p2 = allocator.allocate(40).unwrap();
    assert_eq!(p.as_ptr(), p2.as_ptr());
  }

  /// L2: reallocating to the same size preserves payload bytes identically.
  #[test]
  fn law_realloc_same_size_preserves_bytes() {
    let mut allocator = new_allocator(4096);
    let p = allocator.allocate(40).unwrap();
    unsafe { p.as_ptr().write_bytes(0x7A, 40) };
    let p2 = unsafe { allocator.reallocate(p.as_ptr(), 40) }.unwrap();
    assert_eq!(p2, p);
    let bytes = unsafe { std::slice::from_raw_parts(p2.as_ptr(), 40) };
    assert!(bytes.iter().all(|&b| b == 0x7A));
  }

  /// L3: zero_allocate's payload reads as all zero.
  #[test]
  fn law_zero_allocate_is_zeroed() {
    let mut allocator = new_allocator(4096);
    let p = allocator.zero_allocate(8, 4).unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 32) };
    assert!(bytes.iter().all(|&b| b == 0));
  }
}
