//! Free-block placement policy: the segregated size-class index, fit
//! search, splitting, coalescing, and heap extension. This is the hard
//! engineering the rest of the crate exists to support.

use crate::align::ALIGNMENT;
use crate::block;
use crate::freelist::FreeLists;
use crate::sbrk::SbrkSource;
use crate::size_class::bucket_index;
use crate::tag::{self, USED, Word};

/// Owns the allocator's global anchors: the origin for self-relative
/// offsets, the current epilogue address, the physically-last real block,
/// and the segregated free lists.
pub struct Heap {
  pub heap_start: *mut Word,
  pub heap_end: *mut Word,
  pub last: Option<*mut Word>,
  pub free_lists: FreeLists,
}

// The raw pointers here only ever address this process's own sbrk-extended
// heap region; nothing makes them thread-specific. Safe to move across
// threads as long as access stays serialized, which `GlobalSegAlloc`'s
// `Mutex` guarantees.
unsafe impl Send for Heap {}

impl Heap {
  fn bucket_of(&self, block: *mut Word) -> usize {
    bucket_index(unsafe { tag::size(block) })
  }

  /// Inserts a free block into the bucket matching its current size.
  ///
  /// # Safety
  /// `block` must be a free block's header with an accurate size tag, not
  /// already present on any bucket list.
  pub unsafe fn insert_free(&mut self, block: *mut Word) {
    unsafe {
      let index = self.bucket_of(block);
      self.free_lists.insert(self.heap_start, index, block);
    }
  }

  /// Removes a free block from its bucket.
  ///
  /// # Safety
  /// `block` must currently be a member of the bucket matching its size.
  pub unsafe fn unlink_free(&mut self, block: *mut Word) {
    unsafe {
      let index = self.bucket_of(block);
      self.free_lists.unlink(self.heap_start, index, block);
    }
  }

  /// Best-fit within the bucket matching `asize`; first non-empty larger
  /// bucket thereafter (where any member already satisfies the request).
  pub fn find_fit(&self, asize: usize) -> Option<*mut Word> {
    let mut index = bucket_index(asize);
    while index < crate::freelist::NUM_BUCKETS {
      let mut best: Option<*mut Word> = None;
      for candidate in self.free_lists.iter_bucket(self.heap_start, index) {
        let candidate_size = unsafe { tag::size(candidate) };
        if candidate_size >= asize {
          best = match best {
            None => Some(candidate),
            Some(b) if candidate_size < unsafe { tag::size(b) } => Some(candidate),
            Some(b) => Some(b),
          };
        }
      }
      if best.is_some() {
        return best;
      }
      index += 1;
    }
    None
  }

  /// Places an allocation of `asize` bytes at `block` (a free block of at
  /// least that size found by [`find_fit`](Self::find_fit)), splitting off
  /// the remainder if it would still meet the minimum block size.
  ///
  /// # Safety
  /// `block` must be a free block of size >= `asize`, currently on its
  /// bucket list.
  pub unsafe fn place(&mut self, block: *mut Word, asize: usize) {
    unsafe {
      let fsize = tag::size(block);
      self.unlink_free(block);

      let prevfree = tag::is_prevfree(block);
      let carried = if prevfree { crate::tag::PREVFREE } else { 0 };

      if fsize - asize >= ALIGNMENT {
        crate::block::make(block, asize, USED | carried, self.heap_end);
        let remainder = crate::block::next(block, self.heap_end).expect("split remainder must exist");
        crate::block::make(remainder, fsize - asize, 0, self.heap_end);
        self.insert_free(remainder);
        if self.last.is_none_or(|last| remainder > last) {
          self.last = Some(remainder);
        }
      } else {
        crate::block::make(block, fsize, USED | carried, self.heap_end);
      }
    }
  }

  /// Merges a newly-freed block with any physically adjacent free
  /// neighbors, then inserts the combined block into its bucket.
  ///
  /// # Safety
  /// `block` must already carry a FREE tag (written by the caller before
  /// calling this) and not yet be on any bucket list.
  pub unsafe fn coalesce(&mut self, mut block: *mut Word) -> *mut Word {
    unsafe {
      let next = block::next(block, self.heap_end);
      let next_is_free = next.is_some_and(|n| tag::is_free(n));
      let prev_is_free = tag::is_prevfree(block);

      let mut size = tag::size(block);
      let was_last = Some(block) == self.last || (next_is_free && next == self.last);

      if next_is_free {
        let n = next.unwrap();
        size += tag::size(n);
        self.unlink_free(n);
      }

      if prev_is_free {
        let p = block::prev(block, self.heap_start).expect("PREVFREE implies a predecessor");
        size += tag::size(p);
        self.unlink_free(p);
        block = p;
      }

      crate::block::make(block, size, 0, self.heap_end);
      self.insert_free(block);

      if was_last {
        self.last = Some(block);
      }

      block
    }
  }

  /// Grows the heap by `size` bytes (already asize-adjusted), folding the
  /// tail free block into the request when possible, and reinstalls the
  /// zero-size epilogue sentinel at the new end. Returns the new allocated
  /// block (callers use it directly, no further split needed).
  ///
  /// # Safety
  /// Must only be called with `sbrk` being this heap's provider.
  pub unsafe fn extend_heap<S: SbrkSource>(&mut self, sbrk: &mut S, size: usize) -> Option<*mut Word> {
    unsafe {
      // Grow by the (possibly already shortfall-reduced) byte count first:
      // on failure nothing else about the heap's state may change.
      sbrk.grow(size)?;

      let mut block = self.heap_end;
      let mut total = size;

      if let Some(last) = self.last
        && tag::is_free(last)
      {
        block = last;
        self.unlink_free(last);
        total += tag::size(last);
      }

      // Write the epilogue sentinel before `make` below, since `make` reaches
      // all the way to `new_epilogue` to propagate the PREVFREE bit and needs
      // it to already be a valid, initialized tag word.
      let new_epilogue = (block as *mut u8).add(total) as *mut Word;
      new_epilogue.write(tag::pack(0, USED));
      crate::block::make(block, total, USED, new_epilogue);

      self.last = Some(block);
      self.heap_end = new_epilogue;

      Some(block)
    }
  }
}
