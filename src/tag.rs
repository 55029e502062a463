//! Boundary tag bit-packing.
//!
//! Every block carries a 4-byte tag word packing three fields: `size`
//! (always a multiple of [`ALIGNMENT`](crate::align::ALIGNMENT), so its low
//! 4 bits are free), the [`USED`] bit, and the [`PREVFREE`] bit.

/// A single heap word. The heap is conceptually an array of these.
pub type Word = i32;

/// Size of a [`Word`] in bytes.
pub const WSIZE: usize = core::mem::size_of::<Word>();

/// Set iff the block is allocated.
pub const USED: Word = 0b01;
/// Set iff the block physically preceding this one is free.
pub const PREVFREE: Word = 0b10;

/// Packs a size and flag bits into one tag word.
#[inline]
pub fn pack(size: usize, flags: Word) -> Word {
  debug_assert_eq!(size & (USED | PREVFREE) as usize, 0, "size must be 16-aligned");
  size as Word | flags
}

/// Reads the size field of a tag, masking out both flag bits.
///
/// # Safety
/// `bt` must point to a valid, initialized tag word.
#[inline]
pub unsafe fn size(bt: *mut Word) -> usize {
  unsafe { (*bt & !(USED | PREVFREE)) as usize }
}

/// Whether the tag marks an allocated block.
///
/// # Safety
/// `bt` must point to a valid, initialized tag word.
#[inline]
pub unsafe fn is_used(bt: *mut Word) -> bool {
  unsafe { *bt & USED != 0 }
}

/// Whether the tag marks a free block.
///
/// # Safety
/// `bt` must point to a valid, initialized tag word.
#[inline]
pub unsafe fn is_free(bt: *mut Word) -> bool {
  unsafe { !is_used(bt) }
}

/// Whether the tag's PREVFREE bit is set, i.e. whether the physically
/// preceding block is free.
///
/// # Safety
/// `bt` must point to a valid, initialized tag word.
#[inline]
pub unsafe fn is_prevfree(bt: *mut Word) -> bool {
  unsafe { *bt & PREVFREE != 0 }
}

/// Clears the PREVFREE bit in place.
///
/// # Safety
/// `bt` must point to a valid, initialized, writable tag word.
#[inline]
pub unsafe fn clear_prevfree(bt: *mut Word) {
  unsafe {
    *bt &= !PREVFREE;
  }
}

/// Sets the PREVFREE bit in place.
///
/// # Safety
/// `bt` must point to a valid, initialized, writable tag word.
#[inline]
pub unsafe fn set_prevfree(bt: *mut Word) {
  unsafe {
    *bt |= PREVFREE;
  }
}
