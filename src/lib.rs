//! # segalloc - A Segregated-Fit Memory Allocator
//!
//! This crate provides a **segregated free-list allocator** (the design
//! taught alongside explicit and implicit free lists in CS:APP's malloc
//! lab) that manages memory using the `sbrk` system call.
//!
//! ## Overview
//!
//! Each block of heap memory, free or allocated, is framed by a boundary
//! tag: a packed word carrying its size and two flag bits. Free blocks
//! additionally carry a footer (a mirror of the header) and sit on one of
//! nine singly-classed doubly linked free lists, chosen by size:
//!
//! ```text
//!   Boundary-Tag Layout:
//!
//!   Allocated block                    Free block
//!   ┌────────┬──────────────┐          ┌────────┬─────┬─────┬─────┬────────┐
//!   │ header │   payload    │          │ header │ next│ prev│ ... │ footer │
//!   └────────┴──────────────┘          └────────┴─────┴─────┴─────┴────────┘
//!     4 bytes   N bytes                  4B       4B    4B          4B
//!
//!   header/footer = size | USED | PREVFREE
//!   next/prev     = signed word offsets from heap_start ("-1" = none)
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align       - 16-byte alignment helpers
//!   ├── tag         - Boundary tag bit-packing (internal)
//!   ├── block       - Block navigator: header/footer/payload/next/prev
//!   ├── freelist    - Free-list offset encoding and the bucket table
//!   ├── size_class  - Size -> bucket classifier
//!   ├── sbrk        - The SbrkSource trait, ProcessSbrk and BufferSbrk
//!   ├── heap        - Placement policy: find_fit, place, coalesce, extend_heap
//!   ├── allocator   - Allocator: init, allocate, free, reallocate, zero_allocate, check_heap
//!   ├── global      - GlobalAlloc adapter for #[global_allocator]
//!   └── error       - HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Allocator, ProcessSbrk};
//!
//! let mut allocator = Allocator::new(ProcessSbrk::new());
//! allocator.init().expect("failed to initialize the heap");
//!
//! unsafe {
//!     let ptr = allocator.allocate(64).expect("out of memory");
//!     ptr.as_ptr().write_bytes(0, 64);
//!     allocator.free(ptr.as_ptr());
//! }
//! ```
//!
//! ## How It Works
//!
//! The allocator uses `sbrk(2)` to extend the program's data segment, the
//! same mechanism as the simplest possible bump allocator, but it never
//! hands an entire block back to the OS: freed blocks are coalesced with
//! their physical neighbors and reused from the free lists instead.
//!
//! ```text
//!   Program Memory Layout:
//!
//!   High Address ┌─────────────────────┐
//!                │       Stack         │ ↓ grows down
//!                │         │           │
//!                │         ▼           │
//!                │                     │
//!                │         ▲           │
//!                │         │           │
//!                │       Heap          │ ↑ grows up (sbrk)
//!                ├─────────────────────┤ ← Program Break
//!                │   Uninitialized     │
//!                │       Data          │
//!                ├─────────────────────┤
//!                │   Initialized       │
//!                │       Data          │
//!                ├─────────────────────┤
//!                │       Text          │
//!   Low Address  └─────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Segregated best-fit**: 9 size-class buckets, best-fit within a
//!   bucket, first-fit across buckets
//! - **Footer-free allocated blocks**: the PREVFREE bit lets a block find
//!   its free predecessor without a footer, halving per-block overhead
//! - **Immediate coalescing**: freed blocks merge with both physical
//!   neighbors before being reinserted
//! - **Minimal syscalls**: heap extension folds the current tail free
//!   block into the `sbrk` request instead of growing past it
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Never shrinks**: the heap, once grown, is never returned to the OS
//! - **Unix-only**: requires `libc` and `sbrk` (POSIX systems)
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! Every function that reads or writes a boundary tag is `unsafe`; the
//! [`Allocator`] methods are the safe-ish boundary most callers should use.

pub mod align;
mod allocator;
mod block;
mod error;
mod freelist;
mod global;
mod heap;
mod sbrk;
mod size_class;
mod tag;

pub use allocator::Allocator;
pub use error::HeapError;
pub use global::GlobalSegAlloc;
pub use sbrk::{BufferSbrk, ProcessSbrk, SbrkSource};
