use std::io::Read;

use libc::sbrk;
use segalloc::{Allocator, ProcessSbrk};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // Our segregated-fit allocator. It tracks a prologue/epilogue pair, a
  // "last block" anchor, and 9 segregated free lists, growing the heap via
  // sbrk only when no free block satisfies a request.
  let mut allocator = Allocator::new(ProcessSbrk::new());
  allocator.init().expect("failed to initialize the heap");

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 1) Allocate space for a u32.
    // ------------------------------------------------------------------
    let first_block = allocator.allocate(4).expect("out of memory").as_ptr();
    println!("\n[1] Allocate 4 bytes -> {first_block:?}");
    (first_block as *mut u32).write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", (first_block as *mut u32).read());
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 2) Allocate 12 bytes, to show how an "odd-sized" request is rounded
    //    up to the 16-byte alignment boundary.
    // ------------------------------------------------------------------
    let second_block = allocator.allocate(12).expect("out of memory").as_ptr();
    println!("\n[2] Allocate 12 bytes -> {second_block:?}");
    second_block.write_bytes(0xAB, 12);
    println!("[2] Initialized second block with 0xAB");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 3) Allocate a u64 to observe payload alignment.
    // ------------------------------------------------------------------
    let third_block = allocator.allocate(8).expect("out of memory").as_ptr();
    println!("\n[3] Allocate 8 bytes -> {third_block:?}");
    (third_block as *mut u64).write(0x1122334455667788);
    println!("[3] Value written = 0x{:X}", (third_block as *mut u64).read());
    println!("[3] Address = {:#X}, addr % 16 = {}", third_block as usize, third_block as usize % 16);
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 4) Allocate an array of u16, then free the first block and check
    //    whether a same-sized request reuses it.
    // ------------------------------------------------------------------
    let fourth_block = allocator.allocate(32).expect("out of memory").as_ptr();
    println!("\n[4] Allocate 32 bytes -> {fourth_block:?}");
    for i in 0..16u16 {
      (fourth_block as *mut u16).add(i as usize).write(i);
    }
    println!("[4] Wrote 0..15 into the u16 array");
    block_until_enter_pressed();

    allocator.free(first_block);
    println!("\n[5] Freed first_block at {first_block:?}");
    block_until_enter_pressed();

    let fifth_block = allocator.allocate(2).expect("out of memory").as_ptr();
    println!("\n[6] Allocate 2 bytes -> {fifth_block:?}");
    println!(
      "[6] fifth_block == first_block? {}",
      if fifth_block == first_block { "Yes, it reused the freed block" } else { "No, it allocated somewhere else" }
    );
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 7) Allocate a large block to observe heap growth via sbrk.
    // ------------------------------------------------------------------
    print_program_break("before large alloc");
    let big_block = allocator.allocate(64 * 1024).expect("out of memory").as_ptr();
    println!("\n[7] Allocate a large 64 KiB block -> {big_block:?}");
    print_program_break("after large alloc");
    block_until_enter_pressed();

    // ------------------------------------------------------------------
    // 8) check_heap walks every block and every bucket list, verifying
    //    the layout invariants still hold.
    // ------------------------------------------------------------------
    allocator.check_heap(true).expect("heap is corrupt");
    println!("\n[8] check_heap passed. End of example.");
  }
}
