use std::ptr;

use brkalloc::HeapManager;
use libc::sbrk;

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

/// Run with `RUST_LOG=trace cargo run --example heap` to watch the
/// allocator's block reuse and region growth decisions.
fn main() {
  env_logger::init();

  // Heap over the real program break.
  let heap = HeapManager::new();

  print_program_break("start");

  // --------------------------------------------------------------------
  // 1) Allocate 4 bytes and write a u32 into them.
  // --------------------------------------------------------------------
  let first = heap.allocate(4).expect("allocate failed");
  println!("\n[1] Allocate 4 bytes at {:?}", first);

  unsafe {
    (first.as_ptr() as *mut u32).write(0xDEADBEEF);
    println!(
      "[1] Value written = 0x{:X}",
      (first.as_ptr() as *mut u32).read()
    );
  }

  // --------------------------------------------------------------------
  // 2) Allocate 12 bytes and fill them with a byte pattern.
  // --------------------------------------------------------------------
  let second = heap.allocate(12).expect("allocate failed");
  println!("\n[2] Allocate 12 bytes at {:?}", second);

  unsafe {
    ptr::write_bytes(second.as_ptr(), 0xAB, 12);
  }
  println!("[2] Initialized second block with 0xAB");

  // Every payload starts on the maximal scalar alignment.
  println!(
    "[2] Address = {:#X}, addr % {} = {}",
    second.as_ptr() as usize,
    brkalloc::align::MAX_SCALAR_ALIGN,
    second.as_ptr() as usize % brkalloc::align::MAX_SCALAR_ALIGN
  );

  // --------------------------------------------------------------------
  // 3) Free the first block and allocate a smaller one: first-fit reuse.
  // --------------------------------------------------------------------
  unsafe { heap.deallocate(first.as_ptr()) };
  println!("\n[3] Deallocated the first block");

  let third = heap.allocate(2).expect("allocate failed");
  println!(
    "[3] Allocate 2 bytes at {:?} - {}",
    third,
    if third == first {
      "reused the freed block"
    } else {
      "allocated somewhere else"
    }
  );

  // --------------------------------------------------------------------
  // 4) zero_allocate hands out zero-filled memory even when it reuses a
  //    dirty block.
  // --------------------------------------------------------------------
  let zeroed = heap.zero_allocate(8, 4).expect("zero_allocate failed");
  let all_zero =
    unsafe { std::slice::from_raw_parts(zeroed.as_ptr(), 32) }.iter().all(|&b| b == 0);
  println!("\n[4] zero_allocate(8, 4) at {:?}, all zero: {}", zeroed, all_zero);

  // --------------------------------------------------------------------
  // 5) resize moves the contents to a bigger block.
  // --------------------------------------------------------------------
  unsafe {
    (third.as_ptr() as *mut u16).write(0x1234);
    let grown = heap.resize(third.as_ptr(), 64).expect("resize failed");
    println!(
      "\n[5] Resized 2 -> 64 bytes, {:?} -> {:?}, value = 0x{:X}",
      third,
      grown,
      (grown.as_ptr() as *mut u16).read()
    );
    heap.deallocate(grown.as_ptr());
  }

  // --------------------------------------------------------------------
  // 6) Allocate a large block to make the region growth visible.
  // --------------------------------------------------------------------
  print_program_break("before large alloc");

  let big = heap.allocate(64 * 1024).expect("allocate failed");
  println!("\n[6] Allocate 64 KiB at {:?}", big);

  print_program_break("after large alloc");

  // --------------------------------------------------------------------
  // 7) Free everything; trailing blocks go back to the operating system.
  // --------------------------------------------------------------------
  unsafe {
    heap.deallocate(big.as_ptr());
    heap.deallocate(zeroed.as_ptr());
    heap.deallocate(second.as_ptr());
  }

  println!(
    "\n[7] Freed everything, heap empty: {}, blocks left: {}",
    heap.is_empty(),
    heap.block_count()
  );
  print_program_break("end");
}
