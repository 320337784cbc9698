//! # brkalloc - A First-Fit Free-List Memory Allocator
//!
//! This crate provides a simple **first-fit free-list allocator** that
//! manages a single growable region obtained through a program-break-style
//! primitive such as `sbrk`.
//!
//! ## Overview
//!
//! Every allocation carves one block from the end of the region. Blocks are
//! never split; a freed block either goes back to the operating system (when
//! it sits at the end of the region) or stays on the chain, marked free, for
//! a later request to reuse:
//!
//! ```text
//!   Free-List Allocator Concept:
//!
//!   ┌─────────────────────────────────────────────────────────────────────┐
//!   │                        MANAGED REGION                               │
//!   │                                                                     │
//!   │   ┌────┬─────┬────┬─────┬────┬─────┬────┬─────┐                     │
//!   │   │ H1 │ B1  │ H2 │ B2  │ H3 │ B3  │ H4 │ B4  │                     │
//!   │   └────┴─────┴────┴─────┴────┴─────┴────┴─────┘                     │
//!   │          in         FREE        in         in  ▲                    │
//!   │          use                    use        use │                    │
//!   │                                                │                    │
//!   │                                          Region Boundary            │
//!   │                                          (program break)            │
//!   │                                                                     │
//!   └─────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation walks the chain head-to-tail and takes the FIRST free block
//!   that is large enough (first-fit). On a miss, the region grows.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Maximal scalar alignment (align! macro)
//!   ├── block      - Block metadata records (internal)
//!   ├── error      - AllocError taxonomy
//!   ├── region     - RegionSource trait, ProgramBreak, FixedRegion
//!   └── heap       - HeapManager implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brkalloc::HeapManager;
//!
//! fn main() {
//!     // Heap over the real program break (sbrk).
//!     let heap = HeapManager::new();
//!
//!     let ptr = heap.allocate(64).expect("out of memory");
//!
//!     unsafe {
//!         // Use the memory.
//!         ptr.as_ptr().write(42);
//!         println!("Value: {}", ptr.as_ptr().read());
//!
//!         // Give it back.
//!         heap.deallocate(ptr.as_ptr());
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! Each block occupies a fixed header stride plus its payload. The stride
//! equals the platform's maximal scalar alignment, so payloads are always
//! maximally aligned:
//!
//! ```text
//!   Single Block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Header Stride      │         User Data              │
//!   │     (16 bytes)        │  ┌──────────────────────────┐  │
//!   │                       │  │     N bytes usable       │  │
//!   │                       │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! The block metadata itself (size, free flag, chain link) is kept out of
//! band in an arena owned by the allocator, so the chain is walked through
//! indices instead of raw pointers into heap bytes.
//!
//! The region is a [`RegionSource`]: the real program break
//! ([`ProgramBreak`], via `sbrk(2)`) or a bounded in-process slab
//! ([`FixedRegion`]) for hermetic testing. Either way the region only grows
//! and shrinks at its end, in LIFO order, which is why only blocks abutting
//! the boundary ever return memory to the source.
//!
//! ## Features
//!
//! - **First-fit reuse**: freed blocks are recycled without new region growth
//! - **Thread-safe**: one internal lock serializes all heap mutation
//! - **Pluggable region**: test against a fixed slab, run against `sbrk`
//! - **calloc/realloc equivalents**: `zero_allocate` and `resize`
//!
//! ## Limitations
//!
//! - **No splitting**: an oversized free block is handed out whole
//! - **No mid-chain coalescing**: interior fragmentation is permanent until
//!   the surrounding blocks are freed
//! - **O(n) scans**: allocation search and tail unlinking walk the chain
//! - **Unix-only** for [`ProgramBreak`] (requires `libc` and `sbrk`)
//!
//! ## Safety
//!
//! Allocation itself is safe; using the returned memory, `deallocate`, and
//! `resize` are `unsafe` because the allocator trusts callers to hand back
//! only pointers it produced and to stop using them afterwards.

pub mod align;
mod block;
mod error;
mod heap;
mod region;

pub use error::AllocError;
pub use heap::HeapManager;
pub use region::{FixedRegion, ProgramBreak, RegionSource};
